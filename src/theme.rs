use crate::log_parser::LogColorScheme;
use eframe::egui::{Context, Visuals};
use serde::{Deserialize, Serialize};

/// Window theme. Each theme carries a level palette that stays readable on
/// its background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn label(self) -> &'static str {
        match self {
            Theme::Light => "Light",
            Theme::Dark => "Dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn palette(self) -> LogColorScheme {
        match self {
            Theme::Dark => LogColorScheme::default(),
            Theme::Light => LogColorScheme {
                debug: "#6B7280".to_string(),
                info: "#1F2937".to_string(),
                warn: "#B45309".to_string(),
                error: "#B91C1C".to_string(),
                fatal: "#7F1D1D".to_string(),
                unknown: "#1F2937".to_string(),
                match_background: "#BFDBFE".to_string(),
                current_match_background: "#FDE68A".to_string(),
            },
        }
    }

    /// Swap `colors` to this theme's palette unless the user customised them.
    pub fn adopt_palette(self, colors: &mut LogColorScheme) {
        if *colors == self.toggled().palette() {
            *colors = self.palette();
        }
    }

    pub fn apply(self, ctx: &Context) {
        ctx.set_visuals(match self {
            Theme::Light => Visuals::light(),
            Theme::Dark => Visuals::dark(),
        });
    }
}
