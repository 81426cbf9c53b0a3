use super::LogLevel;
use eframe::egui::Color32;
use serde::{Deserialize, Serialize};

/// Row colours per level, stored as hex strings so the config file stays
/// readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogColorScheme {
    pub debug: String,
    pub info: String,
    pub warn: String,
    pub error: String,
    pub fatal: String,
    pub unknown: String,
    pub match_background: String,
    pub current_match_background: String,
}

impl Default for LogColorScheme {
    fn default() -> Self {
        Self {
            debug: "#9CA3AF".to_string(),
            info: "#D1D5DB".to_string(),
            warn: "#FBBF24".to_string(),
            error: "#EF4444".to_string(),
            fatal: "#DC2626".to_string(),
            unknown: "#D1D5DB".to_string(),
            match_background: "#28285080".to_string(),
            current_match_background: "#505000".to_string(),
        }
    }
}

impl LogColorScheme {
    pub fn get_color(&self, level: LogLevel) -> Color32 {
        let hex = match level {
            LogLevel::Debug => &self.debug,
            LogLevel::Info => &self.info,
            LogLevel::Warn => &self.warn,
            LogLevel::Error => &self.error,
            LogLevel::Fatal => &self.fatal,
            LogLevel::Unknown => &self.unknown,
        };

        Self::parse_hex_color(hex).unwrap_or(Color32::WHITE)
    }

    pub fn match_background(&self, current: bool) -> Color32 {
        let hex = if current {
            &self.current_match_background
        } else {
            &self.match_background
        };
        Self::parse_hex_color(hex).unwrap_or(Color32::from_rgb(80, 80, 0))
    }

    /// `#RRGGBB` or `#RRGGBBAA`
    fn parse_hex_color(hex: &str) -> Option<Color32> {
        let hex = hex.trim_start_matches('#');
        if !hex.is_ascii() {
            return None;
        }
        let channel = |at: usize| u8::from_str_radix(hex.get(at..at + 2)?, 16).ok();

        match hex.len() {
            6 => Some(Color32::from_rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Some(Color32::from_rgba_unmultiplied(
                channel(0)?,
                channel(2)?,
                channel(4)?,
                channel(6)?,
            )),
            _ => None,
        }
    }
}
