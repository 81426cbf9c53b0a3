use crossbeam_channel::Receiver;
use eframe::egui::{self, text::LayoutJob, Color32, FontFamily, FontId, RichText, TextFormat};
use log::{info, warn};
use log_explorer::config::Config;
use log_explorer::input::{ChordParser, NavKey, NavigationCommand};
use log_explorer::log_parser::LogLevelDetector;
use log_explorer::tail::{self, DirectoryTailer, FilePattern, TailEvent, TailHandle};
use log_explorer::view::{ScrollAlign, ViewCoordinator, ViewEvent, ViewMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const IDLE_REPAINT: Duration = Duration::from_millis(250);

/// What survives a restart through eframe storage.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct PersistedState {
    last_query: String,
    font_size: Option<f32>,
}

pub struct LogExplorerApp {
    config: Config,
    view: ViewCoordinator,
    tail_events: Receiver<TailEvent>,
    tail: Option<TailHandle>,
    log_directory: PathBuf,
    detector: LogLevelDetector,
    chords: ChordParser,

    // UI state
    query_input: String,
    match_counter: Option<(Option<usize>, usize)>,
    progress: Option<f32>,
    scroll_request: Option<(usize, ScrollAlign)>,
    viewport_height: f32,
    current_file: Option<String>,
    selected_line: Option<usize>,
    status_message: Option<String>,
    font_size: f32,
}

impl LogExplorerApp {
    pub fn new(cc: &eframe::CreationContext<'_>, mut config: Config, initial_query: Option<String>) -> Self {
        let persisted: PersistedState = cc
            .storage
            .and_then(|storage| eframe::get_value(storage, eframe::APP_KEY))
            .unwrap_or_default();

        config.theme.adopt_palette(&mut config.colors);
        config.theme.apply(&cc.egui_ctx);

        let (_, tail_events) = crossbeam_channel::unbounded();
        let mut app = Self {
            view: ViewCoordinator::new(config.view_settings()),
            tail_events,
            tail: None,
            log_directory: config.resolved_log_directory(),
            detector: LogLevelDetector::new(),
            chords: ChordParser::new(),
            query_input: String::new(),
            match_counter: None,
            progress: None,
            scroll_request: None,
            viewport_height: 0.0,
            current_file: None,
            selected_line: None,
            status_message: None,
            font_size: persisted.font_size.unwrap_or(config.font_size),
            config,
        };

        let directory = app.log_directory.clone();
        app.start_tailer(directory);

        let query = initial_query.unwrap_or(persisted.last_query);
        if !query.is_empty() {
            info!("Restoring query '{}'", query);
            app.query_input = query;
            app.view.on_query_changed(&app.query_input, Instant::now());
            app.view.submit_query();
        }

        app
    }

    /// (Re)start following `directory`, replacing any running tail thread.
    fn start_tailer(&mut self, directory: PathBuf) {
        if let Some(mut handle) = self.tail.take() {
            handle.stop();
        }

        let pattern = match FilePattern::new(&self.config.file_pattern) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!("{}", e);
                self.status_message = Some(e.to_string());
                return;
            }
        };

        info!("Following {:?}", directory);
        let (sender, receiver) = crossbeam_channel::unbounded();
        let tailer = DirectoryTailer::new(&directory, pattern).with_backfill(self.config.backfill_lines);
        self.tail = Some(tail::spawn(tailer, self.config.poll_interval(), sender));
        self.tail_events = receiver;
        self.log_directory = directory;
        self.current_file = None;
        self.status_message = None;
    }

    fn open_folder(&mut self) {
        let Some(directory) = rfd::FileDialog::new()
            .set_directory(&self.log_directory)
            .pick_folder()
        else {
            return;
        };

        // Keep the query across the switch
        let query = self.query_input.clone();
        self.view.on_clear();
        self.start_tailer(directory);
        if !query.is_empty() {
            self.view.on_query_changed(&query, Instant::now());
            self.view.submit_query();
        }
    }

    fn drain_tail_events(&mut self) {
        for event in self.tail_events.try_iter() {
            match event {
                TailEvent::Line {
                    text,
                    source_file,
                    timestamp,
                } => {
                    let result = self.view.on_append(&text, &source_file, &timestamp);
                    if result.evicted_count > 0 {
                        self.selected_line = self
                            .selected_line
                            .and_then(|line| line.checked_sub(result.evicted_count));
                    }
                }
                TailEvent::Rotated { current, .. } => self.current_file = Some(current),
            }
        }
    }

    fn handle_view_events(&mut self) {
        for event in self.view.drain_events() {
            match event {
                ViewEvent::Progress { fraction, .. } => {
                    self.progress = (fraction < 1.0).then_some(fraction);
                }
                ViewEvent::MatchesUpdated {
                    match_indices,
                    current,
                    ..
                } => {
                    self.match_counter = Some((current, match_indices.len()));
                }
                ViewEvent::ScrollToLine { index, align } => {
                    self.scroll_request = Some((index, align));
                }
                ViewEvent::Cleared => {
                    self.match_counter = None;
                    self.progress = None;
                    self.scroll_request = None;
                    self.selected_line = None;
                }
            }
        }

        if !self.view.engine().is_active() {
            self.match_counter = None;
            self.progress = None;
        }
    }

    fn handle_keyboard(&mut self, ctx: &egui::Context) {
        let events = ctx.input(|i| i.events.clone());
        let typing = ctx.wants_keyboard_input();

        for event in events {
            let key = match event {
                egui::Event::Copy if !typing => {
                    self.copy_selected_line();
                    continue;
                }
                egui::Event::Key {
                    key: egui::Key::Escape,
                    pressed: true,
                    ..
                } => Some(NavKey::Escape),
                egui::Event::Text(text) if !typing => match text.as_str() {
                    "n" => Some(NavKey::Next),
                    "N" => Some(NavKey::Previous),
                    "g" => Some(NavKey::G),
                    "G" => Some(NavKey::ShiftG),
                    digit => digit
                        .parse::<u8>()
                        .ok()
                        .filter(|d| *d <= 9)
                        .map(NavKey::Digit),
                },
                _ => None,
            };

            if let Some(command) = key.and_then(|key| self.chords.feed(key)) {
                self.view.navigate(command);
            }
        }
    }

    fn copy_selected_line(&mut self) {
        let Some(line) = self.selected_line.and_then(|index| self.view.buffer().get(index)) else {
            return;
        };

        match arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(line.text.to_string())) {
            Ok(()) => self.status_message = Some(format!("Copied line {}", line.sequence_index + 1)),
            Err(e) => {
                warn!("Clipboard unavailable: {}", e);
                self.status_message = Some(format!("Copy failed: {}", e));
            }
        }
    }

    fn render_toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Search:");
            let response = ui.add(
                egui::TextEdit::singleline(&mut self.query_input)
                    .hint_text("case-insensitive text")
                    .desired_width(300.0)
                    .font(egui::TextStyle::Monospace),
            );

            if response.changed() {
                self.view.on_query_changed(&self.query_input, Instant::now());
            }
            if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                self.view.submit_query();
            }

            if ui.small_button("◀").on_hover_text("Previous match (N)").clicked() {
                self.view.navigate(NavigationCommand::Previous(1));
            }
            if ui.small_button("▶").on_hover_text("Next match (n)").clicked() {
                self.view.navigate(NavigationCommand::Next(1));
            }

            match self.match_counter {
                Some((_, 0)) => {
                    ui.label("No matches");
                }
                Some((current, total)) => {
                    let position = current.map_or("-".to_string(), |pointer| (pointer + 1).to_string());
                    ui.label(format!("{} of {}", position, total));
                }
                None => {}
            }

            if let Some(fraction) = self.progress {
                ui.add(
                    egui::ProgressBar::new(fraction)
                        .desired_width(120.0)
                        .show_percentage(),
                );
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("Open folder…").clicked() {
                    self.open_folder();
                }
                if ui.button(self.config.theme.label()).clicked() {
                    self.config.theme = self.config.theme.toggled();
                    self.config.theme.adopt_palette(&mut self.config.colors);
                    self.config.theme.apply(ui.ctx());
                }
                if ui.small_button("A+").clicked() {
                    self.font_size = (self.font_size + 1.0).min(32.0);
                }
                if ui.small_button("A-").clicked() {
                    self.font_size = (self.font_size - 1.0).max(8.0);
                }

                let mut following = self.view.view_mode() == ViewMode::Following;
                if ui.checkbox(&mut following, "Follow").changed() {
                    self.view.set_following(following);
                }
                if ui.button("Clear").clicked() {
                    self.query_input.clear();
                    self.view.on_clear();
                }
            });
        });
    }

    fn render_status_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let buffer = self.view.buffer();
            ui.label(format!(
                "Lines: {} / {}",
                buffer.len(),
                buffer.retention().max_lines
            ));
            if buffer.total_evicted() > 0 {
                ui.colored_label(Color32::YELLOW, format!("Dropped: {}", buffer.total_evicted()));
            }
            ui.separator();
            ui.label(format!(
                "File: {}",
                self.current_file.as_deref().unwrap_or("(waiting)")
            ));

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(
                    RichText::new(self.log_directory.display().to_string())
                        .color(Color32::GRAY)
                        .small(),
                );
                if self.chords.is_pending() {
                    ui.label(RichText::new(self.chords.status()).monospace());
                }
                if let Some(message) = &self.status_message {
                    ui.label(message);
                }
            });
        });
    }

    fn render_lines(&mut self, ui: &mut egui::Ui) {
        let font_id = FontId::new(self.font_size, FontFamily::Monospace);
        let row_height = ui.fonts(|fonts| fonts.row_height(&font_id));
        let stride = row_height + ui.spacing().item_spacing.y;
        let total_rows = self.view.buffer().len();
        let following = self.view.view_mode() == ViewMode::Following;
        let auto_scroll = following && !self.view.engine().is_active();

        let mut scroll_area = egui::ScrollArea::both()
            .id_salt("log_lines")
            .auto_shrink([false, false])
            .stick_to_bottom(auto_scroll);

        let requested = self.scroll_request.take();
        if let Some((index, align)) = requested {
            let top = index as f32 * stride;
            let offset = match align {
                ScrollAlign::Center => top - (self.viewport_height - stride) / 2.0,
                ScrollAlign::Bottom => top + stride - self.viewport_height,
            };
            scroll_area = scroll_area.vertical_scroll_offset(offset.max(0.0));
        }

        let area_rect = ui.available_rect_before_wrap();
        let output = scroll_area.show_rows(ui, row_height, total_rows, |ui, rows| {
            let engine = self.view.engine();
            let current = engine.current_line();
            let width = ui.available_width().max(area_rect.width());

            for index in rows {
                let Some(line) = self.view.buffer().get(index) else {
                    continue;
                };
                let is_current = current == Some(index);
                let is_match = engine.is_match_line(index);

                let row_rect = egui::Rect::from_min_size(ui.cursor().min, egui::vec2(width, row_height));
                if is_current || self.selected_line == Some(index) {
                    let fill = if is_current {
                        self.config.colors.match_background(true)
                    } else {
                        ui.visuals().selection.bg_fill.gamma_multiply(0.4)
                    };
                    ui.painter().rect_filled(row_rect, 0.0, fill);
                }

                let color = self.config.colors.get_color(self.detector.detect(&line.text));
                let ranges = match engine.matcher() {
                    Some(matcher) if is_match => matcher.find_ranges(&line.text),
                    _ => Vec::new(),
                };
                let job = line_job(
                    &line.text,
                    &ranges,
                    font_id.clone(),
                    color,
                    self.config.colors.match_background(false),
                );

                let response = ui
                    .horizontal(|ui| {
                        ui.label(
                            RichText::new(format!("{:>6} ", line.sequence_index + 1))
                                .font(font_id.clone())
                                .color(Color32::from_gray(128)),
                        );
                        ui.add(
                            egui::Label::new(job)
                                .wrap_mode(egui::TextWrapMode::Extend)
                                .sense(egui::Sense::click()),
                        )
                    })
                    .inner
                    .on_hover_text(format!("{}  {}", line.timestamp, line.source_file));

                if response.clicked() {
                    self.selected_line = Some(index);
                }
            }

            if total_rows == 0 {
                ui.label(
                    RichText::new("Waiting for log output...")
                        .italics()
                        .color(Color32::GRAY),
                );
            }
        });

        self.viewport_height = output.inner_rect.height();

        // A manual scroll decides whether we stay pinned to the bottom
        let user_scrolled = requested.is_none()
            && ui.rect_contains_pointer(area_rect)
            && ui.input(|i| i.smooth_scroll_delta.y != 0.0 || i.pointer.primary_down());
        if user_scrolled {
            let max_offset = (output.content_size.y - output.inner_rect.height()).max(0.0);
            let at_bottom = output.state.offset.y >= max_offset - stride;
            self.view.set_following(at_bottom);
        }
    }

    fn schedule_repaint(&self, ctx: &egui::Context, now: Instant) {
        if self.view.in_flight_count() > 0 {
            ctx.request_repaint();
            return;
        }
        let wait = self
            .view
            .debounce_remaining(now)
            .map_or(IDLE_REPAINT, |remaining| remaining.min(IDLE_REPAINT));
        ctx.request_repaint_after(wait);
    }
}

/// Lay out one line with its matches on a highlighted background.
fn line_job(text: &str, ranges: &[(usize, usize)], font_id: FontId, color: Color32, highlight: Color32) -> LayoutJob {
    let plain = TextFormat {
        font_id,
        color,
        ..Default::default()
    };
    let marked = TextFormat {
        background: highlight,
        ..plain.clone()
    };

    let mut job = LayoutJob::default();
    let mut last_end = 0;
    for &(start, end) in ranges {
        if start > last_end {
            job.append(&text[last_end..start], 0.0, plain.clone());
        }
        job.append(&text[start..end], 0.0, marked.clone());
        last_end = end;
    }
    if last_end < text.len() {
        job.append(&text[last_end..], 0.0, plain);
    }
    job
}

impl eframe::App for LogExplorerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        self.drain_tail_events();
        self.view.tick(now);
        self.handle_keyboard(ctx);
        self.handle_view_events();

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            self.render_toolbar(ui);
        });
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            self.render_status_bar(ui);
        });
        // Toolbar actions may have queued more events
        self.handle_view_events();
        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_lines(ui);
        });

        self.schedule_repaint(ctx, now);
    }

    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        let state = PersistedState {
            last_query: self.query_input.clone(),
            font_size: Some(self.font_size),
        };
        eframe::set_value(storage, eframe::APP_KEY, &state);
    }
}
