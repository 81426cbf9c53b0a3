use crate::buffer::{AppendResult, LineBuffer, Retention, RotationPolicy};
use crate::debounce::Debouncer;
use crate::input::NavigationCommand;
use crate::search::{SearchEngine, SearchEvent, SearchPhase, SearchTask, SearchToken, DEFAULT_CHUNK_SIZE};
use log::{info, trace};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Where a requested line should land in the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAlign {
    Center,
    Bottom,
}

/// Whether the display follows new output or stays where the user put it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Following,
    Paused,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Progress {
        token: SearchToken,
        fraction: f32,
    },
    MatchesUpdated {
        token: SearchToken,
        match_indices: Vec<usize>,
        current: Option<usize>,
    },
    ScrollToLine {
        index: usize,
        align: ScrollAlign,
    },
    Cleared,
}

#[derive(Debug, Clone, Copy)]
pub struct ViewSettings {
    pub retention: Retention,
    pub rotation: RotationPolicy,
    pub debounce: Duration,
    pub chunk_size: usize,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            retention: Retention::default(),
            rotation: RotationPolicy::default(),
            debounce: Duration::from_millis(400),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

struct InFlight {
    task: SearchTask,
    started: Instant,
}

/// Owns the line buffer and search engine for one monitoring session and
/// keeps their indices consistent for the display.
pub struct ViewCoordinator {
    buffer: LineBuffer,
    engine: SearchEngine,
    debouncer: Debouncer<String>,
    in_flight: Vec<InFlight>,
    awaiting_first_completion: Option<SearchToken>,
    view_mode: ViewMode,
    query: String,
    events: VecDeque<ViewEvent>,
}

impl ViewCoordinator {
    pub fn new(settings: ViewSettings) -> Self {
        Self {
            buffer: LineBuffer::new(settings.retention, settings.rotation),
            engine: SearchEngine::new(settings.chunk_size),
            debouncer: Debouncer::new(settings.debounce),
            in_flight: Vec::new(),
            awaiting_first_completion: None,
            view_mode: ViewMode::Following,
            query: String::new(),
            events: VecDeque::new(),
        }
    }

    /// Ingest one line from the tail source.
    pub fn on_append(&mut self, text: &str, source_file: &str, timestamp: &str) -> AppendResult {
        let result = self.buffer.append(text, source_file, timestamp);
        let mut matches_changed = false;

        if result.evicted_count > 0 {
            self.engine.remap_after_eviction(result.evicted_count);
            matches_changed = true;
        }

        if self.engine.is_active()
            && self
                .engine
                .on_new_line_during_active_search(text, result.new_index)
        {
            matches_changed = true;
        }

        // Matches are only published once the scan for the current token is done
        if matches_changed && self.engine.phase() == SearchPhase::Completed {
            self.publish_matches();
        }

        if self.view_mode == ViewMode::Following && !self.engine.is_active() {
            self.events.push_back(ViewEvent::ScrollToLine {
                index: result.new_index,
                align: ScrollAlign::Bottom,
            });
        }

        result
    }

    /// Record new query text; the search starts once typing settles.
    pub fn on_query_changed(&mut self, pattern: &str, now: Instant) {
        self.query = pattern.to_string();
        self.debouncer.trigger(self.query.clone(), now);
    }

    /// Start the pending query right away (Enter key).
    pub fn submit_query(&mut self) {
        let pattern = self.debouncer.flush().unwrap_or_else(|| self.query.clone());
        self.start_search(pattern);
    }

    fn start_search(&mut self, pattern: String) {
        let snapshot = self.buffer.snapshot();
        let task = self.engine.start_search(&pattern, &snapshot);
        let token = task.token();

        if task.is_finished() {
            self.awaiting_first_completion = None;
            self.publish_matches();
            if self.view_mode == ViewMode::Following {
                self.scroll_to_bottom();
            }
            return;
        }

        self.awaiting_first_completion = Some(token);
        self.in_flight.push(InFlight {
            task,
            started: Instant::now(),
        });
    }

    /// One scheduling turn: fire a settled query, then advance every
    /// outstanding scan by one chunk. Returns whether work remains.
    pub fn tick(&mut self, now: Instant) -> bool {
        if let Some(pattern) = self.debouncer.poll(now) {
            self.start_search(pattern);
        }

        // Superseded scans keep running; their events are dropped by token
        let events: Vec<(SearchEvent, Instant)> = self
            .in_flight
            .iter_mut()
            .filter_map(|in_flight| in_flight.task.step().map(|event| (event, in_flight.started)))
            .collect();

        for (event, started) in events {
            self.handle_search_event(event, started);
        }
        self.in_flight.retain(|in_flight| !in_flight.task.is_finished());

        self.is_busy()
    }

    fn handle_search_event(&mut self, event: SearchEvent, started: Instant) {
        match event {
            SearchEvent::Progress { token, fraction } => {
                if self.engine.record_progress(token, fraction) {
                    self.events
                        .push_back(ViewEvent::Progress { token, fraction });
                }
            }
            SearchEvent::Completed { token, matches } => {
                if !self.engine.complete(token, matches) {
                    trace!("Discarded results of superseded search {}", token);
                    return;
                }
                info!(
                    "Search {} completed in {:.1}ms: {} matches",
                    token,
                    started.elapsed().as_secs_f64() * 1000.0,
                    self.engine.match_indices().len()
                );
                self.events.push_back(ViewEvent::Progress {
                    token,
                    fraction: 1.0,
                });

                let first = self.awaiting_first_completion == Some(token);
                self.awaiting_first_completion = None;
                let target = if first { self.engine.focus_first() } else { None };
                self.publish_matches();
                if let Some(index) = target {
                    self.scroll_to_match(index);
                }
            }
        }
    }

    pub fn on_jump_requested(&mut self, delta: isize) -> Option<usize> {
        let index = self.engine.jump(delta)?;
        self.publish_matches();
        self.scroll_to_match(index);
        Some(index)
    }

    pub fn navigate(&mut self, command: NavigationCommand) -> Option<usize> {
        match command {
            NavigationCommand::First => self.focus_with(SearchEngine::focus_first),
            NavigationCommand::Last => self.focus_with(SearchEngine::focus_last),
            other => self.on_jump_requested(other.delta()?),
        }
    }

    fn focus_with(&mut self, focus: fn(&mut SearchEngine) -> Option<usize>) -> Option<usize> {
        let index = focus(&mut self.engine)?;
        self.publish_matches();
        self.scroll_to_match(index);
        Some(index)
    }

    /// Drop every line and every search result.
    pub fn on_clear(&mut self) {
        info!("Clearing {} retained lines", self.buffer.len());
        self.buffer.clear();
        self.engine.reset();
        self.debouncer.cancel();
        self.in_flight.clear();
        self.awaiting_first_completion = None;
        self.query.clear();
        self.events.push_back(ViewEvent::Cleared);
    }

    /// Tell the coordinator whether the display is pinned to the bottom.
    pub fn set_following(&mut self, following: bool) {
        let mode = if following {
            ViewMode::Following
        } else {
            ViewMode::Paused
        };
        if mode == self.view_mode {
            return;
        }
        self.view_mode = mode;
        if mode == ViewMode::Following {
            self.scroll_to_bottom();
        }
    }

    fn scroll_to_bottom(&mut self) {
        if let Some(index) = self.buffer.len().checked_sub(1) {
            self.events.push_back(ViewEvent::ScrollToLine {
                index,
                align: ScrollAlign::Bottom,
            });
        }
    }

    fn scroll_to_match(&mut self, index: usize) {
        self.events.push_back(ViewEvent::ScrollToLine {
            index,
            align: ScrollAlign::Center,
        });
    }

    fn publish_matches(&mut self) {
        let Some(token) = self.engine.active_token() else {
            return;
        };
        self.events.push_back(ViewEvent::MatchesUpdated {
            token,
            match_indices: self.engine.match_indices().to_vec(),
            current: self.engine.current_pointer(),
        });
    }

    pub fn drain_events(&mut self) -> Vec<ViewEvent> {
        self.events.drain(..).collect()
    }

    /// True while a scan is running or a query is waiting out its debounce.
    pub fn is_busy(&self) -> bool {
        !self.in_flight.is_empty() || self.debouncer.is_pending()
    }

    pub fn debounce_remaining(&self, now: Instant) -> Option<Duration> {
        self.debouncer.time_remaining(now)
    }

    pub fn buffer(&self) -> &LineBuffer {
        &self.buffer
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl Default for ViewCoordinator {
    fn default() -> Self {
        Self::new(ViewSettings::default())
    }
}
