use crate::buffer::LogLine;
use log::{debug, trace};
use std::fmt;
use std::sync::Arc;

/// Lines examined per scheduling tick.
pub const DEFAULT_CHUNK_SIZE: usize = 250;

/// Identifies one search invocation. Tokens from the same engine are strictly
/// increasing, so a newer search always compares greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SearchToken(u64);

impl fmt::Display for SearchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Case-insensitive, unanchored substring matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    pattern: String,
    needle: String,
}

impl Matcher {
    /// Returns `None` for an empty pattern, which means "no search".
    pub fn new(pattern: &str) -> Option<Self> {
        if pattern.is_empty() {
            return None;
        }
        Some(Self {
            pattern: pattern.to_string(),
            needle: fold_case(pattern).0,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, text: &str) -> bool {
        fold_case(text).0.contains(&self.needle)
    }

    /// Byte ranges into `text` of every non-overlapping occurrence.
    pub fn find_ranges(&self, text: &str) -> Vec<(usize, usize)> {
        let (folded, origin) = fold_case(text);
        let mut ranges = Vec::new();
        let mut start = 0;

        while let Some(pos) = folded[start..].find(&self.needle) {
            let match_start = start + pos;
            let match_end = match_start + self.needle.len();

            let begin = origin[match_start];
            let last = origin[match_end - 1];
            let end = last + text[last..].chars().next().map_or(0, char::len_utf8);
            // Two folded matches can land inside the same multi-char expansion
            if ranges.last().map_or(true, |&(_, prev_end)| begin >= prev_end) {
                ranges.push((begin, end));
            }

            start = match_end;
        }

        ranges
    }
}

/// Lowercases char by char, recording for every folded byte the offset of
/// the source char it came from.
fn fold_case(text: &str) -> (String, Vec<usize>) {
    let mut folded = String::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len());

    for (idx, ch) in text.char_indices() {
        for lower in ch.to_lowercase() {
            let before = folded.len();
            folded.push(lower);
            origin.resize(origin.len() + (folded.len() - before), idx);
        }
    }

    (folded, origin)
}

/// Progress and completion notifications. Every variant carries the token
/// of the search that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    Progress { token: SearchToken, fraction: f32 },
    Completed { token: SearchToken, matches: Vec<usize> },
}

impl SearchEvent {
    pub fn token(&self) -> SearchToken {
        match self {
            SearchEvent::Progress { token, .. } | SearchEvent::Completed { token, .. } => *token,
        }
    }
}

/// A chunked scan over a buffer snapshot. Indices in its results are relative
/// to that snapshot.
pub struct SearchTask {
    token: SearchToken,
    matcher: Option<Matcher>,
    lines: Vec<Arc<str>>,
    cursor: usize,
    chunk_size: usize,
    matches: Vec<usize>,
    finished: bool,
}

impl SearchTask {
    pub fn token(&self) -> SearchToken {
        self.token
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }

    /// Scan the next chunk. Returns progress after each chunk except the
    /// last, which returns the completion instead; `None` once finished.
    pub fn step(&mut self) -> Option<SearchEvent> {
        if self.finished {
            return None;
        }
        let Some(matcher) = &self.matcher else {
            self.finished = true;
            return None;
        };

        let end = (self.cursor + self.chunk_size).min(self.lines.len());
        for (offset, text) in self.lines[self.cursor..end].iter().enumerate() {
            if matcher.is_match(text) {
                self.matches.push(self.cursor + offset);
            }
        }
        self.cursor = end;

        if self.cursor >= self.lines.len() {
            self.finished = true;
            return Some(SearchEvent::Completed {
                token: self.token,
                matches: std::mem::take(&mut self.matches),
            });
        }

        Some(SearchEvent::Progress {
            token: self.token,
            fraction: self.cursor as f32 / self.lines.len() as f32,
        })
    }

    /// Run every remaining chunk; used where no interleaving is needed.
    pub fn run_to_completion(&mut self) -> Vec<SearchEvent> {
        std::iter::from_fn(|| self.step()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    Searching,
    Completed,
}

struct ActiveSearch {
    matcher: Matcher,
    phase: SearchPhase,
    /// Lines evicted from the buffer since the snapshot was taken.
    evicted_since_start: usize,
    /// Buffer indices of matching lines that arrived while scanning.
    live_matches: Vec<usize>,
}

pub struct SearchEngine {
    next_token: u64,
    chunk_size: usize,
    active_token: Option<SearchToken>,
    active: Option<ActiveSearch>,
    match_indices: Vec<usize>,
    current: Option<usize>,
    progress: f32,
    full_scans: u64,
}

impl SearchEngine {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            next_token: 0,
            chunk_size: chunk_size.max(1),
            active_token: None,
            active: None,
            match_indices: Vec::new(),
            current: None,
            progress: 0.0,
            full_scans: 0,
        }
    }

    fn mint_token(&mut self) -> SearchToken {
        self.next_token += 1;
        SearchToken(self.next_token)
    }

    /// Start a new search, superseding any previous one. An empty pattern
    /// clears the search and yields an already finished task.
    pub fn start_search(&mut self, pattern: &str, snapshot: &[LogLine]) -> SearchTask {
        let token = self.mint_token();
        self.active_token = Some(token);
        self.match_indices.clear();
        self.current = None;

        let matcher = Matcher::new(pattern);
        match &matcher {
            Some(matcher) => {
                debug!(
                    "Search {} started: pattern='{}', {} lines",
                    token,
                    matcher.pattern(),
                    snapshot.len()
                );
                self.full_scans += 1;
                self.progress = 0.0;
                self.active = Some(ActiveSearch {
                    matcher: matcher.clone(),
                    phase: SearchPhase::Searching,
                    evicted_since_start: 0,
                    live_matches: Vec::new(),
                });
            }
            None => {
                debug!("Search {} cleared", token);
                self.progress = 1.0;
                self.active = None;
            }
        }

        SearchTask {
            token,
            finished: matcher.is_none(),
            matcher,
            lines: snapshot.iter().map(|line| Arc::clone(&line.text)).collect(),
            cursor: 0,
            chunk_size: self.chunk_size,
            matches: Vec::new(),
        }
    }

    pub fn is_current(&self, token: SearchToken) -> bool {
        self.active_token == Some(token)
    }

    /// Record progress for the active search; `false` for a stale token.
    pub fn record_progress(&mut self, token: SearchToken, fraction: f32) -> bool {
        let searching = self
            .active
            .as_ref()
            .is_some_and(|active| active.phase == SearchPhase::Searching);
        if !self.is_current(token) || !searching {
            trace!("Ignoring progress from stale search {}", token);
            return false;
        }
        self.progress = self.progress.max(fraction.clamp(0.0, 1.0));
        true
    }

    /// Install the final scan results for the active search, translating the
    /// snapshot indices past any evictions and appending lines that matched
    /// while the scan ran. `false` for a stale token.
    pub fn complete(&mut self, token: SearchToken, matches: Vec<usize>) -> bool {
        if !self.is_current(token) {
            trace!("Ignoring completion from stale search {}", token);
            return false;
        }
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.phase != SearchPhase::Searching {
            return false;
        }

        let shift = active.evicted_since_start;
        let mut merged: Vec<usize> = matches
            .into_iter()
            .filter_map(|index| index.checked_sub(shift))
            .collect();
        merged.append(&mut active.live_matches);

        active.phase = SearchPhase::Completed;
        self.match_indices = merged;
        self.current = None;
        self.progress = 1.0;
        true
    }

    /// Check a freshly appended line against the active pattern.
    pub fn on_new_line_during_active_search(&mut self, text: &str, index: usize) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if !active.matcher.is_match(text) {
            return false;
        }

        match active.phase {
            SearchPhase::Searching => active.live_matches.push(index),
            SearchPhase::Completed => self.match_indices.push(index),
            SearchPhase::Idle => return false,
        }
        true
    }

    /// Shift every stored index down by `evicted_count`, dropping the ones
    /// that fell off the front. The current pointer follows its match; if
    /// that match is gone it resets to the first remaining one.
    pub fn remap_after_eviction(&mut self, evicted_count: usize) {
        if evicted_count == 0 {
            return;
        }

        if let Some(active) = self.active.as_mut() {
            if active.phase == SearchPhase::Searching {
                active.evicted_since_start += evicted_count;
                shift_indices(&mut active.live_matches, evicted_count);
            }
        }

        let dropped = shift_indices(&mut self.match_indices, evicted_count);
        self.current = match self.current {
            Some(pointer) if pointer < dropped => {
                if self.match_indices.is_empty() {
                    None
                } else {
                    Some(0)
                }
            }
            Some(pointer) => Some(pointer - dropped),
            None => None,
        };
    }

    /// Move the current pointer by `delta` with wraparound and return the
    /// line index it now refers to.
    pub fn jump(&mut self, delta: isize) -> Option<usize> {
        let count = self.match_indices.len();
        if count == 0 {
            return None;
        }

        // With no current match, forward starts just before the first entry
        let origin = match self.current {
            Some(pointer) => pointer,
            None if delta >= 0 => count - 1,
            None => 0,
        };
        // Reduce first so huge deltas cannot overflow
        let step = delta.rem_euclid(count as isize) as usize;
        let pointer = (origin + step) % count;
        self.current = Some(pointer);
        self.match_indices.get(pointer).copied()
    }

    pub fn focus_first(&mut self) -> Option<usize> {
        self.focus(0)
    }

    pub fn focus_last(&mut self) -> Option<usize> {
        let last = self.match_indices.len().checked_sub(1)?;
        self.focus(last)
    }

    pub fn focus(&mut self, pointer: usize) -> Option<usize> {
        let index = self.match_indices.get(pointer).copied()?;
        self.current = Some(pointer);
        Some(index)
    }

    /// Back to idle with no matches. Outstanding tasks become stale.
    pub fn reset(&mut self) {
        self.active_token = None;
        self.active = None;
        self.match_indices.clear();
        self.current = None;
        self.progress = 0.0;
    }

    pub fn phase(&self) -> SearchPhase {
        self.active
            .as_ref()
            .map_or(SearchPhase::Idle, |active| active.phase)
    }

    /// True while a non-empty pattern is in effect, scanning or not.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_token(&self) -> Option<SearchToken> {
        self.active_token
    }

    pub fn matcher(&self) -> Option<&Matcher> {
        self.active.as_ref().map(|active| &active.matcher)
    }

    pub fn match_indices(&self) -> &[usize] {
        &self.match_indices
    }

    pub fn current_pointer(&self) -> Option<usize> {
        self.current
    }

    pub fn current_line(&self) -> Option<usize> {
        self.current
            .and_then(|pointer| self.match_indices.get(pointer).copied())
    }

    pub fn is_match_line(&self, index: usize) -> bool {
        self.match_indices.binary_search(&index).is_ok()
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Number of full scans started so far.
    pub fn full_scans(&self) -> u64 {
        self.full_scans
    }
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

/// Subtract `by` from every index, removing those that would go negative.
/// Returns how many were removed.
fn shift_indices(indices: &mut Vec<usize>, by: usize) -> usize {
    let dropped = indices.partition_point(|&index| index < by);
    indices.drain(..dropped);
    for index in indices.iter_mut() {
        *index -= by;
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{LineBuffer, Retention, RotationPolicy};

    fn buffer_of(lines: &[&str]) -> LineBuffer {
        let mut buffer = LineBuffer::new(Retention::lines(1000), RotationPolicy::Interleave);
        for line in lines {
            buffer.append(line, "output_log.txt", "t");
        }
        buffer
    }

    fn run(engine: &mut SearchEngine, pattern: &str, buffer: &LineBuffer) -> SearchToken {
        let mut task = engine.start_search(pattern, &buffer.snapshot());
        let token = task.token();
        for event in task.run_to_completion() {
            match event {
                SearchEvent::Progress { token, fraction } => {
                    engine.record_progress(token, fraction);
                }
                SearchEvent::Completed { token, matches } => {
                    engine.complete(token, matches);
                }
            }
        }
        token
    }

    /// Engine with a completed search whose matches are exactly `indices`.
    fn engine_with_matches(indices: &[usize]) -> SearchEngine {
        let max = indices.iter().copied().max().unwrap_or(0);
        let lines: Vec<String> = (0..=max)
            .map(|i| if indices.contains(&i) { "hit".to_string() } else { "miss".to_string() })
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let mut engine = SearchEngine::new(4);
        run(&mut engine, "hit", &buffer_of(&refs));
        assert_eq!(engine.match_indices(), indices);
        engine
    }

    #[test]
    fn test_matcher_is_case_insensitive_substring() {
        let matcher = Matcher::new("error").unwrap();
        assert!(matcher.is_match("[ERROR] boom"));
        assert!(matcher.is_match("NetworkErrors"));
        assert!(!matcher.is_match("err or"));
        assert!(Matcher::new("").is_none());
    }

    #[test]
    fn test_find_ranges_maps_back_to_original_text() {
        let matcher = Matcher::new("ab").unwrap();
        assert_eq!(matcher.find_ranges("xABxab"), vec![(1, 3), (4, 6)]);

        // Folded text can be longer than the original
        let matcher = Matcher::new("i").unwrap();
        let text = "İx";
        for (start, end) in matcher.find_ranges(text) {
            assert!(text.is_char_boundary(start));
            assert!(text.is_char_boundary(end));
        }

        let matcher = Matcher::new("é").unwrap();
        assert_eq!(matcher.find_ranges("CAFÉ café"), vec![(3, 5), (9, 11)]);
    }

    #[test]
    fn test_search_finds_ascending_matches() {
        let buffer = buffer_of(&["Error one", "fine", "an ERROR", "ok", "errors everywhere"]);
        let mut engine = SearchEngine::new(2);
        run(&mut engine, "error", &buffer);

        assert_eq!(engine.match_indices(), &[0, 2, 4]);
        assert_eq!(engine.phase(), SearchPhase::Completed);
        assert_eq!(engine.progress(), 1.0);
    }

    #[test]
    fn test_chunked_progress_is_monotonic() {
        let lines: Vec<String> = (0..10).map(|i| format!("line {}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let buffer = buffer_of(&refs);
        let mut engine = SearchEngine::new(3);

        let mut task = engine.start_search("line", &buffer.snapshot());
        let events = task.run_to_completion();

        // 10 lines in chunks of 3: three progress reports then completion
        assert_eq!(events.len(), 4);
        let fractions: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                SearchEvent::Progress { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions, vec![0.3, 0.6, 0.9]);
        assert!(matches!(events.last(), Some(SearchEvent::Completed { .. })));
        assert!(task.is_finished());
        assert!(task.step().is_none());
    }

    #[test]
    fn test_empty_pattern_clears() {
        let buffer = buffer_of(&["a", "b"]);
        let mut engine = SearchEngine::new(10);
        run(&mut engine, "a", &buffer);
        assert_eq!(engine.match_indices(), &[0]);

        let task = engine.start_search("", &buffer.snapshot());
        assert!(task.is_finished());
        assert!(engine.match_indices().is_empty());
        assert_eq!(engine.phase(), SearchPhase::Idle);
        assert!(engine.is_current(task.token()));
        assert!(!engine.is_active());
    }

    #[test]
    fn test_tokens_strictly_increase() {
        let buffer = buffer_of(&["a"]);
        let mut engine = SearchEngine::default();
        let first = engine.start_search("a", &buffer.snapshot()).token();
        let second = engine.start_search("", &buffer.snapshot()).token();
        let third = engine.start_search("a", &buffer.snapshot()).token();
        assert!(first < second && second < third);
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let buffer = buffer_of(&["alpha", "beta", "alphabet"]);
        let mut engine = SearchEngine::new(10);

        let mut first = engine.start_search("alpha", &buffer.snapshot());
        let mut second = engine.start_search("beta", &buffer.snapshot());

        let second_events = second.run_to_completion();
        for event in second_events {
            if let SearchEvent::Completed { token, matches } = event {
                assert!(engine.complete(token, matches));
            }
        }
        assert_eq!(engine.match_indices(), &[1, 2]);

        // The superseded scan finishes afterwards and must change nothing
        for event in first.run_to_completion() {
            match event {
                SearchEvent::Progress { token, fraction } => {
                    assert!(!engine.record_progress(token, fraction));
                }
                SearchEvent::Completed { token, matches } => {
                    assert!(!engine.complete(token, matches));
                }
            }
        }
        assert_eq!(engine.match_indices(), &[1, 2]);
    }

    #[test]
    fn test_remap_zero_is_noop() {
        let mut engine = engine_with_matches(&[2, 5, 9]);
        engine.focus(1);
        engine.remap_after_eviction(0);
        assert_eq!(engine.match_indices(), &[2, 5, 9]);
        assert_eq!(engine.current_pointer(), Some(1));
    }

    #[test]
    fn test_remap_drops_evicted_matches() {
        let mut engine = engine_with_matches(&[2, 5, 9]);
        engine.focus(0);
        engine.remap_after_eviction(3);
        assert_eq!(engine.match_indices(), &[2, 6]);
        // The current match was evicted, so the pointer resets
        assert_eq!(engine.current_pointer(), Some(0));
    }

    #[test]
    fn test_remap_pointer_follows_surviving_match() {
        let mut engine = engine_with_matches(&[2, 5, 9]);
        engine.focus(2);
        engine.remap_after_eviction(3);
        assert_eq!(engine.current_pointer(), Some(1));
        assert_eq!(engine.current_line(), Some(6));
    }

    #[test]
    fn test_remap_everything_gone() {
        let mut engine = engine_with_matches(&[1, 2]);
        engine.focus(1);
        engine.remap_after_eviction(10);
        assert!(engine.match_indices().is_empty());
        assert_eq!(engine.current_pointer(), None);
        assert_eq!(engine.jump(1), None);
    }

    #[test]
    fn test_jump_wraps_both_directions() {
        let mut engine = engine_with_matches(&[1, 4, 7]);

        assert_eq!(engine.jump(1), Some(1));
        assert_eq!(engine.current_pointer(), Some(0));
        assert_eq!(engine.jump(-1), Some(7));
        assert_eq!(engine.current_pointer(), Some(2));

        for _ in 0..3 {
            engine.jump(1);
        }
        assert_eq!(engine.current_pointer(), Some(2));

        assert_eq!(engine.jump(1), Some(1));
        assert_eq!(engine.jump(5), Some(7));
    }

    #[test]
    fn test_jump_extreme_deltas() {
        let mut engine = engine_with_matches(&[0, 1, 2]);
        engine.focus(1);

        // isize::MAX is 1 mod 3, isize::MIN is 1 mod 3 as well
        assert_eq!(engine.jump(isize::MAX), Some(2));
        assert_eq!(engine.jump(isize::MIN), Some(0));
        assert_eq!(engine.jump(-isize::MAX), Some(2));

        // Without a current match, -k lands on n - k: even for n = 2
        let mut engine = engine_with_matches(&[5, 6]);
        assert_eq!(engine.jump(isize::MIN), Some(5));
    }

    #[test]
    fn test_jump_backwards_without_current_lands_on_last() {
        let mut engine = engine_with_matches(&[3, 8]);
        assert_eq!(engine.jump(-1), Some(8));
    }

    #[test]
    fn test_focus_first_and_last() {
        let mut engine = engine_with_matches(&[3, 8, 9]);
        assert_eq!(engine.focus_last(), Some(9));
        assert_eq!(engine.focus_first(), Some(3));
        assert_eq!(engine.focus(7), None);
        assert_eq!(engine.current_pointer(), Some(0));
    }

    #[test]
    fn test_new_line_after_completion_appends_without_rescan() {
        let mut buffer = buffer_of(&["error a", "ok"]);
        let mut engine = SearchEngine::new(10);
        run(&mut engine, "error", &buffer);
        assert_eq!(engine.full_scans(), 1);

        let result = buffer.append("FATAL ERROR", "output_log.txt", "t");
        assert!(engine.on_new_line_during_active_search("FATAL ERROR", result.new_index));
        let result = buffer.append("fine", "output_log.txt", "t");
        assert!(!engine.on_new_line_during_active_search("fine", result.new_index));

        assert_eq!(engine.match_indices(), &[0, 2]);
        assert_eq!(engine.full_scans(), 1);
    }

    #[test]
    fn test_new_line_while_idle_is_ignored() {
        let mut engine = SearchEngine::default();
        assert!(!engine.on_new_line_during_active_search("error", 0));
        assert!(engine.match_indices().is_empty());
    }

    #[test]
    fn test_lines_arriving_mid_scan_are_merged_in_order() {
        let mut buffer = LineBuffer::new(Retention::lines(4), RotationPolicy::Interleave);
        for line in ["hit 0", "miss", "hit 2", "miss"] {
            buffer.append(line, "f", "t");
        }
        let mut engine = SearchEngine::new(2);
        let mut task = engine.start_search("hit", &buffer.snapshot());

        // First chunk covers snapshot lines 0 and 1
        assert!(matches!(task.step(), Some(SearchEvent::Progress { .. })));

        // Two new lines push the first two out of the window
        for text in ["hit 4", "hit 5"] {
            let result = buffer.append(text, "f", "t");
            engine.remap_after_eviction(result.evicted_count);
            engine.on_new_line_during_active_search(text, result.new_index);
        }

        match task.step() {
            Some(SearchEvent::Completed { token, matches }) => {
                assert_eq!(matches, vec![0, 2]);
                assert!(engine.complete(token, matches));
            }
            other => panic!("expected completion, got {:?}", other),
        }

        // Buffer is now [hit 2, miss, hit 4, hit 5]
        assert_eq!(engine.match_indices(), &[0, 2, 3]);
        for &index in engine.match_indices() {
            assert!(buffer.get(index).unwrap().text.contains("hit"));
        }
    }

    #[test]
    fn test_reset_makes_outstanding_task_stale() {
        let buffer = buffer_of(&["a"]);
        let mut engine = SearchEngine::default();
        let mut task = engine.start_search("a", &buffer.snapshot());
        engine.reset();

        for event in task.run_to_completion() {
            if let SearchEvent::Completed { token, matches } = event {
                assert!(!engine.complete(token, matches));
            }
        }
        assert_eq!(engine.phase(), SearchPhase::Idle);
        assert!(engine.match_indices().is_empty());
    }
}
