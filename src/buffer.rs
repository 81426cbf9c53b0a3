use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Default line cap for the retained window.
pub const MAX_RETAINED: usize = 1000;

/// What happens to retained lines when a line arrives from a different file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Keep old-file lines, each tagged with its source file
    #[default]
    Interleave,
    /// Drop everything retained when the source file changes
    Reset,
}

/// Bounds on the retained window. The line cap always applies; the byte
/// ceiling only when set, and never evicts the newest line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    pub max_lines: usize,
    pub max_bytes: Option<usize>,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            max_lines: MAX_RETAINED,
            max_bytes: None,
        }
    }
}

impl Retention {
    pub fn lines(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            max_bytes: None,
        }
    }
}

/// One retained line. `sequence_index` is relative to the buffer contents at
/// the time the line was read out and shifts down on every eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub sequence_index: usize,
    pub text: Arc<str>,
    pub source_file: Arc<str>,
    pub timestamp: Arc<str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendResult {
    /// Lines dropped from the front; every stored index must shift down by this.
    pub evicted_count: usize,
    /// Index of the appended line after eviction.
    pub new_index: usize,
    pub source_changed: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    text: Arc<str>,
    source_file: Arc<str>,
    timestamp: Arc<str>,
}

pub struct LineBuffer {
    lines: VecDeque<Entry>,
    retention: Retention,
    rotation: RotationPolicy,
    current_source: Option<Arc<str>>,
    retained_bytes: usize,
    total_appended: u64,
    total_evicted: u64,
}

impl LineBuffer {
    pub fn new(retention: Retention, rotation: RotationPolicy) -> Self {
        Self {
            lines: VecDeque::with_capacity(retention.max_lines.min(MAX_RETAINED * 4)),
            retention: Retention {
                max_lines: retention.max_lines.max(1),
                ..retention
            },
            rotation,
            current_source: None,
            retained_bytes: 0,
            total_appended: 0,
            total_evicted: 0,
        }
    }

    /// Append a line, resetting on rotation when configured and evicting from
    /// the front until the window fits its bounds again.
    pub fn append(&mut self, text: &str, source_file: &str, timestamp: &str) -> AppendResult {
        let mut evicted_count = 0;
        let source_changed = self
            .current_source
            .as_deref()
            .is_some_and(|current| current != source_file);

        if source_changed && self.rotation == RotationPolicy::Reset {
            evicted_count = self.lines.len();
            debug!(
                "Source changed to '{}', dropping {} retained lines",
                source_file, evicted_count
            );
            self.total_evicted += evicted_count as u64;
            self.lines.clear();
            self.retained_bytes = 0;
        }

        let source = match &self.current_source {
            Some(current) if current.as_ref() == source_file => Arc::clone(current),
            _ => {
                let source: Arc<str> = Arc::from(source_file);
                self.current_source = Some(Arc::clone(&source));
                source
            }
        };

        self.retained_bytes += text.len();
        self.total_appended += 1;
        self.lines.push_back(Entry {
            text: Arc::from(text),
            source_file: source,
            timestamp: Arc::from(timestamp),
        });

        let mut trimmed = 0;
        while self.over_capacity() {
            if let Some(dropped) = self.lines.pop_front() {
                self.retained_bytes -= dropped.text.len();
                trimmed += 1;
            }
        }
        if trimmed > 0 {
            trace!("Evicted {} lines, {} retained", trimmed, self.lines.len());
            self.total_evicted += trimmed as u64;
            evicted_count += trimmed;
        }

        AppendResult {
            evicted_count,
            new_index: self.lines.len() - 1,
            source_changed,
        }
    }

    fn over_capacity(&self) -> bool {
        if self.lines.len() > self.retention.max_lines {
            return true;
        }
        match self.retention.max_bytes {
            Some(max_bytes) => self.lines.len() > 1 && self.retained_bytes > max_bytes,
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.retained_bytes = 0;
        self.current_source = None;
        self.total_appended = 0;
        self.total_evicted = 0;
    }

    pub fn get(&self, index: usize) -> Option<LogLine> {
        self.lines.get(index).map(|entry| Self::materialize(index, entry))
    }

    /// Ordered copy of the current contents; the text itself is shared.
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines
            .iter()
            .enumerate()
            .map(|(index, entry)| Self::materialize(index, entry))
            .collect()
    }

    fn materialize(index: usize, entry: &Entry) -> LogLine {
        LogLine {
            sequence_index: index,
            text: Arc::clone(&entry.text),
            source_file: Arc::clone(&entry.source_file),
            timestamp: Arc::clone(&entry.timestamp),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    pub fn rotation(&self) -> RotationPolicy {
        self.rotation
    }

    pub fn current_source(&self) -> Option<&str> {
        self.current_source.as_deref()
    }

    pub fn retained_bytes(&self) -> usize {
        self.retained_bytes
    }

    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    pub fn total_evicted(&self) -> u64 {
        self.total_evicted
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(Retention::default(), RotationPolicy::default())
    }
}
