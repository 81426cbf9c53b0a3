use super::backfill::read_last_lines;
use super::{FilePattern, TailError, TailEvent};
use crossbeam_channel::{RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

/// Upper bound on lines handed out by a single poll; the rest waits.
pub const MAX_LINES_PER_POLL: usize = 10_000;
/// Upper bound on bytes read from one file in a single poll.
const MAX_BYTES_PER_READ: u64 = 4 * 1024 * 1024;

struct FileCursor {
    position: u64,
}

struct DiscoveredFile {
    name: String,
    path: PathBuf,
    length: u64,
    modified: SystemTime,
}

/// Polls a directory for log files and reads whatever complete lines were
/// appended since the last poll.
pub struct DirectoryTailer {
    directory: PathBuf,
    pattern: FilePattern,
    cursors: HashMap<String, FileCursor>,
    most_recent: Option<String>,
    primed: bool,
    backfill_lines: usize,
    max_lines_per_poll: usize,
}

impl DirectoryTailer {
    pub fn new(directory: impl Into<PathBuf>, pattern: FilePattern) -> Self {
        Self {
            directory: directory.into(),
            pattern,
            cursors: HashMap::new(),
            most_recent: None,
            primed: false,
            backfill_lines: 0,
            max_lines_per_poll: MAX_LINES_PER_POLL,
        }
    }

    /// Lines of history to emit from the newest file on the first poll.
    pub fn with_backfill(mut self, lines: usize) -> Self {
        self.backfill_lines = lines;
        self
    }

    pub fn with_max_lines_per_poll(mut self, lines: usize) -> Self {
        self.max_lines_per_poll = lines.max(1);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn most_recent(&self) -> Option<&str> {
        self.most_recent.as_deref()
    }

    /// Matching files, oldest modification first.
    fn discover(&self) -> Result<Vec<DiscoveredFile>, TailError> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.directory).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|source| TailError::ReadDir {
                path: self.directory.clone(),
                source,
            })?;
            if !entry.file_type().is_file() || !self.pattern.matches(entry.path()) {
                continue;
            }
            // The file may vanish between listing and stat
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            files.push(DiscoveredFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path().to_path_buf(),
                length: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        files.sort_by_key(|file| file.modified);
        Ok(files)
    }

    pub fn poll(&mut self) -> Result<Vec<TailEvent>, TailError> {
        if !self.directory.is_dir() {
            debug!("Log directory {:?} does not exist yet", self.directory);
            return Ok(Vec::new());
        }

        let files = self.discover()?;
        if !self.primed {
            return Ok(self.prime(&files));
        }
        Ok(self.read_files(&files))
    }

    /// Read new lines from each file, oldest first. A file that fails is
    /// skipped for this poll; one that vanished is forgotten.
    fn read_files(&mut self, files: &[DiscoveredFile]) -> Vec<TailEvent> {
        self.cursors
            .retain(|name, _| files.iter().any(|file| &file.name == name));

        let timestamp = now_timestamp();
        let mut events = Vec::new();
        let mut budget = self.max_lines_per_poll;

        for file in files {
            if budget == 0 {
                debug!("Line budget exhausted, continuing next poll");
                break;
            }

            // Files appearing after the first poll are new logs: read them whole
            let cursor = self
                .cursors
                .entry(file.name.clone())
                .or_insert_with(|| {
                    info!("Discovered new log file {}", file.name);
                    FileCursor { position: 0 }
                });

            if file.length < cursor.position {
                warn!(
                    "{} shrank from {} to {} bytes, reading from the start",
                    file.name, cursor.position, file.length
                );
                cursor.position = 0;
            }
            if file.length == cursor.position {
                continue;
            }

            let lines = match read_new_lines(&file.path, cursor.position, file.length, budget) {
                Ok((lines, position)) => {
                    cursor.position = position;
                    lines
                }
                Err(e) if is_vanished(&e) => {
                    info!("{} disappeared, no longer tracking it", file.name);
                    self.cursors.remove(&file.name);
                    continue;
                }
                Err(e) => {
                    warn!("{}", e);
                    continue;
                }
            };
            if lines.is_empty() {
                continue;
            }
            budget -= lines.len();

            if self.most_recent.as_deref() != Some(file.name.as_str()) {
                info!("Now following {}", file.name);
                events.push(TailEvent::Rotated {
                    previous: self.most_recent.replace(file.name.clone()),
                    current: file.name.clone(),
                });
            }

            events.extend(lines.into_iter().map(|text| TailEvent::Line {
                text,
                source_file: file.name.clone(),
                timestamp: timestamp.clone(),
            }));
        }

        events
    }

    /// First poll: skip existing content, except the newest file's last
    /// `backfill_lines` lines.
    fn prime(&mut self, files: &[DiscoveredFile]) -> Vec<TailEvent> {
        self.primed = true;
        let mut events = Vec::new();
        let Some(newest) = files.last() else {
            return events;
        };

        info!(
            "Tracking {} log files in {:?}, newest is {}",
            files.len(),
            self.directory,
            newest.name
        );
        self.most_recent = Some(newest.name.clone());
        events.push(TailEvent::Rotated {
            previous: None,
            current: newest.name.clone(),
        });

        let timestamp = now_timestamp();
        for file in files {
            let is_newest = file.name == newest.name;
            let wanted = if is_newest { self.backfill_lines } else { 0 };

            // Start after the last complete line so a half-written one is
            // read whole once finished
            let position = match read_last_lines(&file.path, wanted) {
                Ok(backfill) => {
                    if !backfill.lines.is_empty() {
                        debug!("Backfilled {} lines from {}", backfill.lines.len(), file.name);
                    }
                    events.extend(backfill.lines.into_iter().map(|text| TailEvent::Line {
                        text,
                        source_file: file.name.clone(),
                        timestamp: timestamp.clone(),
                    }));
                    backfill.position
                }
                Err(e) => {
                    warn!("Could not scan {}: {}", file.name, e);
                    file.length
                }
            };
            self.cursors.insert(file.name.clone(), FileCursor { position });
        }

        events
    }
}

fn is_vanished(error: &TailError) -> bool {
    matches!(
        error,
        TailError::Open { source, .. } if source.kind() == std::io::ErrorKind::NotFound
    )
}

fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Read complete lines from `position`, returning them with the offset just
/// past the last line consumed. A trailing partial line stays unread.
fn read_new_lines(
    path: &Path,
    position: u64,
    length: u64,
    max_lines: usize,
) -> Result<(Vec<String>, u64), TailError> {
    let read_error = |source| TailError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(|source| TailError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    file.seek(SeekFrom::Start(position)).map_err(read_error)?;

    let limit = (length - position).min(MAX_BYTES_PER_READ);
    let mut data = Vec::with_capacity(limit as usize);
    file.take(limit).read_to_end(&mut data).map_err(read_error)?;

    let Some(last_newline) = data.iter().rposition(|&b| b == b'\n') else {
        // A single line longer than the read window is emitted as-is
        if data.len() as u64 == MAX_BYTES_PER_READ {
            let text = String::from_utf8_lossy(&data).into_owned();
            return Ok((vec![text], position + data.len() as u64));
        }
        return Ok((Vec::new(), position));
    };

    let mut lines = Vec::new();
    let mut consumed = 0;
    for raw in data[..=last_newline].split_inclusive(|&b| b == b'\n') {
        if lines.len() == max_lines {
            break;
        }
        consumed += raw.len();

        let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            continue;
        }
        lines.push(String::from_utf8_lossy(raw).into_owned());
    }

    Ok((lines, position + consumed as u64))
}

/// Owns the polling thread; stops it on `stop` or drop.
pub struct TailHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TailHandle {
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the thread's stop channel
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Tail thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }
}

impl Drop for TailHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll `tailer` every `interval` on a background thread, sending events
/// until stopped or until the receiver goes away.
pub fn spawn(mut tailer: DirectoryTailer, interval: Duration, events: Sender<TailEvent>) -> TailHandle {
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

    let thread = thread::spawn(move || {
        info!(
            "Tailing '{}' in {:?} every {}ms",
            tailer.pattern.as_str(),
            tailer.directory(),
            interval.as_millis()
        );
        loop {
            match tailer.poll() {
                Ok(batch) => {
                    for event in batch {
                        if events.send(event).is_err() {
                            debug!("Event receiver dropped, stopping tail thread");
                            return;
                        }
                    }
                }
                Err(e) => warn!("Log poll failed: {}", e),
            }

            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Tail thread stopped");
    });

    TailHandle {
        stop: Some(stop_tx),
        thread: Some(thread),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::TempDir;

    fn tailer(dir: &TempDir) -> DirectoryTailer {
        DirectoryTailer::new(dir.path(), FilePattern::new("output_log_*.txt").unwrap())
    }

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().append(true).create(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn lines(events: &[TailEvent]) -> Vec<(String, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                TailEvent::Line {
                    text, source_file, ..
                } => Some((text.clone(), source_file.clone())),
                _ => None,
            })
            .collect()
    }

    fn texts(events: &[TailEvent]) -> Vec<String> {
        lines(events).into_iter().map(|(text, _)| text).collect()
    }

    #[test]
    fn test_first_poll_skips_history() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("output_log_1.txt");
        fs::write(&log, "old 1\nold 2\n").unwrap();

        let mut tailer = tailer(&dir);
        let events = tailer.poll().unwrap();
        assert!(texts(&events).is_empty());
        assert_eq!(
            events,
            vec![TailEvent::Rotated {
                previous: None,
                current: "output_log_1.txt".to_string()
            }]
        );

        append(&log, "new 1\n");
        assert_eq!(texts(&tailer.poll().unwrap()), vec!["new 1"]);
        assert!(tailer.poll().unwrap().is_empty());
    }

    #[test]
    fn test_backfill_newest_file() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("output_log_1.txt");
        fs::write(&log, "a\nb\nc\nhalf").unwrap();

        let mut tailer = tailer(&dir).with_backfill(2);
        assert_eq!(texts(&tailer.poll().unwrap()), vec!["b", "c"]);

        // The unfinished line is picked up once it is terminated
        append(&log, " done\n");
        assert_eq!(texts(&tailer.poll().unwrap()), vec!["half done"]);
    }

    #[test]
    fn test_partial_lines_wait_for_newline() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("output_log_1.txt");
        fs::write(&log, "").unwrap();
        let mut tailer = tailer(&dir);
        tailer.poll().unwrap();

        append(&log, "first\r\nsec");
        assert_eq!(texts(&tailer.poll().unwrap()), vec!["first"]);
        append(&log, "ond\n\n");
        assert_eq!(texts(&tailer.poll().unwrap()), vec!["second"]);
    }

    #[test]
    fn test_new_file_is_read_from_start_and_signals_rotation() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("output_log_1.txt");
        fs::write(&first, "old\n").unwrap();
        let mut tailer = tailer(&dir);
        tailer.poll().unwrap();

        let second = dir.path().join("output_log_2.txt");
        fs::write(&second, "fresh 1\nfresh 2\n").unwrap();
        fs::write(dir.path().join("unrelated.log"), "ignored\n").unwrap();

        let events = tailer.poll().unwrap();
        assert_eq!(
            events[0],
            TailEvent::Rotated {
                previous: Some("output_log_1.txt".to_string()),
                current: "output_log_2.txt".to_string()
            }
        );
        assert_eq!(
            lines(&events),
            vec![
                ("fresh 1".to_string(), "output_log_2.txt".to_string()),
                ("fresh 2".to_string(), "output_log_2.txt".to_string()),
            ]
        );
        assert_eq!(tailer.most_recent(), Some("output_log_2.txt"));
    }

    #[test]
    fn test_first_poll_stops_before_unfinished_line() {
        let dir = TempDir::new().unwrap();
        let older = dir.path().join("output_log_1.txt");
        let newer = dir.path().join("output_log_2.txt");
        fs::write(&older, "a\nhal").unwrap();
        fs::write(&newer, "no newline yet").unwrap();

        let mut tailer = tailer(&dir);
        tailer.poll().unwrap();

        append(&older, "f done\n");
        append(&newer, "\n");
        let mut seen = texts(&tailer.poll().unwrap());
        seen.sort();
        assert_eq!(seen, vec!["half done", "no newline yet"]);
    }

    #[test]
    fn test_vanished_file_keeps_lines_from_others() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("output_log_1.txt");
        let gone = dir.path().join("output_log_2.txt");
        fs::write(&kept, "").unwrap();
        fs::write(&gone, "").unwrap();
        let mut tailer = tailer(&dir);
        tailer.poll().unwrap();

        append(&kept, "still here\n");
        append(&gone, "never read\n");
        let mut files = tailer.discover().unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        fs::remove_file(&gone).unwrap();

        // The listing still names the deleted file; reading it fails
        let events = tailer.read_files(&files);
        assert_eq!(
            lines(&events),
            vec![("still here".to_string(), "output_log_1.txt".to_string())]
        );
        assert!(tailer.cursors.contains_key("output_log_1.txt"));
        assert!(!tailer.cursors.contains_key("output_log_2.txt"));

        assert!(tailer.poll().unwrap().is_empty());
    }

    #[test]
    fn test_truncated_file_is_reread() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("output_log_1.txt");
        fs::write(&log, "a long first line\n").unwrap();
        let mut tailer = tailer(&dir);
        tailer.poll().unwrap();

        fs::write(&log, "short\n").unwrap();
        assert_eq!(texts(&tailer.poll().unwrap()), vec!["short"]);
    }

    #[test]
    fn test_line_budget_spreads_over_polls() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("output_log_1.txt");
        fs::write(&log, "").unwrap();
        let mut tailer = tailer(&dir).with_max_lines_per_poll(2);
        tailer.poll().unwrap();

        append(&log, "1\n2\n3\n");
        assert_eq!(texts(&tailer.poll().unwrap()), vec!["1", "2"]);
        assert_eq!(texts(&tailer.poll().unwrap()), vec!["3"]);
    }

    #[test]
    fn test_missing_directory_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mut tailer = DirectoryTailer::new(
            dir.path().join("not-yet"),
            FilePattern::new("*.txt").unwrap(),
        );
        assert!(tailer.poll().unwrap().is_empty());
    }

    #[test]
    fn test_spawned_thread_delivers_lines() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("output_log_1.txt");
        fs::write(&log, "").unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut handle = spawn(tailer(&dir), Duration::from_millis(10), tx);

        // Wait for the priming poll before writing
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, TailEvent::Rotated { .. }));

        append(&log, "hello\n");
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, TailEvent::Line { ref text, .. } if text == "hello"));

        handle.stop();
        assert!(!handle.is_running());
    }
}
