//! The tail source: follows the log files in a directory and pushes new lines
//! to whoever holds the receiving end of the channel.

pub mod backfill;
pub mod pattern;
pub mod reader;

pub use pattern::FilePattern;
pub use reader::{spawn, DirectoryTailer, TailHandle};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    Line {
        text: String,
        source_file: String,
        timestamp: String,
    },
    /// A different file started producing lines.
    Rotated {
        previous: Option<String>,
        current: String,
    },
}

#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to read log directory {path:?}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to read metadata for {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to map {path:?}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
