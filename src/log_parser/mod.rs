pub mod colors;
pub mod detector;

pub use colors::LogColorScheme;
pub use detector::{LogLevel, LogLevelDetector};
