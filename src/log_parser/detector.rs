use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Unknown,
}

impl LogLevel {
    /// Severity for ordering, higher is worse
    pub fn severity(&self) -> u8 {
        match self {
            LogLevel::Unknown => 0,
            LogLevel::Debug => 1,
            LogLevel::Info => 2,
            LogLevel::Warn => 3,
            LogLevel::Error => 4,
            LogLevel::Fatal => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DBG",
            LogLevel::Info => "INF",
            LogLevel::Warn => "WRN",
            LogLevel::Error => "ERR",
            LogLevel::Fatal => "EXC",
            LogLevel::Unknown => "   ",
        }
    }
}

struct LevelPattern {
    regex: Regex,
    level: LogLevel,
}

// Client logs write "2026.01.02 06:44:07 Warning    -  message"; the
// bracketed and colon forms cover plugin and launcher output.
static PATTERNS: Lazy<Vec<(&str, LogLevel)>> = Lazy::new(|| {
    vec![
        (r"^\d{4}\.\d{2}\.\d{2} \d{2}:\d{2}:\d{2} Debug\s+-", LogLevel::Debug),
        (r"^\d{4}\.\d{2}\.\d{2} \d{2}:\d{2}:\d{2} Log\s+-", LogLevel::Info),
        (r"^\d{4}\.\d{2}\.\d{2} \d{2}:\d{2}:\d{2} Warning\s+-", LogLevel::Warn),
        (r"^\d{4}\.\d{2}\.\d{2} \d{2}:\d{2}:\d{2} Error\s+-", LogLevel::Error),
        (r"^\d{4}\.\d{2}\.\d{2} \d{2}:\d{2}:\d{2} Exception\s+-", LogLevel::Fatal),
        (r"\[(?:FATAL|CRITICAL)\]", LogLevel::Fatal),
        (r"\[ERROR\]", LogLevel::Error),
        (r"\[WARN(?:ING)?\]", LogLevel::Warn),
        (r"\[INFO\]", LogLevel::Info),
        (r"\[DEBUG\]", LogLevel::Debug),
        (r"(?i)\b(?:fatal|critical):", LogLevel::Fatal),
        (r"(?i)\berror:", LogLevel::Error),
        (r"(?i)\bwarn(?:ing)?:", LogLevel::Warn),
        (r"(?i)\binfo:", LogLevel::Info),
        (r"(?i)\bdebug:", LogLevel::Debug),
    ]
});

pub struct LogLevelDetector {
    patterns: Vec<LevelPattern>,
}

impl LogLevelDetector {
    pub fn new() -> Self {
        let patterns = PATTERNS
            .iter()
            .filter_map(|(pattern, level)| {
                Regex::new(pattern).ok().map(|regex| LevelPattern {
                    regex,
                    level: *level,
                })
            })
            .collect();

        Self { patterns }
    }

    /// First matching pattern wins
    pub fn detect(&self, line: &str) -> LogLevel {
        self.patterns
            .iter()
            .find(|pattern| pattern.regex.is_match(line))
            .map_or(LogLevel::Unknown, |pattern| pattern.level)
    }
}

impl Default for LogLevelDetector {
    fn default() -> Self {
        Self::new()
    }
}
