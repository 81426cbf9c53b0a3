use crate::buffer::{Retention, RotationPolicy, MAX_RETAINED};
use crate::log_parser::LogColorScheme;
use crate::search::DEFAULT_CHUNK_SIZE;
use crate::theme::Theme;
use crate::view::ViewSettings;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a config directory (neither HOME nor APPDATA is set)")]
    NoConfigDir,
    #[error("failed to create config directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the log files; the platform default when unset
    pub log_directory: Option<PathBuf>,
    pub file_pattern: String,
    pub poll_interval_ms: u64,
    pub max_retained_lines: usize,
    pub max_retained_bytes: Option<usize>,
    pub rotation: RotationPolicy,
    pub search_debounce_ms: u64,
    pub search_chunk_size: usize,
    /// Lines of history shown from the newest file at startup
    pub backfill_lines: usize,
    pub font_size: f32,
    pub theme: Theme,
    pub colors: LogColorScheme,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_directory: None,
            file_pattern: "output_log_*.txt".to_string(),
            poll_interval_ms: 1000,
            max_retained_lines: MAX_RETAINED,
            max_retained_bytes: None,
            rotation: RotationPolicy::default(),
            search_debounce_ms: 400,
            search_chunk_size: DEFAULT_CHUNK_SIZE,
            backfill_lines: 200,
            font_size: 13.0,
            theme: Theme::default(),
            colors: LogColorScheme::default(),
        }
    }
}

impl Config {
    /// Get the config file path (~/.config/log-explorer/config.yaml)
    pub fn config_path() -> Option<PathBuf> {
        let base = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config"))
            .or_else(|| std::env::var_os("APPDATA").map(PathBuf::from))?;
        Some(base.join("log-explorer").join("config.yaml"))
    }

    /// Load config from the default location, falling back to defaults on
    /// any problem.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            warn!("No config directory available, using defaults");
            return Self::default();
        };

        if !path.exists() {
            info!("Config file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => {
                info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                warn!("{}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let yaml = serde_yaml::to_string(self).map_err(ConfigError::Serialize)?;
        fs::write(path, yaml).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Write an example config file with every field spelled out
    pub fn create_example() -> Result<PathBuf, ConfigError> {
        let example = Config {
            log_directory: Self::default_log_directory(),
            max_retained_bytes: Some(4 * 1024 * 1024),
            ..Config::default()
        };
        example.save()
    }

    /// VRChat writes its logs to `%LOCALAPPDATA%\..\LocalLow\VRChat\VRChat`.
    pub fn default_log_directory() -> Option<PathBuf> {
        let local = PathBuf::from(std::env::var_os("LOCALAPPDATA")?);
        let app_data = local.parent()?;
        Some(app_data.join("LocalLow").join("VRChat").join("VRChat"))
    }

    /// The configured directory, else the platform default, else the
    /// working directory.
    pub fn resolved_log_directory(&self) -> PathBuf {
        self.log_directory
            .clone()
            .or_else(Self::default_log_directory)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }

    pub fn view_settings(&self) -> ViewSettings {
        ViewSettings {
            retention: Retention {
                max_lines: self.max_retained_lines.max(1),
                max_bytes: self.max_retained_bytes,
            },
            rotation: self.rotation,
            debounce: Duration::from_millis(self.search_debounce_ms),
            chunk_size: self.search_chunk_size.max(1),
        }
    }
}
