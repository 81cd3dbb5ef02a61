use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::AppError;

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["server", "ffmpeg", "source", "process", "logging"];

const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 30;
const DEFAULT_CRASH_THRESHOLD: u32 = 3;
const DEFAULT_CRASH_WINDOW_SECONDS: u64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub ffmpeg: FfmpegConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FfmpegConfig {
    pub video_codec: String,
    #[serde(default)]
    pub audio_codec: Option<String>,
    pub bitrate: String,
    pub framerate: u32,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub tune: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Screen,
    Window {
        title: String,
        #[serde(default)]
        class: Option<String>,
    },
    WindowRegion {
        title: String,
        #[serde(default)]
        class: Option<String>,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    WindowBg {
        title: String,
        #[serde(default)]
        class: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    #[serde(default = "default_crash_threshold")]
    pub crash_threshold: u32,
    #[serde(default = "default_crash_window_seconds")]
    pub crash_window: u64,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_timeout: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            crash_threshold: default_crash_threshold(),
            crash_window: default_crash_window_seconds(),
            shutdown_timeout: default_shutdown_grace_seconds(),
        }
    }
}

fn default_crash_threshold() -> u32 {
    DEFAULT_CRASH_THRESHOLD
}

fn default_crash_window_seconds() -> u64 {
    DEFAULT_CRASH_WINDOW_SECONDS
}

fn default_shutdown_grace_seconds() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECONDS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// `tracing`'s filter directive for this level.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "error",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Config {
    /// Load and validate a config file at `path`.
    ///
    /// Validation is an explicit, hand-written schema check over the raw
    /// JSON value (unknown top-level keys are rejected) followed by a typed
    /// `serde_json` deserialization. No external schema-validation crate is
    /// used; field-level defaults are supplied via `serde(default = ...)`.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path).map_err(|error| AppError::ConfigInvalid {
            path: path.to_path_buf(),
            detail: format!("failed to read config file: {error}"),
        })?;

        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, AppError> {
        let raw: serde_json::Value =
            serde_json::from_str(contents).map_err(|error| AppError::ConfigInvalid {
                path: path.to_path_buf(),
                detail: format!("invalid JSON: {error}"),
            })?;

        if let serde_json::Value::Object(map) = &raw {
            for key in map.keys() {
                if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
                    return Err(AppError::ConfigInvalid {
                        path: path.to_path_buf(),
                        detail: format!("unknown configuration key `{key}`"),
                    });
                }
            }
        } else {
            return Err(AppError::ConfigInvalid {
                path: path.to_path_buf(),
                detail: "top-level configuration must be a JSON object".into(),
            });
        }

        serde_json::from_value(raw).map_err(|error| AppError::ConfigInvalid {
            path: path.to_path_buf(),
            detail: error.to_string(),
        })
    }

    pub fn shutdown_grace_seconds(&self) -> u64 {
        self.process.shutdown_timeout
    }

    pub fn crash_threshold(&self) -> u32 {
        self.process.crash_threshold
    }

    pub fn crash_window_seconds(&self) -> u64 {
        self.process.crash_window
    }

    /// Effective logging level: `LOG_LEVEL` env var overrides the configured
    /// value, per the CLI's documented environment surface.
    pub fn effective_log_level(&self) -> LogLevel {
        match std::env::var("LOG_LEVEL").ok().as_deref() {
            Some("DEBUG") => LogLevel::Debug,
            Some("INFO") => LogLevel::Info,
            Some("WARNING") => LogLevel::Warning,
            Some("ERROR") => LogLevel::Error,
            Some("CRITICAL") => LogLevel::Critical,
            _ => self.logging.level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "server": { "host": "0.0.0.0", "port": 8080 },
        "ffmpeg": { "video_codec": "libx264", "bitrate": "2M", "framerate": 30 },
        "source": { "type": "screen" }
    }"#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = Config::parse(MINIMAL, Path::new("config.json")).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.shutdown_grace_seconds(), DEFAULT_SHUTDOWN_GRACE_SECONDS);
        assert_eq!(config.crash_threshold(), DEFAULT_CRASH_THRESHOLD);
        assert_eq!(config.crash_window_seconds(), DEFAULT_CRASH_WINDOW_SECONDS);
        assert!(matches!(config.source, SourceConfig::Screen));
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let bad = r#"{
            "server": { "host": "0.0.0.0", "port": 8080 },
            "ffmpeg": { "video_codec": "libx264", "bitrate": "2M", "framerate": 30 },
            "source": { "type": "screen" },
            "bogus": {}
        }"#;
        let err = Config::parse(bad, Path::new("config.json")).unwrap_err();
        match err {
            AppError::ConfigInvalid { detail, .. } => assert!(detail.contains("bogus")),
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_object_top_level() {
        let err = Config::parse("[]", Path::new("config.json")).unwrap_err();
        assert!(matches!(err, AppError::ConfigInvalid { .. }));
    }

    #[test]
    fn parses_window_region_source() {
        let contents = r#"{
            "server": { "host": "0.0.0.0", "port": 8080 },
            "ffmpeg": { "video_codec": "libx264", "bitrate": "2M", "framerate": 30 },
            "source": { "type": "window_region", "title": "Terminal", "x": 0, "y": 0, "width": 1280, "height": 720 }
        }"#;
        let config = Config::parse(contents, Path::new("config.json")).unwrap();
        match config.source {
            SourceConfig::WindowRegion { width, height, .. } => {
                assert_eq!(width, 1280);
                assert_eq!(height, 720);
            }
            other => panic!("expected WindowRegion, got {other:?}"),
        }
    }

    #[test]
    fn explicit_process_overrides_defaults() {
        let contents = r#"{
            "server": { "host": "0.0.0.0", "port": 8080 },
            "ffmpeg": { "video_codec": "libx264", "bitrate": "2M", "framerate": 30 },
            "source": { "type": "screen" },
            "process": { "crash_threshold": 5, "crash_window": 120, "shutdown_timeout": 10 }
        }"#;
        let config = Config::parse(contents, Path::new("config.json")).unwrap();
        assert_eq!(config.crash_threshold(), 5);
        assert_eq!(config.crash_window_seconds(), 120);
        assert_eq!(config.shutdown_grace_seconds(), 10);
    }
}
