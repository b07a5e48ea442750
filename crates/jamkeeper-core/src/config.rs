//! Configuration loading and typed config structures for the engine.
//!
//! The configuration lives in `jamkeeper.yaml`. Every field has a default,
//! so an empty document (or a missing file, at the binary's discretion) is
//! a valid configuration.

use std::path::{Path, PathBuf};

use jamkeeper_reducers::GameRules;
use serde::Deserialize;

/// Origin reported for documents that did not come from a file.
const INLINE_ORIGIN: &str = "<inline>";

/// Ways a jamkeeper configuration can be unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file (from `JAMKEEPER_CONFIG`, or `jamkeeper.yaml` in the
    /// working directory) could not be read.
    #[error("cannot read jamkeeper config {}: {source}", path.display())]
    Read {
        /// The file that was tried.
        path: PathBuf,
        /// Why reading it failed.
        source: std::io::Error,
    },

    /// The document is not YAML, or a section has the wrong shape, such as
    /// an unknown log format or a negative duration.
    #[error("malformed jamkeeper config {origin}: {source}")]
    Malformed {
        /// The file path, or `<inline>` for a string.
        origin: String,
        /// The deserializer's report, with line and column.
        source: serde_yml::Error,
    },

    /// A setting parsed but cannot drive a game.
    #[error("invalid jamkeeper config: {field} {reason}")]
    Invalid {
        /// Dotted path of the offending setting, e.g. `rules.jam_duration_ms`.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Top-level engine configuration, mirroring `jamkeeper.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Replay and clock settings.
    #[serde(default)]
    pub engine: ReplayConfig,

    /// Game timing rules.
    #[serde(default)]
    pub rules: GameRules,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `JAMKEEPER_LOG_LEVEL` overrides `logging.level`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, and
    /// otherwise fails like [`parse`](Self::parse).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_from(&contents, &path.display().to_string())
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Malformed`] if the string does not
    /// deserialize, or [`ConfigError::Invalid`] if a duration or limit
    /// that must be positive is zero.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse_from(yaml, INLINE_ORIGIN)
    }

    fn parse_from(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml).map_err(|source| ConfigError::Malformed {
                origin: origin.to_owned(),
                source,
            })?
        };
        config.validate()?;
        config.logging.apply_env_overrides();
        Ok(config)
    }

    /// Reject settings the clocks and replay cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("rules.period_duration_ms", self.rules.period_duration_ms),
            ("rules.jam_duration_ms", self.rules.jam_duration_ms),
            ("engine.max_keyframes", widen(self.engine.max_keyframes)),
            ("engine.max_implicit_events", widen(self.engine.max_implicit_events)),
        ];
        match positive.into_iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::Invalid {
                field,
                reason: "must be greater than zero",
            }),
            None => Ok(()),
        }
    }
}

fn widen(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Replay, keyframe, and clock settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplayConfig {
    /// Real-time milliseconds between clock ticks. Zero disables the
    /// realtime clock, for offline replay.
    #[serde(default = "default_clock_interval_ms")]
    pub clock_interval_ms: u64,

    /// Processed events between keyframe captures.
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u64,

    /// Keyframes retained per game; the oldest are evicted first.
    #[serde(default = "default_max_keyframes")]
    pub max_keyframes: usize,

    /// Implicit events one apply call may expand before it is aborted.
    #[serde(default = "default_max_implicit_events")]
    pub max_implicit_events: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            clock_interval_ms: default_clock_interval_ms(),
            keyframe_interval: default_keyframe_interval(),
            max_keyframes: default_max_keyframes(),
            max_implicit_events: default_max_implicit_events(),
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("JAMKEEPER_LOG_LEVEL") {
            self.level = val;
        }
    }
}

const fn default_clock_interval_ms() -> u64 {
    10
}

const fn default_keyframe_interval() -> u64 {
    50
}

const fn default_max_keyframes() -> usize {
    256
}

const fn default_max_implicit_events() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.engine.clock_interval_ms, 10);
        assert_eq!(config.engine.keyframe_interval, 50);
        assert_eq!(config.engine.max_keyframes, 256);
        assert_eq!(config.rules.jam_duration_ms, 120_000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
engine:
  clock_interval_ms: 20
  keyframe_interval: 10
  max_keyframes: 8
  max_implicit_events: 500

rules:
  period_duration_ms: 900000
  jam_duration_ms: 60000
  team_timeouts: 2

logging:
  format: json
";
        let config = EngineConfig::parse(yaml).unwrap();
        assert_eq!(config.engine.clock_interval_ms, 20);
        assert_eq!(config.engine.keyframe_interval, 10);
        assert_eq!(config.engine.max_keyframes, 8);
        assert_eq!(config.engine.max_implicit_events, 500);
        assert_eq!(config.rules.period_duration_ms, 900_000);
        assert_eq!(config.rules.team_timeouts, 2);
        assert_eq!(config.rules.lineup_duration_ms, 30_000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = EngineConfig::parse("engine:\n  keyframe_interval: 5\n").unwrap();
        assert_eq!(config.engine.keyframe_interval, 5);
        assert_eq!(config.engine.clock_interval_ms, 10);
        assert_eq!(config.rules, GameRules::default());
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(EngineConfig::parse("").is_ok());
    }

    #[test]
    fn invalid_yaml_is_malformed() {
        let result = EngineConfig::parse("engine: [not, a, map]");
        assert!(matches!(
            result,
            Err(ConfigError::Malformed { ref origin, .. }) if origin == "<inline>"
        ));
        let result = EngineConfig::parse("logging:\n  format: xml\n");
        assert!(matches!(result, Err(ConfigError::Malformed { .. })));
    }

    #[test]
    fn missing_file_names_its_path() {
        let path = Path::new("/nonexistent/jamkeeper.yaml");
        let err = EngineConfig::from_file(path).unwrap_err();
        assert!(matches!(&err, ConfigError::Read { path: tried, .. } if tried == path));
        assert!(err.to_string().contains("/nonexistent/jamkeeper.yaml"));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let result = EngineConfig::parse("rules:\n  jam_duration_ms: 0\n");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "rules.jam_duration_ms",
                ..
            })
        ));
        let result = EngineConfig::parse("engine:\n  max_keyframes: 0\n");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "engine.max_keyframes",
                ..
            })
        ));
    }
}
