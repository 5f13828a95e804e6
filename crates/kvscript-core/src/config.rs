//! Script engine configuration.
//!
//! Loaded from the `[script]` table of a TOML file; every field is optional
//! and falls back to its default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sandbox::EngineLimits;

/// Upper bound for `max_call_levels`. Deeper recursion overflows the
/// blocking worker's stack, which aborts the process.
pub const MAX_CALL_LEVELS_CEILING: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Wall-clock budget per execution.
    pub max_execution_time_ms: u64,
    pub cache_enabled: bool,
    pub cache_max_entries: usize,
    /// Case-insensitive substrings that reject a script outright.
    pub forbidden_patterns: Vec<String>,
    /// Interpreter operation cap per run (0 = unlimited).
    pub max_operations: u64,
    pub max_call_levels: usize,
    /// Largest string a script may build, in bytes.
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 5000,
            cache_enabled: true,
            cache_max_entries: crate::cache::DEFAULT_CAPACITY,
            forbidden_patterns: ["FLUSHALL", "FLUSHDB", "DEL *", "CONFIG"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_operations: 0,
            max_call_levels: EngineLimits::default().max_call_levels,
            max_string_size: EngineLimits::default().max_string_size,
            max_array_size: EngineLimits::default().max_array_size,
            max_map_size: EngineLimits::default().max_map_size,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    script: ScriptConfig,
}

impl ScriptConfig {
    /// Parse the `[script]` table of a TOML document. A document without
    /// one yields the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.script.validate()?;
        Ok(file.script)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_execution_time_ms == 0 {
            return Err(ConfigError::Invalid(
                "max_execution_time_ms must be greater than 0".into(),
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache_max_entries must be at least 1".into(),
            ));
        }
        if !(1..=MAX_CALL_LEVELS_CEILING).contains(&self.max_call_levels) {
            return Err(ConfigError::Invalid(format!(
                "max_call_levels must be between 1 and {MAX_CALL_LEVELS_CEILING}"
            )));
        }
        for (name, value) in [
            ("max_string_size", self.max_string_size),
            ("max_array_size", self.max_array_size),
            ("max_map_size", self.max_map_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }

    pub fn engine_limits(&self) -> EngineLimits {
        EngineLimits {
            max_operations: self.max_operations,
            max_call_levels: self.max_call_levels,
            max_string_size: self.max_string_size,
            max_array_size: self.max_array_size,
            max_map_size: self.max_map_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ScriptConfig::default();
        assert_eq!(cfg.max_execution_time(), Duration::from_secs(5));
        assert!(cfg.cache_enabled);
        assert_eq!(cfg.cache_max_entries, 100);
        assert_eq!(
            cfg.forbidden_patterns,
            vec!["FLUSHALL", "FLUSHDB", "DEL *", "CONFIG"]
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_table_keeps_defaults() {
        let cfg = ScriptConfig::from_toml_str(
            r#"
            [script]
            max_execution_time_ms = 250
            forbidden_patterns = ["SHUTDOWN"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_execution_time_ms, 250);
        assert_eq!(cfg.forbidden_patterns, vec!["SHUTDOWN"]);
        assert!(cfg.cache_enabled);
        assert_eq!(cfg.cache_max_entries, 100);
    }

    #[test]
    fn test_missing_table_is_default() {
        let cfg = ScriptConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ScriptConfig::default());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = ScriptConfig::from_toml_str("[script]\nmax_execution_time_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let cfg = ScriptConfig {
            cache_max_entries: 0,
            ..ScriptConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = ScriptConfig::from_toml_str("[script\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ScriptConfig::load("/nonexistent/kvscript.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_engine_limits() {
        let cfg = ScriptConfig {
            max_operations: 10_000,
            max_call_levels: 16,
            max_string_size: 4096,
            ..ScriptConfig::default()
        };
        assert_eq!(
            cfg.engine_limits(),
            EngineLimits {
                max_operations: 10_000,
                max_call_levels: 16,
                max_string_size: 4096,
                max_array_size: 100_000,
                max_map_size: 100_000,
            }
        );
    }

    #[test]
    fn test_size_limits_default_to_finite_values() {
        let cfg = ScriptConfig::default();
        assert_eq!(cfg.max_string_size, 1024 * 1024);
        assert_eq!(cfg.max_array_size, 100_000);
        assert_eq!(cfg.max_map_size, 100_000);
    }

    #[test]
    fn test_zero_size_limit_rejected() {
        let err = ScriptConfig::from_toml_str("[script]\nmax_array_size = 0").unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("max_array_size")),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_call_levels_ceiling() {
        let at_ceiling = ScriptConfig {
            max_call_levels: MAX_CALL_LEVELS_CEILING,
            ..ScriptConfig::default()
        };
        assert!(at_ceiling.validate().is_ok());

        let err = ScriptConfig::from_toml_str("[script]\nmax_call_levels = 1000000").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
