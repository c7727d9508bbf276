//! Runtime configuration
//!
//! Loaded from TOML once per process, either explicitly through `install` or
//! by `typthon_ffi::init()` from the file named in `TYPTHON_FFI_CONFIG`.
//! Without either, defaults apply.

use crate::error::{FfiError, Result};
use crate::logging::{parse_level, LogConfig};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::Path;

static CONFIG: OnceCell<FfiConfig> = OnceCell::new();

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FfiConfig {
    pub logging: LoggingSection,
    pub trampolines: TrampolineSection,
    pub calls: CallSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
    pub file: Option<String>,
    pub spans: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            file: None,
            spans: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrampolineSection {
    /// Slots per pool growth step; one page worth when unset
    pub slots_per_batch: Option<usize>,
    /// Batches allocated when the pool is first used
    pub prealloc_batches: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CallSection {
    /// Default for `SignatureOptions::save_errno`
    pub save_errno: bool,
    /// How often a parked blocking caller checks for interrupts
    pub blocking_poll_ms: u64,
}

impl Default for CallSection {
    fn default() -> Self {
        Self {
            save_errno: true,
            blocking_poll_ms: 10,
        }
    }
}

impl FfiConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| FfiError::argument(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            FfiError::runtime(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    fn validate(&self) -> Result<()> {
        if parse_level(&self.logging.level).is_none() {
            return Err(FfiError::argument(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        if self.trampolines.slots_per_batch == Some(0) {
            return Err(FfiError::argument("slots_per_batch must be positive"));
        }
        Ok(())
    }

    /// Logging settings, with environment variables taking precedence
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig {
            level: parse_level(&self.logging.level).unwrap_or(tracing::Level::INFO),
            file_output: self.logging.file.is_some(),
            log_path: self.logging.file.clone(),
            json_format: self.logging.json,
            show_spans: self.logging.spans,
            ..LogConfig::default()
        };
        let env = LogConfig::from_env();
        if std::env::var("TYPTHON_FFI_LOG_LEVEL").is_ok() {
            config.level = env.level;
        }
        if env.file_output {
            config.file_output = true;
            config.log_path = env.log_path;
        }
        config.json_format |= env.json_format;
        config.show_spans |= env.show_spans;
        config.track_performance = env.track_performance;
        config
    }
}

/// Install the process configuration
///
/// Fails once a configuration is in place, including the defaults picked up
/// by an earlier `get`.
pub fn install(config: FfiConfig) -> Result<()> {
    CONFIG
        .set(config)
        .map_err(|_| FfiError::runtime("configuration already installed"))
}

/// Current configuration, defaults when none was installed
pub fn get() -> &'static FfiConfig {
    CONFIG.get_or_init(FfiConfig::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FfiConfig::default();
        assert!(config.calls.save_errno);
        assert_eq!(config.calls.blocking_poll_ms, 10);
        assert_eq!(config.trampolines.slots_per_batch, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml() {
        let config = FfiConfig::from_toml_str(
            r#"
            [trampolines]
            slots_per_batch = 16

            [calls]
            save_errno = false
            "#,
        )
        .unwrap();
        assert_eq!(config.trampolines.slots_per_batch, Some(16));
        assert_eq!(config.trampolines.prealloc_batches, 0);
        assert!(!config.calls.save_errno);
        assert_eq!(config.calls.blocking_poll_ms, 10);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(FfiConfig::from_toml_str("[logging]\nlevel = \"loud\"").is_err());
        assert!(FfiConfig::from_toml_str("[trampolines]\nslots_per_batch = 0").is_err());
        assert!(FfiConfig::from_toml_str("[calls]\nretries = 3").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\njson = true").unwrap();

        let config = FfiConfig::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FfiConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Runtime);
    }
}
