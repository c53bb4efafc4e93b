use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RestackError, Result};

/// Environment variable pointing at an alternative config file.
pub const CONFIG_ENV: &str = "RESTACK_CONFIG";

/// Restack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestackConfig {
    /// Local image store directory
    pub store_dir: PathBuf,

    /// Maximum total size of the local image store in bytes
    pub store_max_size: u64,

    /// Parent directory for scratch directories used while merging layers
    pub scratch_dir: PathBuf,

    /// Gzip level for newly created layers (0-9)
    pub compression_level: u32,

    /// Author recorded on history entries of combined layers
    pub combined_author: String,

    /// Comment recorded on history entries of combined layers
    pub combined_comment: String,

    /// Separator between the created-by lines of combined layers
    pub created_by_separator: String,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for RestackConfig {
    fn default() -> Self {
        Self {
            store_dir: home_dir().join("images"),
            store_max_size: 10 * 1024 * 1024 * 1024,
            scratch_dir: std::env::temp_dir(),
            compression_level: 6,
            combined_author: "restack".to_string(),
            combined_comment: "combined layers".to_string(),
            created_by_separator: ", ".to_string(),
            log_level: LogLevel::Warn,
        }
    }
}

impl RestackConfig {
    /// Load configuration from a YAML file.
    ///
    /// A missing file yields the defaults; fields absent from the file keep
    /// their default values.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            RestackError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            RestackError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `$RESTACK_CONFIG` or `~/.restack/config.yaml`.
    pub fn discover() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir().join("config.yaml"));
        Self::load(&path)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(RestackError::ConfigError(format!(
                "compression_level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }
}

/// Restack home directory (`~/.restack`).
fn home_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".restack"))
        .unwrap_or_else(|| PathBuf::from(".restack"))
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RestackConfig::default();
        assert_eq!(config.compression_level, 6);
        assert_eq!(config.combined_author, "restack");
        assert_eq!(config.combined_comment, "combined layers");
        assert_eq!(config.created_by_separator, ", ");
        assert_eq!(config.log_level, LogLevel::Warn);
        assert!(config.store_dir.ends_with(".restack/images"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = RestackConfig::load(&tmp.path().join("absent.yaml")).unwrap();
        assert_eq!(config.compression_level, 6);
    }

    #[test]
    fn test_load_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(
            &path,
            "compression_level: 9\ncombined_author: ci\nlog_level: debug\n",
        )
        .unwrap();

        let config = RestackConfig::load(&path).unwrap();
        assert_eq!(config.compression_level, 9);
        assert_eq!(config.combined_author, "ci");
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.combined_comment, "combined layers");
    }

    #[test]
    fn test_load_rejects_bad_compression_level() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "compression_level: 12\n").unwrap();

        let err = RestackConfig::load(&path).unwrap_err();
        assert!(matches!(err, RestackError::ConfigError(_)));
        assert!(err.to_string().contains("between 0 and 9"));
    }

    #[test]
    fn test_load_rejects_malformed_yaml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "compression_level: [oops\n").unwrap();

        assert!(matches!(
            RestackConfig::load(&path),
            Err(RestackError::ConfigError(_))
        ));
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(tracing::Level::from(LogLevel::Debug), tracing::Level::DEBUG);
        assert_eq!(tracing::Level::from(LogLevel::Error), tracing::Level::ERROR);
        assert_eq!(LogLevel::Info.to_string(), "info");
    }
}
