//! Configuration module for phaseflow
//!
//! An [`EngineConfig`] bundles the memory budget, the parallel wrapper
//! defaults and logging options. It can be stored as TOML or JSON; the
//! format is chosen from the file extension (`.json` for JSON, anything
//! else is TOML).
//!
//! # Config Location
//!
//! The default config file lives in the platform config directory:
//! - **Linux**: `~/.config/phaseflow/config.toml`
//! - **macOS**: `~/Library/Application Support/phaseflow/config.toml`
//! - **Windows**: `%APPDATA%\phaseflow\config.toml`
//!
//! # Example
//!
//! ```ignore
//! use phaseflow::config::EngineConfig;
//!
//! let config = EngineConfig::load_or_default("phaseflow.toml");
//! pipeline.run_with_config(&config)?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{PhaseflowError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "phaseflow";

/// Default config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Toml,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Memory budget settings
    #[serde(default)]
    pub memory: MemorySettings,

    /// Parallel wrapper defaults
    #[serde(default)]
    pub parallel: ParallelSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl EngineConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PhaseflowError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config = match Format::of(path) {
            Format::Json => serde_json::from_str(&content).map_err(|e| {
                PhaseflowError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
            Format::Toml => toml::from_str(&content).map_err(|e| {
                PhaseflowError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
        };
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load a config file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Using default config: {}", e);
                Self::default()
            }
        }
    }

    /// Save the config to disk
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PhaseflowError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = match Format::of(path) {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, content).map_err(|e| {
            PhaseflowError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::OrderMode;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::of(Path::new("a.json")), Format::Json);
        assert_eq!(Format::of(Path::new("a.JSON")), Format::Json);
        assert_eq!(Format::of(Path::new("a.toml")), Format::Toml);
        assert_eq!(Format::of(Path::new("config")), Format::Toml);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [parallel]
            workers = 2
            order = "arbitrary"
            "#,
        )
        .unwrap();
        assert_eq!(config.parallel.workers, 2);
        assert_eq!(config.parallel.order, OrderMode::Arbitrary);
        assert_eq!(config.parallel.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.memory.budget_bytes, DEFAULT_BUDGET_BYTES);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_default_path_ends_with_config_file() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with(Path::new(APP_ID).join(CONFIG_FILE)));
        }
    }
}
