//! Configuration Loader
//!
//! Layers the built-in defaults, an optional TOML file and `DEXPILOT__*`
//! environment variables (e.g. `DEXPILOT__RADAR__SCAN_INTERVAL_SECS=60`),
//! then validates every section.

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::application::execution_engine::ExecutionConfig;
use crate::application::performance_tracker::TrackerConfig;
use crate::application::radar::RadarConfig;
use crate::application::risk_manager::validate_parameters;
use crate::domain::{RiskParameterOverrides, RiskParameters, RiskTolerance};
use crate::strategy::{EngineSettings, StrategySet};

pub const ENV_PREFIX: &str = "DEXPILOT";

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub strategies: StrategySet,
    pub engine: EngineSettings,
    pub risk: RiskSection,
    pub radar: RadarConfig,
    pub execution: ExecutionConfig,
    pub tracker: TrackerConfig,
    pub storage: StorageSection,
    pub logging: LoggingSection,
}

/// Risk preset plus per-field overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSection {
    pub tolerance: RiskTolerance,
    pub overrides: RiskParameterOverrides,
}

impl RiskSection {
    pub fn parameters(&self) -> RiskParameters {
        RiskParameters::preset(self.tolerance).merged(&self.overrides)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackend,
    /// `~` and `$VARS` are expanded
    pub data_dir: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: "~/.dexpilot".to_string(),
        }
    }
}

impl StorageSection {
    pub fn resolved_data_dir(&self) -> Result<PathBuf, ConfigError> {
        let expanded = shellexpand::full(&self.data_dir)
            .map_err(|e| ConfigError::ValidationError(format!("cannot expand data_dir '{}': {}", self.data_dir, e)))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

/// Logging configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] ::config::ConfigError),
    #[error("Failed to render TOML: {0}")]
    RenderError(#[from] toml::ser::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration; a missing file is only an error when a path was given explicitly
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )));
        }
        builder = builder.add_source(File::from(path).format(FileFormat::Toml));
    }

    let config: AppConfig = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("__").separator("__").try_parsing(true))
        .build()?
        .try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Render the defaults as a commented TOML document
pub fn default_config_toml() -> Result<String, ConfigError> {
    let body = toml::to_string_pretty(&AppConfig::default())?;
    Ok(format!(
        "# dexpilot configuration\n# Every key may be overridden with {}__<SECTION>__<KEY> environment variables.\n\n{}",
        ENV_PREFIX, body
    ))
}

/// Write the default configuration, refusing to overwrite an existing file
pub fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Err(ConfigError::ValidationError(format!("{} already exists", path.display())));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, default_config_toml()?)?;
    Ok(())
}

impl AppConfig {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |e: &dyn std::fmt::Display| ConfigError::ValidationError(e.to_string());

        self.strategies.validate().map_err(|e| invalid(&e))?;
        self.engine.periods.validate().map_err(|e| invalid(&e))?;
        if self.engine.history_length < self.engine.periods.required_bars() {
            return Err(ConfigError::ValidationError(format!(
                "engine.history_length must be >= {}, got {}",
                self.engine.periods.required_bars(),
                self.engine.history_length
            )));
        }
        if self.engine.plan_ttl_bars == 0 {
            return Err(ConfigError::ValidationError("engine.plan_ttl_bars must be > 0".to_string()));
        }

        validate_parameters(&self.risk.parameters()).map_err(|e| invalid(&e))?;
        self.radar.validate().map_err(|e| invalid(&e))?;
        self.execution.validate().map_err(|e| invalid(&e))?;
        self.tracker.validate().map_err(|e| invalid(&e))?;

        if self.storage.data_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError("storage.data_dir cannot be empty".to_string()));
        }
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of {:?}, got '{}'",
                LEVELS, self.logging.level
            )));
        }
        Ok(())
    }
}
