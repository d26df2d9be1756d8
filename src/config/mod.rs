//! Configuration Module
//!
//! Loads and validates configuration from TOML files and the environment.

pub mod loader;

pub use loader::{
    default_config_toml, load_config, write_default_config, AppConfig, ConfigError, LoggingSection, RiskSection,
    StorageBackend, StorageSection, ENV_PREFIX,
};
