//! Configuration management for the booking agent
//!
//! Supports loading configuration from:
//! - TOML file (`frontdesk.toml`, optional)
//! - Environment variables (FRONTDESK_ prefix, `__` separator)

pub mod settings;

pub use settings::{
    load_settings, AsrSettings, LlmSettings, ServerSettings, Settings, TimerSettings, TtsSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
