//! Configuration loading and validation.

mod loader;
mod types;
mod validate;

use thiserror::Error;

pub use loader::{load_config, load_config_from_str};
pub use types::{
    AuthConfig, AuthMethod, Config, DatabaseConfig, QueueConfig, SanitizedAuthConfig,
    SanitizedConfig, ServerConfig,
};
pub use validate::validate_config;

/// Error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file does not exist.
    #[error("config file not found: {0}")]
    FileNotFound(String),

    /// Config file could not be parsed.
    #[error("config parse error: {0}")]
    ParseError(String),

    /// Config values are inconsistent.
    #[error("config validation error: {0}")]
    ValidationError(String),
}
