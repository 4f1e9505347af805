//! # Engine Error Types
//!
//! Business operations return [`ledger_core::LedgerError`]. The only error
//! that is local to this crate is configuration loading, which happens
//! before any engine exists.

use thiserror::Error;

use ledger_core::LedgerError;

/// Result type for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors while loading, validating or saving `ledger.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting has an unusable value.
    #[error("Invalid ledger configuration: {0}")]
    Invalid(String),

    /// The file could not be read or parsed.
    #[error("Failed to load config: {0}")]
    LoadFailed(String),

    /// The file could not be written.
    #[error("Failed to save config: {0}")]
    SaveFailed(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::SaveFailed(err.to_string())
    }
}

/// A broken configuration at startup is an operator problem, surfaced the
/// same way as any other store failure.
impl From<ConfigError> for LedgerError {
    fn from(err: ConfigError) -> Self {
        LedgerError::Persistence(err.to_string())
    }
}
