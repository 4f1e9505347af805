//! # Ledger Configuration
//!
//! Settings for the engine: where the database lives, how conflicts are
//! retried, and how long valuation snapshots are cached.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     LEDGER_DB_PATH=/var/lib/ledger/ledger.db                           │
//! │     LEDGER_RETRY_MAX_ATTEMPTS=8                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stock-ledger/ledger.toml (Linux)                         │
//! │     ~/Library/Application Support/com.ledger.stock-ledger/ (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # ledger.toml
//! [database]
//! path = "./ledger.db"
//! max_connections = 5
//! busy_timeout_ms = 250
//!
//! [retry]
//! max_attempts = 5
//! initial_backoff_ms = 10
//! max_backoff_ms = 200
//!
//! [references]
//! max_attempts = 8
//!
//! [valuation]
//! cache_ttl_secs = 30
//! ```

use std::path::PathBuf;
use std::time::Duration;

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use ledger_db::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

/// Where the SQLite file lives and how the pool is sized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite file. `:memory:` is accepted for tests.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection before giving up.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// How long SQLite waits on a locked database before reporting busy.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./ledger.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_busy_timeout() -> u64 {
    250
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Automatic retry of units of work that lost an optimistic-version race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first. `1` disables retrying.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    10
}

fn default_max_backoff() -> u64 {
    200
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl RetrySettings {
    /// Backoff schedule for one operation. Attempts are bounded by
    /// `max_attempts`, not by elapsed time.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_backoff_ms),
            max_interval: Duration::from_millis(self.max_backoff_ms),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Reference Settings
// =============================================================================

/// Generation of deposit references and document numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSettings {
    /// Random suffixes tried before giving up on a unique reference.
    #[serde(default = "default_reference_attempts")]
    pub max_attempts: u32,
}

fn default_reference_attempts() -> u32 {
    8
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        ReferenceSettings {
            max_attempts: default_reference_attempts(),
        }
    }
}

// =============================================================================
// Valuation Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationSettings {
    /// How long a valuation snapshot is served from cache. `0` disables it.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Default window for movement and return timelines.
    #[serde(default = "default_timeline_days")]
    pub timeline_days: u32,
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_timeline_days() -> u32 {
    30
}

impl Default for ValuationSettings {
    fn default() -> Self {
        ValuationSettings {
            cache_ttl_secs: default_cache_ttl(),
            timeline_days: default_timeline_days(),
        }
    }
}

// =============================================================================
// Main Config
// =============================================================================

/// Complete engine configuration.
///
/// ## Example
/// ```toml
/// [database]
/// path = "/var/lib/ledger/ledger.db"
///
/// [retry]
/// max_attempts = 8
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub references: ReferenceSettings,

    #[serde(default)]
    pub valuation: ValuationSettings,
}

impl LedgerConfig {
    /// Configuration for tests: in-memory database, fast retries, no cache.
    pub fn in_memory() -> Self {
        LedgerConfig {
            database: DatabaseSettings {
                path: PathBuf::from(":memory:"),
                max_connections: 1,
                ..DatabaseSettings::default()
            },
            retry: RetrySettings {
                max_attempts: 5,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
            },
            references: ReferenceSettings::default(),
            valuation: ValuationSettings {
                cache_ttl_secs: 0,
                ..ValuationSettings::default()
            },
        }
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (ledger.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load ledger config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ConfigError::SaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        info!(?path, "Ledger config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid(format!(
                "database.min_connections ({}) exceeds max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }

        if self.references.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "references.max_attempts must be at least 1".into(),
            ));
        }

        if self.valuation.timeline_days == 0 {
            return Err(ConfigError::Invalid(
                "valuation.timeline_days must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Applies `LEDGER_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup. Unparseable values are logged
    /// and ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("LEDGER_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(max) = lookup("LEDGER_DB_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %max, "Ignoring invalid LEDGER_DB_MAX_CONNECTIONS"),
            }
        }

        if let Some(busy) = lookup("LEDGER_DB_BUSY_TIMEOUT_MS") {
            match busy.parse::<u64>() {
                Ok(ms) => self.database.busy_timeout_ms = ms,
                Err(_) => warn!(value = %busy, "Ignoring invalid LEDGER_DB_BUSY_TIMEOUT_MS"),
            }
        }

        if let Some(attempts) = lookup("LEDGER_RETRY_MAX_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(n) => {
                    debug!(attempts = n, "Overriding retry attempts from environment");
                    self.retry.max_attempts = n;
                }
                Err(_) => warn!(value = %attempts, "Ignoring invalid LEDGER_RETRY_MAX_ATTEMPTS"),
            }
        }

        if let Some(ttl) = lookup("LEDGER_VALUATION_CACHE_TTL_SECS") {
            match ttl.parse::<u64>() {
                Ok(secs) => self.valuation.cache_ttl_secs = secs,
                Err(_) => warn!(value = %ttl, "Ignoring invalid LEDGER_VALUATION_CACHE_TTL_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "ledger", "stock-ledger")
            .map(|dirs| dirs.config_dir().join("ledger.toml"))
    }

    /// Pool configuration for [`ledger_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        let base = if self.database.path.as_os_str() == ":memory:" {
            DbConfig::in_memory()
        } else {
            DbConfig::new(&self.database.path)
                .max_connections(self.database.max_connections)
                .min_connections(self.database.min_connections)
        };

        base.connect_timeout(Duration::from_secs(self.database.acquire_timeout_secs))
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    /// Cache lifetime for valuation snapshots.
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.valuation.cache_ttl_secs as i64)
    }
}
