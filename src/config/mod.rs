//! # Dispatch Configuration
//!
//! Typed configuration for the dispatch core. Every section has defaults so a
//! bare deployment works; files and environment variables only override.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dispatch_core::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().load()?;
//! let buffer = config.scheduling.buffer();
//! let sweep_every = config.reconciliation.interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Delivery-time trigger settings
    pub scheduling: SchedulingConfig,

    /// Fallback trigger armed when an order is accepted
    pub post_acceptance: PostAcceptanceConfig,

    /// Periodic courier status sweep
    pub reconciliation: ReconciliationConfig,

    /// Re-arming of pending jobs after restart
    pub restore: RestoreConfig,

    /// Tracking URL backfill after a successful dispatch
    pub tracking: TrackingConfig,

    pub database: DatabaseConfig,

    pub logging: LoggingConfig,
}

impl DispatchConfig {
    /// Reject values that would make the scheduler misbehave
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduling.buffer_minutes < 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduling.buffer_minutes",
                self.scheduling.buffer_minutes,
                "lead buffer cannot be negative",
            ));
        }
        if self.scheduling.min_lead_seconds < 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduling.min_lead_seconds",
                self.scheduling.min_lead_seconds,
                "minimum lead time cannot be negative",
            ));
        }
        if self.post_acceptance.min_delay_minutes > self.post_acceptance.max_delay_minutes {
            return Err(ConfigurationError::invalid_value(
                "post_acceptance.min_delay_minutes",
                self.post_acceptance.min_delay_minutes,
                format!(
                    "must not exceed max_delay_minutes ({})",
                    self.post_acceptance.max_delay_minutes
                ),
            ));
        }
        if self.reconciliation.interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "reconciliation.interval_seconds",
                0,
                "sweep interval must be positive",
            ));
        }
        if self.reconciliation.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "reconciliation.batch_size",
                0,
                "batch size must be positive",
            ));
        }
        if self.restore.backlog_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "restore.backlog_limit",
                0,
                "backlog limit must be positive",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                0,
                "pool needs at least one connection",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Minutes subtracted from the declared delivery time
    pub buffer_minutes: i64,
    /// Schedules closer than this are dispatched immediately
    pub min_lead_seconds: i64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            buffer_minutes: 30,
            min_lead_seconds: 60,
        }
    }
}

impl SchedulingConfig {
    pub fn buffer(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.buffer_minutes)
    }

    pub fn min_lead(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_lead_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PostAcceptanceConfig {
    pub enabled: bool,
    pub min_delay_minutes: u64,
    pub max_delay_minutes: u64,
}

impl Default for PostAcceptanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay_minutes: 20,
            max_delay_minutes: 25,
        }
    }
}

impl PostAcceptanceConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs(self.min_delay_minutes * 60)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_minutes * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub initial_delay_seconds: u64,
    /// Upper bound on orders examined per sweep
    pub batch_size: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 120,
            initial_delay_seconds: 15,
            batch_size: 50,
        }
    }
}

impl ReconciliationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub enabled: bool,
    /// How many recent orders are scanned at startup
    pub backlog_limit: usize,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backlog_limit: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Wait between the first and second tracking URL lookup
    pub retry_backoff_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 2_000,
        }
    }
}

impl TrackingConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 5,
        }
    }
}

impl DatabaseConfig {
    /// Explicit url, falling back to `DATABASE_URL`
    pub fn database_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; environment default when absent
    pub level: Option<String>,
    /// Also write JSON lines to a file under `directory`
    pub json_file: bool,
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            json_file: false,
            directory: "log".to_string(),
        }
    }
}
