//! World configuration.
//!
//! [`WorldConfig::default`] holds the defaults; [`WorldConfig::from_env`]
//! overrides them from `WORLD_*` environment variables. A variable that is set
//! but cannot be parsed is an error naming the variable, never a silent
//! fallback.

use std::env;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Namespace transactions must be signed for.
pub const NAMESPACE_ENV_VAR: &str = "WORLD_NAMESPACE";
/// Enables sync mode against a sequencer.
pub const ROLLUP_ENABLED_ENV_VAR: &str = "WORLD_ROLLUP_ENABLED";
/// Enables transaction signature verification.
pub const VERIFY_SIGNATURES_ENV_VAR: &str = "WORLD_VERIFY_SIGNATURES";
/// Ticks per second.
pub const TICK_RATE_ENV_VAR: &str = "WORLD_TICK_RATE";
/// Maximum number of cached receipts.
pub const RECEIPT_CACHE_SIZE_ENV_VAR: &str = "WORLD_RECEIPT_CACHE_SIZE";
/// Default `tracing` filter directive.
pub const LOG_LEVEL_ENV_VAR: &str = "WORLD_LOG_LEVEL";

/// Slowest accepted clock: one tick every 1000 seconds.
pub const MIN_TICK_RATE: f64 = 0.001;
/// Fastest accepted clock.
pub const MAX_TICK_RATE: f64 = 10_000.0;

/// Invalid configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable holds a value of the wrong shape.
    #[error("invalid value {value:?} for {var}: expected {expected}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// Expected shape.
        expected: &'static str,
    },

    /// A variable is set but not valid unicode.
    #[error("{var} is not valid unicode")]
    NotUnicode {
        /// Variable name.
        var: &'static str,
    },

    /// The configuration is internally inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Settings of one world.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldConfig {
    /// Namespace transactions must carry.
    pub namespace: String,
    /// Sync from a sequencer instead of ticking on a clock.
    pub rollup_enabled: bool,
    /// Verify namespaces, signatures and persona authorization on intake.
    pub verify_signatures: bool,
    /// Ticks per second.
    pub tick_rate: f64,
    /// Maximum number of cached receipts.
    pub receipt_cache_size: usize,
    /// Default log filter.
    pub log_level: String,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            namespace: "world-1".to_string(),
            rollup_enabled: false,
            verify_signatures: true,
            tick_rate: 1.0,
            receipt_cache_size: 10_000,
            log_level: "info".to_string(),
        }
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { var, value: value.to_string(), expected: "a boolean" }),
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str, expected: &'static str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { var, value: value.to_string(), expected })
}

impl WorldConfig {
    /// Defaults overridden from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| match env::var(var) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode { var }),
        })
    }

    /// Defaults overridden by `lookup`, which returns the raw value of a
    /// variable or `None` if it is unset.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&'static str) -> Result<Option<String>, ConfigError>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(NAMESPACE_ENV_VAR)? {
            config.namespace = value;
        }
        if let Some(value) = lookup(ROLLUP_ENABLED_ENV_VAR)? {
            config.rollup_enabled = parse_bool(ROLLUP_ENABLED_ENV_VAR, &value)?;
        }
        if let Some(value) = lookup(VERIFY_SIGNATURES_ENV_VAR)? {
            config.verify_signatures = parse_bool(VERIFY_SIGNATURES_ENV_VAR, &value)?;
        }
        if let Some(value) = lookup(TICK_RATE_ENV_VAR)? {
            config.tick_rate = parse_number(TICK_RATE_ENV_VAR, &value, "ticks per second")?;
        }
        if let Some(value) = lookup(RECEIPT_CACHE_SIZE_ENV_VAR)? {
            config.receipt_cache_size = parse_number(RECEIPT_CACHE_SIZE_ENV_VAR, &value, "a receipt count")?;
        }
        if let Some(value) = lookup(LOG_LEVEL_ENV_VAR)? {
            config.log_level = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty"));
        }
        if !(MIN_TICK_RATE..=MAX_TICK_RATE).contains(&self.tick_rate) {
            return Err(ConfigError::Invalid("tick rate must be between 0.001 and 10000 ticks per second"));
        }
        if self.receipt_cache_size == 0 {
            return Err(ConfigError::Invalid("receipt cache size must be positive"));
        }
        EnvFilter::try_new(&self.log_level).map_err(|_| ConfigError::InvalidValue {
            var: LOG_LEVEL_ENV_VAR,
            value: self.log_level.clone(),
            expected: "a tracing filter directive",
        })?;
        Ok(())
    }

    /// Log filter for the host's subscriber: `RUST_LOG` when set, otherwise
    /// [`WorldConfig::log_level`].
    pub fn log_filter(&self) -> Result<EnvFilter, ConfigError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.log_level).map_err(|_| ConfigError::InvalidValue {
            var: LOG_LEVEL_ENV_VAR,
            value: self.log_level.clone(),
            expected: "a tracing filter directive",
        })
    }

    /// Interval between clock ticks.
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_rate)
    }

    /// Number of ticks per telemetry batch: one second of ticks, at least one.
    pub fn telemetry_batch_size(&self) -> usize {
        (self.tick_rate.round() as usize).max(1)
    }
}
