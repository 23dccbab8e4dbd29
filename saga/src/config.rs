//! Configuration for the saga participants.
//!
//! Loaded from environment variables with production defaults; every TTL
//! and tuning knob the protocols depend on lives here so deployments can
//! adjust them without code changes.

use purchase_saga_runtime::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation error.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A setting has an out-of-range or inconsistent value
    #[error("invalid configuration '{name}': {reason}")]
    Invalid {
        /// Setting name
        name: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Distributed lock settings.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// TTL for transient critical-section locks
    pub ttl: Duration,
}

/// Reservation TTLs and sweeping cadence.
#[derive(Debug, Clone)]
pub struct ReservationConfig {
    /// TTL for balance holds in the KV store
    pub balance_ttl: Duration,
    /// TTL for inventory slot holds in the KV store
    pub slot_ttl: Duration,
    /// Durable expiry for item stock reservations
    pub stock_ttl: Duration,
    /// How often the sweeper reconciles expired stock reservations
    pub sweep_interval: Duration,
}

/// Simulated payment gateway settings.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Probability a charge succeeds, in `[0, 1]`
    pub success_rate: f64,
    /// Lower bound of the simulated gateway latency
    pub latency_min: Duration,
    /// Upper bound of the simulated gateway latency
    pub latency_max: Duration,
    /// Payment method reported on the wire
    pub method: String,
}

/// Handler retry settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts for a retryable handler failure
    pub max_retries: usize,
    /// Initial backoff delay
    pub initial_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Build the runtime retry policy from these settings.
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_retries)
            .initial_delay(self.initial_delay)
            .max_delay(self.max_delay)
            .build()
    }
}

/// Audit recorder settings.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Flush the buffer once it holds this many entries
    pub batch_size: usize,
    /// Flush the buffer at least this often
    pub flush_interval: Duration,
    /// Entries older than this are purged by the cleanup task
    pub retention: Duration,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Distributed lock settings
    pub locks: LockConfig,
    /// Reservation TTLs and sweep cadence
    pub reservations: ReservationConfig,
    /// Payment gateway settings
    pub payment: PaymentConfig,
    /// Handler retry settings
    pub retry: RetryConfig,
    /// Audit recorder settings
    pub audit: AuditConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            locks: LockConfig {
                ttl: Duration::from_secs(5),
            },
            reservations: ReservationConfig {
                balance_ttl: Duration::from_secs(300),
                slot_ttl: Duration::from_secs(300),
                stock_ttl: Duration::from_secs(300),
                sweep_interval: Duration::from_secs(60),
            },
            payment: PaymentConfig {
                success_rate: 1.0,
                latency_min: Duration::from_millis(10),
                latency_max: Duration::from_millis(100),
                method: "credit-card".to_string(),
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(30),
            },
            audit: AuditConfig {
                batch_size: 50,
                flush_interval: Duration::from_secs(5),
                retention: Duration::from_secs(7 * 24 * 3600),
            },
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    lookup(name).and_then(|raw| raw.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults above.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a setting is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup. `from_env`
    /// delegates here; tests inject closures.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a setting is out of range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            locks: LockConfig {
                ttl: Duration::from_millis(parse_var(
                    &lookup,
                    "SAGA_LOCK_TTL_MS",
                    defaults.locks.ttl.as_millis() as u64,
                )),
            },
            reservations: ReservationConfig {
                balance_ttl: Duration::from_secs(parse_var(
                    &lookup,
                    "SAGA_BALANCE_RESERVE_TTL_SECS",
                    defaults.reservations.balance_ttl.as_secs(),
                )),
                slot_ttl: Duration::from_secs(parse_var(
                    &lookup,
                    "SAGA_SLOT_RESERVE_TTL_SECS",
                    defaults.reservations.slot_ttl.as_secs(),
                )),
                stock_ttl: Duration::from_secs(parse_var(
                    &lookup,
                    "SAGA_STOCK_RESERVE_TTL_SECS",
                    defaults.reservations.stock_ttl.as_secs(),
                )),
                sweep_interval: Duration::from_secs(parse_var(
                    &lookup,
                    "SAGA_SWEEP_INTERVAL_SECS",
                    defaults.reservations.sweep_interval.as_secs(),
                )),
            },
            payment: PaymentConfig {
                success_rate: parse_var(
                    &lookup,
                    "SAGA_PAYMENT_SUCCESS_RATE",
                    defaults.payment.success_rate,
                ),
                latency_min: Duration::from_millis(parse_var(
                    &lookup,
                    "SAGA_PAYMENT_LATENCY_MIN_MS",
                    defaults.payment.latency_min.as_millis() as u64,
                )),
                latency_max: Duration::from_millis(parse_var(
                    &lookup,
                    "SAGA_PAYMENT_LATENCY_MAX_MS",
                    defaults.payment.latency_max.as_millis() as u64,
                )),
                method: lookup("SAGA_PAYMENT_METHOD").unwrap_or(defaults.payment.method),
            },
            retry: RetryConfig {
                max_retries: parse_var(
                    &lookup,
                    "SAGA_RETRY_MAX",
                    defaults.retry.max_retries,
                ),
                initial_delay: Duration::from_millis(parse_var(
                    &lookup,
                    "SAGA_RETRY_INITIAL_MS",
                    defaults.retry.initial_delay.as_millis() as u64,
                )),
                max_delay: Duration::from_millis(parse_var(
                    &lookup,
                    "SAGA_RETRY_MAX_DELAY_MS",
                    defaults.retry.max_delay.as_millis() as u64,
                )),
            },
            audit: AuditConfig {
                batch_size: parse_var(
                    &lookup,
                    "SAGA_AUDIT_BATCH_SIZE",
                    defaults.audit.batch_size,
                ),
                flush_interval: Duration::from_secs(parse_var(
                    &lookup,
                    "SAGA_AUDIT_FLUSH_SECS",
                    defaults.audit.flush_interval.as_secs(),
                )),
                retention: Duration::from_secs(parse_var(
                    &lookup,
                    "SAGA_AUDIT_RETENTION_SECS",
                    defaults.audit.retention.as_secs(),
                )),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.payment.success_rate) {
            return Err(ConfigError::Invalid {
                name: "SAGA_PAYMENT_SUCCESS_RATE",
                reason: format!("{} is not within [0, 1]", self.payment.success_rate),
            });
        }
        if self.payment.latency_min > self.payment.latency_max {
            return Err(ConfigError::Invalid {
                name: "SAGA_PAYMENT_LATENCY_MIN_MS",
                reason: "latency lower bound exceeds upper bound".to_string(),
            });
        }
        if self.locks.ttl.is_zero() {
            return Err(ConfigError::Invalid {
                name: "SAGA_LOCK_TTL_MS",
                reason: "lock TTL must be positive".to_string(),
            });
        }
        for (name, ttl) in [
            ("SAGA_BALANCE_RESERVE_TTL_SECS", self.reservations.balance_ttl),
            ("SAGA_SLOT_RESERVE_TTL_SECS", self.reservations.slot_ttl),
            ("SAGA_STOCK_RESERVE_TTL_SECS", self.reservations.stock_ttl),
            ("SAGA_SWEEP_INTERVAL_SECS", self.reservations.sweep_interval),
        ] {
            if ttl.is_zero() {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "TTL must be positive".to_string(),
                });
            }
        }
        if self.audit.batch_size == 0 {
            return Err(ConfigError::Invalid {
                name: "SAGA_AUDIT_BATCH_SIZE",
                reason: "batch size must be positive".to_string(),
            });
        }
        Ok(())
    }
}
