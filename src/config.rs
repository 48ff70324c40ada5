use std::str::FromStr;
use std::time::Duration;

use crate::shared::RelayError;
use crate::subscription::SweepConfig;

/// Settings consumed by the relay
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Number of workers draining the inbound broker stream
    pub workers: usize,
    /// Ceiling on concurrently subscribed broker topics
    pub max_subscriptions: usize,
    /// How often idle subscriptions are swept
    pub sweep_interval: Duration,
    /// How long an unreferenced topic stays subscribed
    pub idle_threshold: Duration,
    /// Local lifecycle events buffered ahead of the publisher
    pub outbound_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_subscriptions: 1024,
            sweep_interval: Duration::from_secs(60),
            idle_threshold: Duration::from_secs(60),
            outbound_capacity: 256,
        }
    }
}

impl RelayConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_subscriptions(mut self, max_subscriptions: usize) -> Self {
        self.max_subscriptions = max_subscriptions;
        self
    }

    pub fn with_sweep(mut self, sweep_interval: Duration, idle_threshold: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self.idle_threshold = idle_threshold;
        self
    }

    pub fn with_outbound_capacity(mut self, outbound_capacity: usize) -> Self {
        self.outbound_capacity = outbound_capacity;
        self
    }

    /// Reads overrides from `RELAY_*` environment variables on top of the defaults
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RelayError> {
        let defaults = Self::default();

        let config = Self {
            workers: parse_or(&lookup, "RELAY_WORKERS", defaults.workers)?,
            max_subscriptions: parse_or(
                &lookup,
                "RELAY_MAX_SUBSCRIPTIONS",
                defaults.max_subscriptions,
            )?,
            sweep_interval: Duration::from_secs(parse_or(
                &lookup,
                "RELAY_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
            idle_threshold: Duration::from_secs(parse_or(
                &lookup,
                "RELAY_IDLE_THRESHOLD_SECS",
                defaults.idle_threshold.as_secs(),
            )?),
            outbound_capacity: parse_or(
                &lookup,
                "RELAY_OUTBOUND_CAPACITY",
                defaults.outbound_capacity,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Every setting must be positive
    pub fn validate(&self) -> Result<(), RelayError> {
        let invalid = |field: &str| -> Result<(), RelayError> {
            Err(RelayError::InvalidConfig(format!("{field} must be positive")))
        };

        if self.workers == 0 {
            return invalid("workers");
        }
        if self.max_subscriptions == 0 {
            return invalid("max_subscriptions");
        }
        if self.sweep_interval.is_zero() {
            return invalid("sweep_interval");
        }
        if self.idle_threshold.is_zero() {
            return invalid("idle_threshold");
        }
        if self.outbound_capacity == 0 {
            return invalid("outbound_capacity");
        }
        Ok(())
    }

    pub fn sweep(&self) -> SweepConfig {
        SweepConfig {
            sweep_interval: self.sweep_interval,
            idle_threshold: self.idle_threshold,
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, RelayError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RelayError::InvalidConfig(format!("{key}={raw} is not a valid number"))),
        None => Ok(default),
    }
}
