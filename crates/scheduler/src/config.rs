//! Scheduler configuration.

use std::str::FromStr;
use std::time::Duration;

use taskhive_core::{RetryPolicy, TierTable};

use crate::error::ConfigError;

/// Scheduler configuration, supplied at construction time.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tier name -> admission policy
    pub tiers: TierTable,
    /// Concurrent executions each worker may keep in flight
    pub worker_slots: usize,
    /// Upper bound on how long an idle worker sleeps between checks
    pub idle_poll_interval: Duration,
    /// How often the cleanup task sweeps the job table
    pub cleanup_interval: Duration,
    /// Pause before retrying a sweep that failed unexpectedly
    pub cleanup_retry_delay: Duration,
    /// Minimum age of a terminal job before cleanup removes it
    pub retention: Duration,
    /// Backoff schedule; `max_retries` is the default per-job retry budget
    pub backoff: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            worker_slots: 4,
            idle_poll_interval: Duration::from_millis(250),
            cleanup_interval: Duration::from_secs(60 * 60),
            cleanup_retry_delay: Duration::from_secs(5),
            retention: Duration::from_secs(24 * 60 * 60),
            backoff: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_tiers(mut self, tiers: TierTable) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_worker_slots(mut self, slots: usize) -> Self {
        self.worker_slots = slots.max(1);
        self
    }

    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_cleanup_retry_delay(mut self, delay: Duration) -> Self {
        self.cleanup_retry_delay = delay;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Load configuration from `TASKHIVE_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("TASKHIVE_TIERS") {
            config.tiers = TierTable::from_json(&raw)?;
        }
        if let Some(slots) = parse::<usize>(&lookup, "TASKHIVE_WORKER_SLOTS")? {
            if slots == 0 {
                return Err(invalid("TASKHIVE_WORKER_SLOTS", "0", "must be at least 1"));
            }
            config.worker_slots = slots;
        }
        if let Some(ms) = parse::<u64>(&lookup, "TASKHIVE_IDLE_POLL_MS")? {
            config.idle_poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&lookup, "TASKHIVE_CLEANUP_INTERVAL_SECS")? {
            config.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, "TASKHIVE_RETENTION_SECS")? {
            config.retention = Duration::from_secs(secs);
        }
        if let Some(max_retries) = parse::<u32>(&lookup, "TASKHIVE_MAX_RETRIES")? {
            config.backoff.max_retries = max_retries;
        }
        if let Some(ms) = parse::<u64>(&lookup, "TASKHIVE_BACKOFF_BASE_MS")? {
            config.backoff.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "TASKHIVE_BACKOFF_CAP_MS")? {
            config.backoff.max_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
