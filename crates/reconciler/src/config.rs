//! Reconciler configuration.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use converge_statedb::Object;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ops::{BatchOperations, Operations};
use crate::status::Status;

/// Reads the status out of an object.
pub type GetObjectStatus<O> = Arc<dyn Fn(&O) -> Status + Send + Sync>;

/// Returns a copy of an object with its status replaced.
pub type WithObjectStatus<O> = Arc<dyn Fn(&O, Status) -> O + Send + Sync>;

/// Configuration for one reconciler.
pub struct Config<O: Object> {
    /// Interval between full reconciliations.
    pub full_reconciliation_interval: Duration,
    /// Backoff after the first failure of an object.
    pub retry_backoff_min_duration: Duration,
    /// Upper bound for backoff after repeated failures.
    pub retry_backoff_max_duration: Duration,
    /// Maximum objects processed per incremental round.
    pub incremental_round_size: usize,
    pub get_object_status: GetObjectStatus<O>,
    pub with_object_status: WithObjectStatus<O>,
    pub operations: Arc<dyn Operations<O>>,
    /// Used for incremental rounds instead of `operations` when set.
    pub batch_operations: Option<Arc<dyn BatchOperations<O>>>,
}

impl<O: Object> Clone for Config<O> {
    fn clone(&self) -> Self {
        Self {
            full_reconciliation_interval: self.full_reconciliation_interval,
            retry_backoff_min_duration: self.retry_backoff_min_duration,
            retry_backoff_max_duration: self.retry_backoff_max_duration,
            incremental_round_size: self.incremental_round_size,
            get_object_status: Arc::clone(&self.get_object_status),
            with_object_status: Arc::clone(&self.with_object_status),
            operations: Arc::clone(&self.operations),
            batch_operations: self.batch_operations.clone(),
        }
    }
}

impl<O: Object> fmt::Debug for Config<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "full_reconciliation_interval",
                &self.full_reconciliation_interval,
            )
            .field("retry_backoff_min_duration", &self.retry_backoff_min_duration)
            .field("retry_backoff_max_duration", &self.retry_backoff_max_duration)
            .field("incremental_round_size", &self.incremental_round_size)
            .field("batch_operations", &self.batch_operations.is_some())
            .finish_non_exhaustive()
    }
}

impl<O: Object> Config<O> {
    /// Create a configuration with default timings.
    pub fn new(
        get_object_status: impl Fn(&O) -> Status + Send + Sync + 'static,
        with_object_status: impl Fn(&O, Status) -> O + Send + Sync + 'static,
        operations: Arc<dyn Operations<O>>,
    ) -> Self {
        Timings::default().into_config(
            Arc::new(get_object_status),
            Arc::new(with_object_status),
            operations,
        )
    }

    /// Use batch operations for incremental rounds.
    #[must_use]
    pub fn with_batch_operations(mut self, batch: Arc<dyn BatchOperations<O>>) -> Self {
        self.batch_operations = Some(batch);
        self
    }

    /// Replace the timing fields.
    #[must_use]
    pub fn with_timings(mut self, timings: &Timings) -> Self {
        self.full_reconciliation_interval = timings.full_reconciliation_interval();
        self.retry_backoff_min_duration = timings.retry_backoff_min_duration();
        self.retry_backoff_max_duration = timings.retry_backoff_max_duration();
        self.incremental_round_size = timings.incremental_round_size;
        self
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero durations, a minimum backoff
    /// above the maximum, or a zero round size.
    pub fn validate(&self) -> Result<()> {
        if self.full_reconciliation_interval.is_zero() {
            return Err(Error::invalid_config(
                "full reconciliation interval must be positive",
            ));
        }
        if self.retry_backoff_min_duration.is_zero() || self.retry_backoff_max_duration.is_zero() {
            return Err(Error::invalid_config("retry backoff durations must be positive"));
        }
        if self.retry_backoff_min_duration > self.retry_backoff_max_duration {
            return Err(Error::invalid_config(format!(
                "retry backoff minimum {:?} exceeds maximum {:?}",
                self.retry_backoff_min_duration, self.retry_backoff_max_duration
            )));
        }
        if self.incremental_round_size == 0 {
            return Err(Error::invalid_config(
                "incremental round size must be positive",
            ));
        }
        Ok(())
    }
}

/// The serializable part of [`Config`].
///
/// Missing keys take their defaults, so a file only lists what it overrides:
///
/// ```toml
/// full_reconciliation_interval_ms = 60000
/// incremental_round_size = 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub full_reconciliation_interval_ms: u64,
    pub retry_backoff_min_duration_ms: u64,
    pub retry_backoff_max_duration_ms: u64,
    pub incremental_round_size: usize,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            full_reconciliation_interval_ms: 300_000,
            retry_backoff_min_duration_ms: 100,
            retry_backoff_max_duration_ms: 60_000,
            incremental_round_size: 1000,
        }
    }
}

impl Timings {
    /// Parse timings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the text does not parse.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(converge_core::parse_toml(text)?)
    }

    /// Load timings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(converge_core::load_toml(path)?)
    }

    pub const fn full_reconciliation_interval(&self) -> Duration {
        Duration::from_millis(self.full_reconciliation_interval_ms)
    }

    pub const fn retry_backoff_min_duration(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_min_duration_ms)
    }

    pub const fn retry_backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_duration_ms)
    }

    /// Build a full configuration from these timings.
    pub fn into_config<O: Object>(
        self,
        get_object_status: GetObjectStatus<O>,
        with_object_status: WithObjectStatus<O>,
        operations: Arc<dyn Operations<O>>,
    ) -> Config<O> {
        Config {
            full_reconciliation_interval: self.full_reconciliation_interval(),
            retry_backoff_min_duration: self.retry_backoff_min_duration(),
            retry_backoff_max_duration: self.retry_backoff_max_duration(),
            incremental_round_size: self.incremental_round_size,
            get_object_status,
            with_object_status,
            operations,
            batch_operations: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ops::Objects;
    use async_trait::async_trait;
    use converge_statedb::ReadTxn;

    struct NoOps;

    #[async_trait]
    impl Operations<u32> for NoOps {
        async fn update(&self, _txn: &ReadTxn, _object: &u32) -> Result<bool> {
            Ok(false)
        }

        async fn delete(&self, _txn: &ReadTxn, _object: &u32) -> Result<()> {
            Ok(())
        }

        async fn prune(&self, _txn: &ReadTxn, _objects: Objects<'_, u32>) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> Config<u32> {
        Config::new(|_| Status::pending(), |o, _| *o, Arc::new(NoOps))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.full_reconciliation_interval, Duration::from_secs(300));
        assert_eq!(config.retry_backoff_min_duration, Duration::from_millis(100));
        assert_eq!(config.retry_backoff_max_duration, Duration::from_secs(60));
        assert_eq!(config.incremental_round_size, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_round_size() {
        let mut config = config();
        config.incremental_round_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = config();
        config.retry_backoff_min_duration = Duration::from_secs(10);
        config.retry_backoff_max_duration = Duration::from_secs(1);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = config();
        config.full_reconciliation_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timings_partial_toml() {
        let timings = Timings::from_toml_str("incremental_round_size = 10").unwrap();
        assert_eq!(timings.incremental_round_size, 10);
        assert_eq!(timings.retry_backoff_min_duration_ms, 100);

        let config = config().with_timings(&timings);
        assert_eq!(config.incremental_round_size, 10);
    }

    #[test]
    fn test_timings_bad_toml() {
        let result = Timings::from_toml_str("incremental_round_size = \"many\"");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
