//! Sync engine configuration.

use std::time::Duration;

use backoff::ExponentialBackoff;
use shiftdesk_store::{
    DEFAULT_COUNTRIES, DELETED_BACKUP_COLLECTION, SHIFT_TABLES_DOCUMENT, SHIFTS_COLLECTION,
    Validator,
};

/// Timing and addressing knobs for a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Collection holding the snapshot document.
    pub collection: String,
    /// Id of the snapshot document.
    pub document_id: String,
    /// Collection receiving copies of soft-deleted tables.
    pub backup_collection: String,
    /// Period of the background sync tick.
    pub sync_interval: Duration,
    /// Quiet period after a path update before it is synced.
    pub debounce: Duration,
    /// Store attempts per operation, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt. Doubles for each attempt after that.
    pub base_delay: Duration,
    /// Upper bound for a single retry delay.
    pub max_delay: Duration,
    /// Upper bound for a single store call.
    pub io_timeout: Duration,
    /// Country tags accepted by validation.
    pub countries: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collection: SHIFTS_COLLECTION.to_string(),
            document_id: SHIFT_TABLES_DOCUMENT.to_string(),
            backup_collection: DELETED_BACKUP_COLLECTION.to_string(),
            sync_interval: Duration::from_secs(30),
            debounce: Duration::from_secs(1),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            io_timeout: Duration::from_secs(15),
            countries: DEFAULT_COUNTRIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl SyncConfig {
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = document_id.into();
        self
    }

    pub fn with_backup_collection(mut self, collection: impl Into<String>) -> Self {
        self.backup_collection = collection.into();
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the attempt budget. Values below one are treated as one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = countries.into_iter().map(Into::into).collect();
        self
    }

    /// Validator for the configured countries.
    pub fn validator(&self) -> Validator {
        Validator::new(self.countries.iter().cloned())
    }

    /// Fresh retry schedule: `base_delay`, doubling, capped at `max_delay`, no jitter.
    pub fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.current_interval = self.base_delay;
        backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Backoff;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.collection, "shifts");
        assert_eq!(config.document_id, "shiftTables");
        assert_eq!(config.backup_collection, "deletedShiftTables");
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.countries, vec!["Egypt", "Morocco"]);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let config = SyncConfig::default()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10));
        let mut backoff = config.backoff();

        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_backoff().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_max_attempts_floor() {
        assert_eq!(SyncConfig::default().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_validator_uses_countries() {
        let validator = SyncConfig::default().with_countries(["Kenya"]).validator();
        assert_eq!(validator.countries(), ["Kenya".to_string()]);
    }
}
