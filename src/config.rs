//! Settings for the ledger server and the offline client queue.

use std::time::Duration;

/// The default number of months ahead to generate recurring transactions for.
pub const DEFAULT_RECURRING_HORIZON_MONTHS: u32 = 12;

/// The default number of days the server remembers idempotency keys for.
pub const DEFAULT_IDEMPOTENCY_RETENTION_DAYS: u32 = 30;

/// Settings that change how the ledger server interprets requests.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// The local timezone as a canonical timezone name, e.g. "Pacific/Auckland".
    ///
    /// Used to decide which recurring transactions are due today.
    pub local_timezone: String,

    /// How many months past its start date a recurring series without an end
    /// date is generated for.
    pub recurring_horizon_months: u32,

    /// How many days a stored idempotency record is kept. A retry sent after
    /// its record was pruned is applied again.
    pub idempotency_retention_days: u32,
}

impl LedgerConfig {
    /// Create a config for `local_timezone` with the default recurring horizon.
    pub fn new(local_timezone: &str) -> Self {
        Self {
            local_timezone: local_timezone.to_owned(),
            recurring_horizon_months: DEFAULT_RECURRING_HORIZON_MONTHS,
            idempotency_retention_days: DEFAULT_IDEMPOTENCY_RETENTION_DAYS,
        }
    }

    /// Set how many months ahead recurring series are generated for.
    pub fn recurring_horizon_months(mut self, months: u32) -> Self {
        self.recurring_horizon_months = months;
        self
    }

    /// Set how many days idempotency records are kept for.
    pub fn idempotency_retention_days(mut self, days: u32) -> Self {
        self.idempotency_retention_days = days;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new("Etc/UTC")
    }
}

/// Settings for replaying the offline mutation queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// The number of failed sends after which an entry is marked as failed.
    pub max_attempts: u32,
    /// The wait after the first failed send. Doubles with each further attempt.
    pub backoff_base: Duration,
    /// The longest wait between two sends of the same entry.
    pub backoff_cap: Duration,
    /// How long a synced entry is kept before it is pruned. While it is
    /// kept, enqueueing its key again is a no-op.
    pub synced_retention: Duration,
}

impl QueueConfig {
    /// The wait before an entry that has failed `attempts` times may be sent again.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1 << exponent)
            .min(self.backoff_cap)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
            synced_retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::QueueConfig;

    #[test]
    fn backoff_doubles_until_cap() {
        let config = QueueConfig {
            max_attempts: 10,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(10),
            synced_retention: Duration::ZERO,
        };

        let waits: Vec<u64> = (1..=6).map(|n| config.backoff(n).as_secs()).collect();

        assert_eq!(waits, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn backoff_does_not_overflow_on_many_attempts() {
        let config = QueueConfig::default();

        assert_eq!(config.backoff(u32::MAX), config.backoff_cap);
    }
}
