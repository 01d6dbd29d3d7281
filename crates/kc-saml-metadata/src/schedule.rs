//! Refresh scheduling for reloading resolvers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ReloadingConfig;
use crate::time::add_duration;

/// Bounds and factor for the adaptive refresh delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshDelayPolicy {
    /// Floor of the delay.
    pub min_delay: Duration,
    /// Ceiling of the delay.
    pub max_delay: Duration,
    /// Fraction of the time-to-expiry to wait.
    pub delay_factor: f64,
}

impl Default for RefreshDelayPolicy {
    fn default() -> Self {
        Self::from_config(&ReloadingConfig::default())
    }
}

impl RefreshDelayPolicy {
    /// Takes the delay settings from a reloading config.
    #[must_use]
    pub const fn from_config(config: &ReloadingConfig) -> Self {
        Self {
            min_delay: config.min_refresh_delay,
            max_delay: config.max_refresh_delay,
            delay_factor: config.refresh_delay_factor,
        }
    }

    /// Computes `clamp((expiration - now) * factor, min, max)`.
    ///
    /// Expirations in the past clamp to the minimum.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn compute_delay(&self, expiration: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let min = millis(self.min_delay);
        let max = millis(self.max_delay).max(min);
        let until_expiry = (expiration - now).num_milliseconds();
        let scaled = (until_expiry as f64 * self.delay_factor) as i64;
        Duration::from_millis(u64::try_from(scaled.clamp(min, max)).unwrap_or(0))
    }

    /// Expiration used when the document carries no lifetime attributes.
    #[must_use]
    pub fn default_expiration(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        add_duration(now, self.max_delay)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Snapshot of a reloading resolver's refresh bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshStatus {
    /// When the store was last replaced.
    pub last_update: Option<DateTime<Utc>>,
    /// When the last refresh cycle started.
    pub last_refresh: Option<DateTime<Utc>>,
    /// When the last successful refresh cycle started.
    pub last_successful_refresh: Option<DateTime<Utc>>,
    /// When the next cycle is due.
    pub next_refresh: Option<DateTime<Utc>>,
    /// Expiration of the current metadata.
    pub expiration_time: Option<DateTime<Utc>>,
    /// Delay before the next cycle.
    #[serde(with = "crate::config::duration_ms")]
    pub next_refresh_delay: Duration,
    /// Whether the last cycle succeeded.
    pub was_last_refresh_success: bool,
    /// Error message of the last failed cycle.
    pub last_failure_cause: Option<String>,
    /// Number of completed cycles.
    pub refresh_count: u64,
}

/// How a refresh cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    /// The source reported no change.
    Unchanged { expiration: DateTime<Utc> },
    /// A new store was published.
    Updated { expiration: DateTime<Utc> },
    /// The new document had already expired; the old store was kept.
    PreExpired,
    /// The cycle failed before publishing.
    Failed { cause: String },
}

/// Mutable refresh schedule, written only by the refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct RefreshSchedule {
    policy: RefreshDelayPolicy,
    status: RefreshStatus,
}

impl RefreshSchedule {
    /// Creates a schedule with the given delay policy.
    #[must_use]
    pub fn new(policy: RefreshDelayPolicy) -> Self {
        Self {
            policy,
            status: RefreshStatus::default(),
        }
    }

    /// Returns the delay policy.
    #[must_use]
    pub const fn policy(&self) -> &RefreshDelayPolicy {
        &self.policy
    }

    /// Returns a copy of the current status.
    #[must_use]
    pub fn status(&self) -> RefreshStatus {
        self.status.clone()
    }

    pub(crate) fn begin(&mut self, now: DateTime<Utc>) {
        self.status.last_refresh = Some(now);
    }

    /// Records the cycle outcome and returns the delay until the next cycle.
    pub(crate) fn record(
        &mut self,
        started: DateTime<Utc>,
        now: DateTime<Utc>,
        outcome: CycleOutcome,
    ) -> Duration {
        let status = &mut self.status;
        status.refresh_count += 1;

        let delay = match outcome {
            CycleOutcome::Unchanged { expiration } => {
                status.expiration_time = Some(expiration);
                self.policy.compute_delay(expiration, now)
            }
            CycleOutcome::Updated { expiration } => {
                status.last_update = Some(now);
                status.expiration_time = Some(expiration);
                self.policy.compute_delay(expiration, now)
            }
            CycleOutcome::PreExpired => self.policy.min_delay,
            CycleOutcome::Failed { cause } => {
                status.was_last_refresh_success = false;
                status.last_failure_cause = Some(cause);
                return self.set_next(now, self.policy.min_delay);
            }
        };

        status.was_last_refresh_success = true;
        status.last_successful_refresh = Some(started);
        status.last_failure_cause = None;
        self.set_next(now, delay)
    }

    /// Replaces the computed delay, e.g. after a start-up from a backup file.
    pub(crate) fn override_next(&mut self, now: DateTime<Utc>, delay: Duration) -> Duration {
        self.set_next(now, delay)
    }

    fn set_next(&mut self, now: DateTime<Utc>, delay: Duration) -> Duration {
        self.status.next_refresh_delay = delay;
        self.status.next_refresh = Some(add_duration(now, delay));
        delay
    }
}
