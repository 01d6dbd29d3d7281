//! Per-entity bookkeeping for the dynamic resolver.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::time::{add_duration, from_millis};

const UNSET: i64 = i64::MIN;

/// Access time, cache window and lock for one entity ID.
///
/// Exactly one instance exists per entity ID in the resolver's management
/// map. Its lock guards that entity's slice of the dynamic store and is only
/// held while the store is read or changed. Origin requests for the entity
/// are serialized by a separate fetch guard.
#[derive(Debug)]
pub struct EntityManagementData {
    entity_id: String,
    last_accessed_at: AtomicI64,
    expiration: AtomicI64,
    refresh_trigger: AtomicI64,
    lock: RwLock<()>,
    fetch: Mutex<()>,
}

impl EntityManagementData {
    /// Creates management data, counting creation as an access.
    #[must_use]
    pub fn new(entity_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            last_accessed_at: AtomicI64::new(now.timestamp_millis()),
            expiration: AtomicI64::new(UNSET),
            refresh_trigger: AtomicI64::new(UNSET),
            lock: RwLock::new(()),
            fetch: Mutex::new(()),
        }
    }

    /// Returns the entity ID.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Returns the lock guarding this entity's descriptors.
    #[must_use]
    pub const fn lock(&self) -> &RwLock<()> {
        &self.lock
    }

    /// Returns the guard held while the entity is fetched from its origin.
    #[must_use]
    pub const fn fetch_guard(&self) -> &Mutex<()> {
        &self.fetch
    }

    /// Records an access. The timestamp only moves forward.
    pub fn record_access(&self, now: DateTime<Utc>) {
        self.last_accessed_at
            .fetch_max(now.timestamp_millis(), Ordering::AcqRel);
    }

    /// Returns the last access time.
    #[must_use]
    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        from_millis(self.last_accessed_at.load(Ordering::Acquire))
    }

    /// Checks if the entity has gone unaccessed for longer than `max_idle`.
    #[must_use]
    pub fn is_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> bool {
        add_duration(self.last_accessed_at(), max_idle) < now
    }

    /// Sets the cache window after a successful fetch.
    pub fn set_cache_window(&self, expiration: DateTime<Utc>, refresh_trigger: DateTime<Utc>) {
        self.expiration
            .store(expiration.timestamp_millis(), Ordering::Release);
        self.refresh_trigger
            .store(refresh_trigger.timestamp_millis(), Ordering::Release);
    }

    /// Postpones the next refresh attempt without touching the expiration.
    pub fn defer_refresh(&self, until: DateTime<Utc>) {
        self.refresh_trigger
            .store(until.timestamp_millis(), Ordering::Release);
    }

    /// Returns when the cached descriptors expire, if they were ever fetched.
    #[must_use]
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        load_instant(&self.expiration)
    }

    /// Returns when the cached descriptors should be refreshed.
    #[must_use]
    pub fn refresh_trigger(&self) -> Option<DateTime<Utc>> {
        load_instant(&self.refresh_trigger)
    }

    /// Checks if a refresh is due at `now`.
    #[must_use]
    pub fn is_refresh_due(&self, now: DateTime<Utc>) -> bool {
        self.refresh_trigger().is_some_and(|trigger| now >= trigger)
    }

    /// Checks if the cached descriptors have expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration().is_some_and(|expiration| now >= expiration)
    }
}

fn load_instant(cell: &AtomicI64) -> Option<DateTime<Utc>> {
    match cell.load(Ordering::Acquire) {
        UNSET => None,
        millis => Some(from_millis(millis)),
    }
}
