//! On-demand, per-entity metadata resolution.
//!
//! [`DynamicMetadataResolver`] fetches an entity's metadata from a
//! [`DynamicOrigin`] the first time it is requested and caches it. Each entity
//! ID has one [`EntityManagementData`] holding its last access time, cache
//! window, a fetch guard and a read/write lock:
//!
//! - lookups take the read lock just long enough to clone the cached
//!   descriptors;
//! - a miss takes the fetch guard, re-checks, fetches with no lock held and
//!   takes the write lock only to publish, so concurrent misses for one
//!   entity share a single origin request while other entities proceed
//!   independently;
//! - a due refresh runs only if no other fetch holds the guard; meanwhile
//!   every lookup is served the cached descriptors;
//! - a background sweep evicts idle or expired entities it can lock without
//!   waiting, then drops management data left without descriptors.

mod http;
mod management;

pub use http::{DynamicOrigin, HttpDynamicOrigin, RequestUrlBuilder, ENTITY_ID_PLACEHOLDER};
pub use management::EntityManagementData;

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::DynamicConfig;
use crate::criteria::CriteriaSet;
use crate::document::{EntityDescriptor, ExpiryHint, MetadataDocument};
use crate::error::ResolverResult;
use crate::filter::{FilterChain, MetadataFilter};
use crate::lifecycle::Lifecycle;
use crate::resolver::MetadataResolver;
use crate::store;
use crate::time::{add_duration, duration_between};

type Descriptors = Vec<Arc<EntityDescriptor>>;

/// Result of one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    /// Entities whose descriptors were evicted.
    pub evicted: usize,
    /// Management entries removed because no descriptors remained.
    pub orphaned: usize,
}

/// Builder for [`DynamicMetadataResolver`].
pub struct DynamicResolverBuilder {
    id: String,
    origin: Arc<dyn DynamicOrigin>,
    config: DynamicConfig,
    filters: FilterChain,
}

impl DynamicResolverBuilder {
    /// Sets the dynamic resolver configuration.
    #[must_use]
    pub fn config(mut self, config: DynamicConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the filter chain applied to every fetched document.
    #[must_use]
    pub fn filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    /// Builds the resolver. It must be initialized before use.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the cleanup or cache settings are
    /// invalid.
    pub fn build(self) -> ResolverResult<DynamicMetadataResolver> {
        self.config.validate()?;
        Ok(DynamicMetadataResolver {
            inner: Arc::new(Inner {
                id: self.id,
                origin: self.origin,
                config: self.config,
                filters: self.filters,
                management: DashMap::new(),
                store: DashMap::new(),
                lifecycle: Lifecycle::new(),
                wake: Arc::new(Notify::new()),
                task: Mutex::new(None),
            }),
        })
    }
}

/// Resolves entities one at a time from a [`DynamicOrigin`].
pub struct DynamicMetadataResolver {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    origin: Arc<dyn DynamicOrigin>,
    config: DynamicConfig,
    filters: FilterChain,
    management: DashMap<String, Arc<EntityManagementData>>,
    store: DashMap<String, Descriptors>,
    lifecycle: Lifecycle,
    wake: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DynamicMetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicMetadataResolver")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin.describe())
            .field("state", &self.inner.lifecycle.state())
            .field("cached_entities", &self.inner.store.len())
            .finish_non_exhaustive()
    }
}

impl DynamicMetadataResolver {
    /// Starts building a resolver over `origin`.
    #[must_use]
    pub fn builder(id: impl Into<String>, origin: Arc<dyn DynamicOrigin>) -> DynamicResolverBuilder {
        DynamicResolverBuilder {
            id: id.into(),
            origin,
            config: DynamicConfig::default(),
            filters: FilterChain::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DynamicConfig {
        &self.inner.config
    }

    /// Runs one cleanup sweep now.
    pub async fn cleanup(&self) -> CleanupSummary {
        self.inner.cleanup(Utc::now()).await
    }

    /// Returns the IDs of entities currently cached, sorted.
    #[must_use]
    pub fn cached_entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.store.iter().map(|e| e.key().clone()).collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the number of management entries.
    #[must_use]
    pub fn management_entry_count(&self) -> usize {
        self.inner.management.len()
    }

    /// Returns the management data of an entity, if any.
    #[must_use]
    pub fn management_data(&self, entity_id: &str) -> Option<Arc<EntityManagementData>> {
        self.inner
            .management
            .get(entity_id)
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl Inner {
    /// Returns the single management entry for `entity_id`, creating it.
    fn management_entry(&self, entity_id: &str, now: DateTime<Utc>) -> Arc<EntityManagementData> {
        Arc::clone(
            self.management
                .entry(entity_id.to_string())
                .or_insert_with(|| Arc::new(EntityManagementData::new(entity_id, now)))
                .value(),
        )
    }

    fn cached(&self, entity_id: &str) -> Option<Descriptors> {
        self.store.get(entity_id).map(|entry| entry.value().clone())
    }

    async fn lookup(&self, entity_id: &str) -> Descriptors {
        let now = Utc::now();
        let data = self.management_entry(entity_id, now);

        let cached = self.read_cached(&data).await;
        data.record_access(now);

        match cached {
            Some(descriptors) if data.is_refresh_due(now) => {
                self.refresh_entity(&data).await.unwrap_or(descriptors)
            }
            Some(descriptors) => {
                debug!(resolver = %self.id, entity_id, "dynamic metadata cache hit");
                descriptors
            }
            None => self.fetch_on_miss(&data).await,
        }
    }

    async fn read_cached(&self, data: &EntityManagementData) -> Option<Descriptors> {
        let _read = data.lock().read().await;
        self.cached(data.entity_id())
    }

    async fn fetch_on_miss(&self, data: &Arc<EntityManagementData>) -> Descriptors {
        let entity_id = data.entity_id();
        let _fetching = data.fetch_guard().lock().await;
        // Another lookup may have fetched while we waited.
        if let Some(descriptors) = self.read_cached(data).await {
            return descriptors;
        }

        debug!(resolver = %self.id, entity_id, "dynamic metadata cache miss");
        match self.fetch(entity_id).await {
            Ok(Some((descriptors, hint))) => self.install(data, descriptors, hint).await,
            Ok(None) => {
                debug!(resolver = %self.id, entity_id, "origin returned no usable metadata");
                Vec::new()
            }
            Err(err) => {
                warn!(
                    resolver = %self.id,
                    entity_id,
                    origin = %self.origin.describe(),
                    error = %err,
                    "dynamic metadata fetch failed"
                );
                Vec::new()
            }
        }
    }

    /// Refreshes a cached entity whose trigger time has passed.
    ///
    /// Returns `None` when the cached descriptors should keep being served,
    /// including while another lookup is already refreshing the entity.
    async fn refresh_entity(&self, data: &Arc<EntityManagementData>) -> Option<Descriptors> {
        let entity_id = data.entity_id();
        let Ok(_fetching) = data.fetch_guard().try_lock() else {
            debug!(resolver = %self.id, entity_id, "refresh in flight, serving cached entry");
            return None;
        };
        let now = Utc::now();
        if !data.is_refresh_due(now) {
            return self.read_cached(data).await;
        }

        match self.fetch(entity_id).await {
            Ok(Some((descriptors, hint))) => {
                debug!(resolver = %self.id, entity_id, "dynamic metadata refreshed");
                Some(self.install(data, descriptors, hint).await)
            }
            Ok(None) => {
                debug!(
                    resolver = %self.id,
                    entity_id,
                    "refresh returned no usable metadata, serving cached entry"
                );
                data.defer_refresh(add_duration(now, self.config.min_cache_duration));
                None
            }
            Err(err) => {
                warn!(
                    resolver = %self.id,
                    entity_id,
                    error = %err,
                    "dynamic metadata refresh failed, serving cached entry"
                );
                data.defer_refresh(add_duration(now, self.config.min_cache_duration));
                None
            }
        }
    }

    /// Fetches, parses and filters an entity's document, keeping only valid
    /// descriptors for the requested ID.
    async fn fetch(&self, entity_id: &str) -> ResolverResult<Option<(Descriptors, ExpiryHint)>> {
        let Some(raw) = self.origin.fetch_entity(entity_id).await? else {
            return Ok(None);
        };
        let document = MetadataDocument::parse(raw)?;
        let Some(document) = self.filters.filter(document)? else {
            return Ok(None);
        };

        let hint = document.expiry_hint();
        let now = Utc::now();
        let descriptors: Descriptors = document
            .into_entities()
            .into_iter()
            .filter(|entity| entity.entity_id == entity_id && entity.is_valid(now))
            .map(Arc::new)
            .collect();

        if descriptors.is_empty() {
            return Ok(None);
        }
        Ok(Some((descriptors, hint)))
    }

    /// Publishes fetched descriptors under the entity write lock. The caller
    /// holds the fetch guard.
    async fn install(
        &self,
        data: &Arc<EntityManagementData>,
        descriptors: Descriptors,
        hint: ExpiryHint,
    ) -> Descriptors {
        let _write = data.lock().write().await;
        if self.lifecycle.is_destroyed() {
            return descriptors;
        }

        let now = Utc::now();
        let (expiration, refresh_trigger) = self.cache_window(hint, now);
        let entity_id = data.entity_id();

        self.store.insert(entity_id.to_string(), descriptors.clone());
        // A sweep may have discarded this entry while the fetch was running.
        let current = Arc::clone(
            self.management
                .entry(entity_id.to_string())
                .or_insert_with(|| Arc::clone(data))
                .value(),
        );
        data.set_cache_window(expiration, refresh_trigger);
        if !Arc::ptr_eq(&current, data) {
            current.set_cache_window(expiration, refresh_trigger);
        }

        info!(
            resolver = %self.id,
            entity_id,
            descriptors = descriptors.len(),
            expiration = %expiration,
            "dynamic metadata cached"
        );
        descriptors
    }

    fn cache_window(&self, hint: ExpiryHint, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let floor = add_duration(now, self.config.min_cache_duration);
        let ceiling = add_duration(now, self.config.max_cache_duration);
        let expiration = hint.expiration(now, ceiling).clamp(floor, ceiling);
        let lifetime = duration_between(now, expiration).mul_f64(self.config.refresh_delay_factor);
        (expiration, add_duration(now, lifetime))
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> CleanupSummary {
        let mut summary = CleanupSummary::default();

        let entries: Vec<Arc<EntityManagementData>> = self
            .management
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for data in entries {
            // Busy entities are left for the next sweep.
            let Ok(_fetching) = data.fetch_guard().try_lock() else {
                continue;
            };
            let Ok(_write) = data.lock().try_write() else {
                continue;
            };
            let idle = self.config.remove_idle_entity_data
                && data.is_idle(now, self.config.max_idle_entity_data);
            if !idle && !data.is_expired(now) {
                continue;
            }

            let entity_id = data.entity_id();
            if self.store.remove(entity_id).is_some() {
                summary.evicted += 1;
                debug!(
                    resolver = %self.id,
                    entity_id,
                    idle,
                    last_accessed_at = %data.last_accessed_at(),
                    "evicted dynamic metadata"
                );
            }
            self.management
                .remove_if(entity_id, |_, current| Arc::ptr_eq(current, &data));
        }

        let orphans: Vec<Arc<EntityManagementData>> = self
            .management
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for data in orphans {
            // A held guard means a lookup is in flight.
            let Ok(_fetching) = data.fetch_guard().try_lock() else {
                continue;
            };
            let Ok(_write) = data.lock().try_write() else {
                continue;
            };
            let entity_id = data.entity_id();
            if self.store.contains_key(entity_id) {
                continue;
            }
            if self
                .management
                .remove_if(entity_id, |_, current| Arc::ptr_eq(current, &data))
                .is_some()
            {
                summary.orphaned += 1;
            }
        }

        if summary != CleanupSummary::default() {
            info!(
                resolver = %self.id,
                evicted = summary.evicted,
                orphaned = summary.orphaned,
                remaining = self.store.len(),
                "dynamic metadata cleanup finished"
            );
        }
        summary
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Runs cleanup sweeps every `interval` until the resolver is destroyed or
/// dropped.
async fn cleanup_loop(weak: Weak<Inner>, wake: Arc<Notify>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = wake.notified() => {}
        }

        let Some(inner) = weak.upgrade() else {
            break;
        };
        if inner.lifecycle.is_destroyed() {
            break;
        }
        inner.cleanup(Utc::now()).await;
    }
    debug!("dynamic metadata cleanup task stopped");
}

#[async_trait]
impl MetadataResolver for DynamicMetadataResolver {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn resolve(&self, criteria: &CriteriaSet) -> ResolverResult<Vec<Arc<EntityDescriptor>>> {
        let inner = &self.inner;
        inner.lifecycle.ensure_initialized(&inner.id)?;
        let entity_id = criteria.require_entity_id()?;
        if entity_id.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = inner.lookup(entity_id).await;
        Ok(store::select(
            &candidates,
            criteria,
            inner.config.require_valid_metadata,
            Utc::now(),
        ))
    }

    async fn initialize(&self) -> ResolverResult<()> {
        let inner = &self.inner;
        if !inner.lifecycle.begin_initialize(&inner.id).await? {
            return Ok(());
        }
        inner.lifecycle.finish_initialize();

        let task = tokio::spawn(cleanup_loop(
            Arc::downgrade(inner),
            Arc::clone(&inner.wake),
            inner.config.cleanup_interval,
        ));
        if let Some(previous) = inner.task.lock().replace(task) {
            previous.abort();
        }

        info!(
            resolver = %inner.id,
            origin = %inner.origin.describe(),
            cleanup_interval = ?inner.config.cleanup_interval,
            max_idle = ?inner.config.max_idle_entity_data,
            "dynamic metadata resolver initialized"
        );
        Ok(())
    }

    async fn destroy(&self) {
        let inner = &self.inner;
        if !inner.lifecycle.destroy() {
            return;
        }
        inner.wake.notify_one();
        inner.store.clear();
        inner.management.clear();
        info!(resolver = %inner.id, "dynamic metadata resolver destroyed");
    }

    fn is_initialized(&self) -> bool {
        self.inner.lifecycle.is_initialized()
    }
}
