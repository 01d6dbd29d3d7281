//! Periodically reloaded metadata.
//!
//! [`ReloadingMetadataResolver`] wraps a [`BatchMetadataResolver`] and a
//! [`MetadataSource`] with a background refresh task. Each cycle fetches the
//! source, builds a new [`BackingStore`] and publishes it with a single
//! `ArcSwap` store, so readers never see a partially built generation and
//! never wait on a refresh.
//!
//! ## Refresh cycle
//!
//! 1. Fetch. An error fails the cycle and the next one runs after the
//!    minimum delay.
//! 2. Unchanged (`None`): the expiration is recomputed from the current
//!    store; nothing is swapped.
//! 3. Changed: parse, reject pre-expired documents, load, run the source's
//!    post-processing, then swap.
//!
//! The next delay is `clamp((expiration - now) * factor, min, max)`. The task
//! re-arms after every cycle, successful or not.

use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::batch::BatchMetadataResolver;
use crate::config::ReloadingConfig;
use crate::criteria::CriteriaSet;
use crate::document::{EntityDescriptor, MetadataDocument};
use crate::error::{ResolverError, ResolverResult};
use crate::filter::FilterChain;
use crate::lifecycle::Lifecycle;
use crate::resolver::{MetadataResolver, RefreshableMetadataResolver};
use crate::schedule::{CycleOutcome, RefreshDelayPolicy, RefreshSchedule, RefreshStatus};
use crate::source::{
    FileBackedHttpMetadataSource, FilesystemMetadataSource, HttpMetadataSource, MetadataSource,
};
use crate::store::BackingStore;

/// Reloading resolver over an HTTP source.
pub type HttpMetadataResolver = ReloadingMetadataResolver<HttpMetadataSource>;

/// Reloading resolver over an HTTP source with a backup file.
pub type FileBackedHttpMetadataResolver = ReloadingMetadataResolver<FileBackedHttpMetadataSource>;

/// Reloading resolver over a local file.
pub type FilesystemMetadataResolver = ReloadingMetadataResolver<FilesystemMetadataSource>;

const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Builder for [`ReloadingMetadataResolver`].
#[derive(Debug)]
pub struct ReloadingResolverBuilder<S> {
    id: String,
    source: S,
    config: ReloadingConfig,
    filters: FilterChain,
}

impl<S: MetadataSource> ReloadingResolverBuilder<S> {
    /// Sets the reloading configuration.
    #[must_use]
    pub fn config(mut self, config: ReloadingConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the filter chain applied to every loaded document.
    #[must_use]
    pub fn filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    /// Builds the resolver. It must be initialized before use.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the delay policy is invalid.
    pub fn build(self) -> ResolverResult<ReloadingMetadataResolver<S>> {
        self.config.validate()?;

        let batch = BatchMetadataResolver::new()
            .with_filters(self.filters)
            .with_cache_source_metadata(self.config.cache_source_metadata);
        let schedule = RefreshSchedule::new(RefreshDelayPolicy::from_config(&self.config));

        Ok(ReloadingMetadataResolver {
            inner: Arc::new(Inner {
                id: self.id,
                source: self.source,
                batch,
                config: self.config,
                store: ArcSwap::from_pointee(BackingStore::empty()),
                lifecycle: Lifecycle::new(),
                refresh_lock: tokio::sync::Mutex::new(()),
                publish_lock: Mutex::new(()),
                schedule: Mutex::new(schedule),
                next_refresh_at: Mutex::new(Instant::now() + FAR_FUTURE),
                wake: Arc::new(Notify::new()),
                task: Mutex::new(None),
            }),
        })
    }
}

/// A batch resolver refreshed in the background from a [`MetadataSource`].
pub struct ReloadingMetadataResolver<S: MetadataSource> {
    inner: Arc<Inner<S>>,
}

struct Inner<S: MetadataSource> {
    id: String,
    source: S,
    batch: BatchMetadataResolver,
    config: ReloadingConfig,
    store: ArcSwap<BackingStore>,
    lifecycle: Lifecycle,
    /// Serializes refresh cycles (timer and manual callers).
    refresh_lock: tokio::sync::Mutex<()>,
    /// Orders store swaps against `destroy()` clearing the store.
    publish_lock: Mutex<()>,
    schedule: Mutex<RefreshSchedule>,
    next_refresh_at: Mutex<Instant>,
    wake: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: MetadataSource> std::fmt::Debug for ReloadingMetadataResolver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadingMetadataResolver")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source.describe())
            .field("state", &self.inner.lifecycle.state())
            .finish_non_exhaustive()
    }
}

impl<S: MetadataSource> ReloadingMetadataResolver<S> {
    /// Starts building a resolver over `source`.
    #[must_use]
    pub fn builder(id: impl Into<String>, source: S) -> ReloadingResolverBuilder<S> {
        ReloadingResolverBuilder {
            id: id.into(),
            source,
            config: ReloadingConfig::default(),
            filters: FilterChain::new(),
        }
    }

    /// Returns the metadata source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Returns the reloading configuration.
    #[must_use]
    pub fn config(&self) -> &ReloadingConfig {
        &self.inner.config
    }

    /// Returns the currently published backing store.
    #[must_use]
    pub fn backing_store(&self) -> Arc<BackingStore> {
        self.inner.store.load_full()
    }

    /// Returns the source document of the current store, if retained.
    #[must_use]
    pub fn cached_document(&self) -> Option<Arc<MetadataDocument>> {
        self.inner.store.load().cached_document().cloned()
    }
}

impl<S: MetadataSource> Inner<S> {
    async fn refresh(&self) -> ResolverResult<()> {
        if self.lifecycle.is_destroyed() {
            return Err(ResolverError::destroyed(&self.id));
        }
        let _guard = self.refresh_lock.lock().await;

        let started = Utc::now();
        self.schedule.lock().begin(started);

        let result = self.run_cycle().await;
        let (outcome, result) = match result {
            Ok(outcome) => (outcome, Ok(())),
            Err(err) => {
                warn!(
                    resolver = %self.id,
                    source = %self.source.describe(),
                    error = %err,
                    "metadata refresh failed, keeping current metadata"
                );
                (
                    CycleOutcome::Failed {
                        cause: err.to_string(),
                    },
                    Err(err),
                )
            }
        };

        let now = Utc::now();
        let delay = {
            let mut schedule = self.schedule.lock();
            let computed = schedule.record(started, now, outcome);
            match self.source.take_next_refresh_override() {
                Some(delay) => schedule.override_next(now, delay),
                None => computed,
            }
        };
        debug!(resolver = %self.id, delay = ?delay, "next metadata refresh scheduled");
        self.arm(delay);

        result
    }

    async fn run_cycle(&self) -> ResolverResult<CycleOutcome> {
        let policy = *self.schedule.lock().policy();

        let Some(raw) = self.source.fetch_metadata().await? else {
            let now = Utc::now();
            let expiration = self
                .store
                .load()
                .expiry_hint()
                .expiration(now, policy.default_expiration(now));
            debug!(resolver = %self.id, "metadata unchanged since last refresh");
            return Ok(CycleOutcome::Unchanged { expiration });
        };

        let document = MetadataDocument::parse(raw.clone())?;
        let now = Utc::now();
        if !document.is_valid(now) {
            warn!(
                resolver = %self.id,
                source = %self.source.describe(),
                "fetched metadata has already expired, keeping current metadata"
            );
            return Ok(CycleOutcome::PreExpired);
        }

        let store = self.batch.load_document(document.clone())?;
        self.source.post_process(&raw, &document).await?;
        drop(document);

        let now = Utc::now();
        let expiration = store
            .expiry_hint()
            .expiration(now, policy.default_expiration(now));

        let entities = store.len();
        {
            let _publish = self.publish_lock.lock();
            if self.lifecycle.is_destroyed() {
                return Err(ResolverError::destroyed(&self.id));
            }
            self.store.store(Arc::new(store));
        }
        info!(
            resolver = %self.id,
            source = %self.source.describe(),
            entities,
            expiration = %expiration,
            "metadata store updated"
        );

        Ok(CycleOutcome::Updated { expiration })
    }

    fn arm(&self, delay: Duration) {
        let now = Instant::now();
        *self.next_refresh_at.lock() = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.wake.notify_one();
    }

    fn next_refresh_at(&self) -> Instant {
        *self.next_refresh_at.lock()
    }
}

impl<S: MetadataSource> Drop for Inner<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Runs refresh cycles until the resolver is destroyed or dropped.
///
/// Only a weak reference is held while sleeping so an abandoned resolver can
/// be dropped.
async fn refresh_loop<S: MetadataSource>(weak: Weak<Inner<S>>, wake: Arc<Notify>) {
    loop {
        let deadline = match weak.upgrade() {
            Some(inner) if !inner.lifecycle.is_destroyed() => inner.next_refresh_at(),
            _ => break,
        };

        tokio::select! {
            () = tokio::time::sleep_until(deadline) => {}
            () = wake.notified() => continue,
        }

        let Some(inner) = weak.upgrade() else {
            break;
        };
        if inner.lifecycle.is_destroyed() {
            break;
        }
        // A manual refresh may have re-armed the timer while we slept.
        if Instant::now() < inner.next_refresh_at() {
            continue;
        }
        // Failures are logged and recorded by the cycle itself.
        let _ = inner.refresh().await;
    }
    debug!("metadata refresh task stopped");
}

#[async_trait]
impl<S: MetadataSource> MetadataResolver for ReloadingMetadataResolver<S> {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn resolve(&self, criteria: &CriteriaSet) -> ResolverResult<Vec<Arc<EntityDescriptor>>> {
        let inner = &self.inner;
        inner.lifecycle.ensure_initialized(&inner.id)?;
        criteria.require_entity_id()?;
        Ok(inner
            .store
            .load()
            .resolve(criteria, inner.config.require_valid_metadata, Utc::now()))
    }

    async fn initialize(&self) -> ResolverResult<()> {
        let inner = &self.inner;
        if !inner.lifecycle.begin_initialize(&inner.id).await? {
            return Ok(());
        }

        if let Err(err) = inner.refresh().await {
            if inner.config.fail_fast_initialization {
                inner.lifecycle.abort_initialize();
                return Err(err);
            }
            error!(
                resolver = %inner.id,
                error = %err,
                "metadata initialization failed, starting with no metadata"
            );
        }

        inner.lifecycle.finish_initialize();
        let task = tokio::spawn(refresh_loop(Arc::downgrade(inner), Arc::clone(&inner.wake)));
        if let Some(previous) = inner.task.lock().replace(task) {
            previous.abort();
        }

        info!(
            resolver = %inner.id,
            source = %inner.source.describe(),
            entities = inner.store.load().len(),
            "metadata resolver initialized"
        );
        Ok(())
    }

    async fn destroy(&self) {
        let inner = &self.inner;
        if !inner.lifecycle.destroy() {
            return;
        }
        inner.wake.notify_one();
        {
            let _publish = inner.publish_lock.lock();
            inner.store.store(Arc::new(BackingStore::empty()));
        }
        info!(resolver = %inner.id, "metadata resolver destroyed");
    }

    fn is_initialized(&self) -> bool {
        self.inner.lifecycle.is_initialized()
    }
}

#[async_trait]
impl<S: MetadataSource> RefreshableMetadataResolver for ReloadingMetadataResolver<S> {
    async fn refresh(&self) -> ResolverResult<()> {
        self.inner.lifecycle.ensure_initialized(&self.inner.id)?;
        self.inner.refresh().await
    }

    fn refresh_status(&self) -> RefreshStatus {
        self.inner.schedule.lock().status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::RequiredValidUntilFilter;
    use crate::test_support::{entity_xml, federation_xml, ScriptedSource};
    use chrono::TimeDelta;

    const IDP: &str = "https://idp.example.org";

    fn resolver(source: ScriptedSource) -> ReloadingMetadataResolver<ScriptedSource> {
        ReloadingMetadataResolver::builder("test", source).build().unwrap()
    }

    async fn resolve_count(resolver: &ReloadingMetadataResolver<ScriptedSource>, id: &str) -> usize {
        resolver
            .resolve(&CriteriaSet::entity_id(id))
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn initialize_loads_and_resolves() {
        let resolver = resolver(ScriptedSource::new().then_document(federation_xml(&[IDP, "b"])));
        resolver.initialize().await.unwrap();

        assert!(resolver.is_initialized());
        assert_eq!(resolve_count(&resolver, IDP).await, 1);
        assert_eq!(resolve_count(&resolver, "c").await, 0);
        assert_eq!(resolver.source().post_processed(), 1);

        let status = resolver.refresh_status();
        assert!(status.was_last_refresh_success);
        assert!(status.last_update.is_some());
        // No lifetime attributes: expiration defaults to now + max delay.
        assert!(status.next_refresh_delay <= Duration::from_secs(3 * 60 * 60));
        assert!(status.next_refresh_delay > Duration::from_secs(3 * 60 * 60 - 60));
        resolver.destroy().await;
    }

    #[tokio::test]
    async fn failed_cycles_keep_previous_store() {
        let resolver = resolver(ScriptedSource::new().then_document(entity_xml(IDP, None)));
        resolver.initialize().await.unwrap();
        let before = resolver.backing_store();

        resolver.source().push_error("connection reset");
        assert!(resolver.refresh().await.unwrap_err().is_fetch_error());
        resolver.source().push_document("<html/>");
        assert!(resolver.refresh().await.unwrap_err().is_content_error());

        assert!(Arc::ptr_eq(&before, &resolver.backing_store()));
        assert_eq!(resolve_count(&resolver, IDP).await, 1);

        let status = resolver.refresh_status();
        assert!(!status.was_last_refresh_success);
        assert!(status.last_failure_cause.is_some());
        assert_eq!(status.next_refresh_delay, resolver.config().min_refresh_delay);
        resolver.destroy().await;
    }

    #[tokio::test]
    async fn filter_rejection_keeps_previous_store() {
        let valid_until = (Utc::now() + TimeDelta::days(1)).to_rfc3339();
        let source = ScriptedSource::new().then_document(entity_xml(IDP, Some(&valid_until)));
        let resolver = ReloadingMetadataResolver::builder("filtered", source)
            .filters(FilterChain::new().with(RequiredValidUntilFilter::new()))
            .build()
            .unwrap();
        resolver.initialize().await.unwrap();

        resolver.source().push_document(entity_xml("https://other.example.org", None));
        assert!(matches!(resolver.refresh().await, Err(ResolverError::Filter(_))));
        assert_eq!(resolve_count(&resolver, IDP).await, 1);
        assert_eq!(resolve_count(&resolver, "https://other.example.org").await, 0);
        resolver.destroy().await;
    }

    #[tokio::test]
    async fn destroy_during_refresh_leaves_store_empty() {
        let resolver = resolver(ScriptedSource::new().then_document(entity_xml(IDP, None)));
        resolver.initialize().await.unwrap();

        resolver.source().push_document(federation_xml(&[IDP, "b"]));
        resolver.source().set_delay(Duration::from_millis(300));
        let cycle = tokio::spawn({
            let inner = Arc::clone(&resolver.inner);
            async move { inner.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        resolver.destroy().await;
        let result = cycle.await.unwrap();
        assert!(matches!(result, Err(ResolverError::Lifecycle { .. })));
        assert!(resolver.backing_store().is_empty());
        assert_eq!(resolver.source().post_processed(), 2);
    }

    #[tokio::test]
    async fn unchanged_source_keeps_store_and_last_update() {
        let resolver = resolver(ScriptedSource::new().then_document(entity_xml(IDP, None)));
        resolver.initialize().await.unwrap();
        let before = resolver.backing_store();
        let first = resolver.refresh_status();

        resolver.source().push_unchanged();
        resolver.refresh().await.unwrap();

        let status = resolver.refresh_status();
        assert!(Arc::ptr_eq(&before, &resolver.backing_store()));
        assert_eq!(status.last_update, first.last_update);
        assert!(status.next_refresh >= first.next_refresh);
        assert_eq!(status.refresh_count, 2);
        resolver.destroy().await;
    }

    #[tokio::test]
    async fn pre_expired_document_is_not_installed() {
        let resolver = resolver(ScriptedSource::new().then_document(entity_xml(IDP, None)));
        resolver.initialize().await.unwrap();
        let first_update = resolver.refresh_status().last_update;

        let expired = (Utc::now() - TimeDelta::hours(1)).to_rfc3339();
        resolver
            .source()
            .push_document(entity_xml("https://new.example.org", Some(&expired)));
        resolver.refresh().await.unwrap();

        assert_eq!(resolve_count(&resolver, IDP).await, 1);
        assert_eq!(resolve_count(&resolver, "https://new.example.org").await, 0);
        let status = resolver.refresh_status();
        assert_eq!(status.last_update, first_update);
        assert_eq!(status.next_refresh_delay, resolver.config().min_refresh_delay);
        resolver.destroy().await;
    }

    #[tokio::test]
    async fn expiry_drives_next_delay() {
        let valid_until = (Utc::now() + TimeDelta::hours(2)).to_rfc3339();
        let resolver = resolver(ScriptedSource::new().then_document(entity_xml(IDP, Some(&valid_until))));
        resolver.initialize().await.unwrap();

        let delay = resolver.refresh_status().next_refresh_delay;
        assert!(delay <= Duration::from_secs(90 * 60));
        assert!(delay > Duration::from_secs(89 * 60));
        resolver.destroy().await;
    }

    #[tokio::test]
    async fn fail_fast_initialization() {
        let source = ScriptedSource::new();
        source.push_error("unreachable");
        let resolver = resolver(source);

        assert!(resolver.initialize().await.is_err());
        assert!(!resolver.is_initialized());
        assert!(matches!(
            resolver.resolve(&CriteriaSet::entity_id(IDP)).await,
            Err(ResolverError::Lifecycle { .. })
        ));
    }

    #[tokio::test]
    async fn lenient_initialization_starts_empty() {
        let source = ScriptedSource::new();
        source.push_error("unreachable");
        let resolver = ReloadingMetadataResolver::builder("lenient", source)
            .config(ReloadingConfig::default().with_fail_fast_initialization(false))
            .build()
            .unwrap();

        resolver.initialize().await.unwrap();
        assert!(resolver.is_initialized());
        assert_eq!(resolve_count(&resolver, IDP).await, 0);

        resolver.source().push_document(entity_xml(IDP, None));
        resolver.refresh().await.unwrap();
        assert_eq!(resolve_count(&resolver, IDP).await, 1);
        resolver.destroy().await;
    }

    #[tokio::test]
    async fn background_task_refreshes_until_destroyed() {
        let config = ReloadingConfig::default()
            .with_refresh_delays(Duration::from_millis(20), Duration::from_millis(20));
        let resolver = ReloadingMetadataResolver::builder(
            "timer",
            ScriptedSource::new().then_document(entity_xml(IDP, None)),
        )
        .config(config)
        .build()
        .unwrap();
        resolver.initialize().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(resolver.source().fetches() >= 3);
        assert_eq!(resolve_count(&resolver, IDP).await, 1);

        resolver.destroy().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_destroy = resolver.source().fetches();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(resolver.source().fetches(), after_destroy);
        assert!(resolver.refresh().await.is_err());
    }

    #[tokio::test]
    async fn refresh_requires_initialization() {
        let resolver = resolver(ScriptedSource::new());
        assert!(matches!(
            resolver.refresh().await,
            Err(ResolverError::Lifecycle { state: "not initialized", .. })
        ));
    }
}
