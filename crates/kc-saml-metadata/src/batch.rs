//! Whole-document loading.
//!
//! [`BatchMetadataResolver`] turns one metadata document into one
//! [`BackingStore`] generation. It never installs the store itself; the
//! reloading scheduler or [`StaticMetadataResolver`] does that.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info};

use crate::criteria::CriteriaSet;
use crate::document::{EntityDescriptor, MetadataDocument};
use crate::error::ResolverResult;
use crate::filter::{FilterChain, MetadataFilter};
use crate::lifecycle::Lifecycle;
use crate::resolver::MetadataResolver;
use crate::store::BackingStore;

/// Builds backing stores from complete metadata documents.
#[derive(Debug, Clone)]
pub struct BatchMetadataResolver {
    filters: FilterChain,
    cache_source_metadata: bool,
}

impl Default for BatchMetadataResolver {
    fn default() -> Self {
        Self {
            filters: FilterChain::new(),
            cache_source_metadata: true,
        }
    }
}

impl BatchMetadataResolver {
    /// Creates a loader with no filters that retains source documents.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter chain applied before indexing.
    #[must_use]
    pub fn with_filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    /// Sets whether the filtered source document is kept in the store.
    #[must_use]
    pub const fn with_cache_source_metadata(mut self, cache: bool) -> Self {
        self.cache_source_metadata = cache;
        self
    }

    /// Returns the filter chain.
    #[must_use]
    pub const fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Parses and loads raw metadata bytes.
    ///
    /// # Errors
    ///
    /// Returns a parse error for malformed metadata or a filter error if a
    /// filter rejects the document.
    pub fn load(&self, raw: impl Into<Bytes>) -> ResolverResult<BackingStore> {
        let document = MetadataDocument::parse(raw)?;
        self.load_document(document)
    }

    /// Filters and indexes an already parsed document.
    ///
    /// A filter that drops the whole document yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns a filter error if a filter rejects the document.
    pub fn load_document(&self, document: MetadataDocument) -> ResolverResult<BackingStore> {
        let Some(document) = self.filters.filter(document)? else {
            debug!("metadata document removed by filters, loading empty store");
            return Ok(BackingStore::empty());
        };

        let hint = document.expiry_hint();
        let cached = self
            .cache_source_metadata
            .then(|| Arc::new(document.clone()));
        let store = BackingStore::from_entities(document.into_entities())
            .with_cached_document(cached)
            .with_expiry_hint(hint);

        debug!(
            entities = store.len(),
            distinct = store.entity_id_count(),
            "indexed metadata document"
        );
        Ok(store)
    }
}

#[derive(Debug, Clone)]
enum StaticSource {
    Bytes(Bytes),
    Document(MetadataDocument),
}

/// Serves a single document supplied at construction.
///
/// The document is loaded once by `initialize()`. A parse or filter failure
/// there is fatal since there is no previous store to fall back to.
#[derive(Debug)]
pub struct StaticMetadataResolver {
    id: String,
    source: StaticSource,
    batch: BatchMetadataResolver,
    require_valid_metadata: bool,
    store: ArcSwap<BackingStore>,
    lifecycle: Lifecycle,
}

impl StaticMetadataResolver {
    /// Creates a resolver over raw metadata bytes, parsed at initialization.
    #[must_use]
    pub fn from_bytes(id: impl Into<String>, raw: impl Into<Bytes>) -> Self {
        Self::with_source(id.into(), StaticSource::Bytes(raw.into()))
    }

    /// Creates a resolver over a parsed document.
    #[must_use]
    pub fn from_document(id: impl Into<String>, document: MetadataDocument) -> Self {
        Self::with_source(id.into(), StaticSource::Document(document))
    }

    fn with_source(id: String, source: StaticSource) -> Self {
        Self {
            id,
            source,
            batch: BatchMetadataResolver::new(),
            require_valid_metadata: true,
            store: ArcSwap::from_pointee(BackingStore::empty()),
            lifecycle: Lifecycle::new(),
        }
    }

    /// Sets the loader (filters, source caching).
    #[must_use]
    pub fn with_batch(mut self, batch: BatchMetadataResolver) -> Self {
        self.batch = batch;
        self
    }

    /// Sets whether expired descriptors are withheld.
    #[must_use]
    pub const fn with_require_valid_metadata(mut self, require: bool) -> Self {
        self.require_valid_metadata = require;
        self
    }

    /// Returns the current backing store.
    #[must_use]
    pub fn backing_store(&self) -> Arc<BackingStore> {
        self.store.load_full()
    }
}

#[async_trait]
impl MetadataResolver for StaticMetadataResolver {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, criteria: &CriteriaSet) -> ResolverResult<Vec<Arc<EntityDescriptor>>> {
        self.lifecycle.ensure_initialized(&self.id)?;
        criteria.require_entity_id()?;
        Ok(self
            .store
            .load()
            .resolve(criteria, self.require_valid_metadata, Utc::now()))
    }

    async fn initialize(&self) -> ResolverResult<()> {
        if !self.lifecycle.begin_initialize(&self.id).await? {
            return Ok(());
        }

        let loaded = match &self.source {
            StaticSource::Bytes(raw) => self.batch.load(raw.clone()),
            StaticSource::Document(document) => self.batch.load_document(document.clone()),
        };
        let store = match loaded {
            Ok(store) => store,
            Err(err) => {
                self.lifecycle.abort_initialize();
                return Err(err);
            }
        };

        info!(resolver = %self.id, entities = store.len(), "static metadata loaded");
        self.store.store(Arc::new(store));
        self.lifecycle.finish_initialize();
        Ok(())
    }

    async fn destroy(&self) {
        if self.lifecycle.destroy() {
            self.store.store(Arc::new(BackingStore::empty()));
            debug!(resolver = %self.id, "static resolver destroyed");
        }
    }

    fn is_initialized(&self) -> bool {
        self.lifecycle.is_initialized()
    }
}
