//! Main entry point tying a backend to queries and entities.
//!
//! [`DocumentStore`] is the explicitly constructed context every [`Query`] and
//! [`Entity`] carries. It owns the [`CollectionRegistry`] and the store
//! configuration, so two stores with different backends or time zones can be
//! used side by side.
//!
//! # Example
//!
//! ```ignore
//! use doclink::{memory::InMemoryStore, store::DocumentStore};
//!
//! let store = DocumentStore::new(InMemoryStore::new());
//!
//! let mut user = store.entity("users", [("name", "Alice".into())])?;
//! user.save().await?;
//!
//! let found = store.query("users").equals("name", "Alice").find_one().await?;
//! ```

use bson::Document;
use std::{
    fmt,
    sync::{Arc, RwLock},
};

use crate::{
    backend::StoreBackend,
    collection::{Collection, CollectionRegistry},
    config::StoreConfig,
    document::Model,
    entity::Entity,
    error::DocumentStoreResult,
    query::Query,
    value::{TimeZone, Value},
};

struct StoreInner {
    registry: CollectionRegistry,
    config: StoreConfig,
    default_time_zone: RwLock<TimeZone>,
}

/// Shared context for queries and entities.
///
/// Cloning is cheap; all clones share the registry and configuration.
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<StoreInner>,
}

impl DocumentStore {
    /// Creates a store over `backend` with the default configuration.
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    /// Creates a store over `backend` with the given configuration.
    pub fn with_config(backend: impl StoreBackend + 'static, config: StoreConfig) -> Self {
        Self::from_shared(Arc::new(backend), config)
    }

    /// Creates a store over an already shared backend.
    pub fn from_shared(backend: Arc<dyn StoreBackend>, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                registry: CollectionRegistry::new(backend),
                default_time_zone: RwLock::new(config.default_time_zone),
                config,
            }),
        }
    }

    /// Returns the configuration this store was created with.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Returns the collection handle registry.
    pub fn registry(&self) -> &CollectionRegistry {
        &self.inner.registry
    }

    /// Returns the cached handle for the named collection.
    pub async fn collection(&self, name: &str) -> Collection {
        self.inner.registry.get(name).await
    }

    /// Starts a query against the named collection.
    pub fn query(&self, collection: impl Into<String>) -> Query {
        Query::new(self, collection)
    }

    /// Starts a query against the collection of a typed model.
    pub fn query_model<M: Model>(&self) -> Query {
        Query::new(self, M::collection_name())
    }

    /// Creates a new, unsaved entity in `collection` with the given fields.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidIdentifier`](crate::error::DocumentStoreError::InvalidIdentifier)
    /// if an `id` field cannot be coerced.
    pub fn entity<K, I>(&self, collection: impl Into<String>, fields: I) -> DocumentStoreResult<Entity>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Entity::builder(self, collection)
            .fields(fields)
            .build()
    }

    /// Returns the time zone timestamps are presented in by default.
    pub fn default_time_zone(&self) -> TimeZone {
        match self.inner.default_time_zone.read() {
            Ok(zone) => *zone,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Changes the default time zone for entities created from now on.
    pub fn set_default_time_zone(&self, zone: TimeZone) {
        match self.inner.default_time_zone.write() {
            Ok(mut guard) => *guard = zone,
            Err(poisoned) => *poisoned.into_inner() = zone,
        }
    }

    /// Drops (deletes) the named collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to drop the collection.
    pub async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.inner.registry.drop_collection(name).await
    }

    /// Runs a database command and returns its result document.
    pub async fn run_command(&self, command: Document) -> DocumentStoreResult<Document> {
        self.inner
            .registry
            .backend()
            .run_command(command)
            .await
    }

    /// Lists all collections in the database.
    pub async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.inner
            .registry
            .backend()
            .list_collections()
            .await
    }

    /// Shuts down the backend and releases its resources.
    pub async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.inner
            .registry
            .backend()
            .shutdown()
            .await
    }

    /// Returns `true` if both handles share the same context.
    pub fn same_store(&self, other: &DocumentStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish()
    }
}
