//! Collection handles and the registry that caches them.
//!
//! A [`Collection`] is a cheap, cloneable handle bound to one collection name.
//! [`CollectionRegistry`] owns the backend and hands out one handle per name,
//! creating it on first use.
//!
//! # Example
//!
//! ```ignore
//! let registry = CollectionRegistry::new(Arc::new(InMemoryStore::new()));
//! let users = registry.get("users").await;
//! let id = users.insert(doc! { "name": "Alice" }).await?;
//! ```

use bson::{Document, oid::ObjectId};
use mea::mutex::Mutex;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::debug;

use crate::{
    backend::{CollectionBackend, FindOptions, StoreBackend},
    error::DocumentStoreResult,
};

/// A handle to a named collection.
///
/// Clones share the same underlying backend handle.
#[derive(Debug, Clone)]
pub struct Collection {
    name: Arc<str>,
    backend: Arc<dyn CollectionBackend>,
}

impl Collection {
    /// Wraps a backend collection handle.
    pub(crate) fn new(backend: Arc<dyn CollectionBackend>) -> Self {
        Self {
            name: Arc::from(backend.name()),
            backend,
        }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns all documents matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentStoreError`](crate::error::DocumentStoreError) if the backend fails.
    pub async fn find(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        debug!(collection = %self.name, %filter, ?options, "find");

        self.backend
            .find(filter, options)
            .await
    }

    /// Returns the first document matching `filter`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentStoreError`](crate::error::DocumentStoreError) if the backend fails.
    pub async fn find_one(
        &self,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        debug!(collection = %self.name, %filter, ?options, "find_one");

        self.backend
            .find_one(filter, options)
            .await
    }

    /// Counts documents matching `filter`.
    pub async fn count(
        &self,
        filter: Document,
        limit: Option<u64>,
        skip: Option<u64>,
    ) -> DocumentStoreResult<u64> {
        debug!(collection = %self.name, %filter, ?limit, ?skip, "count");

        self.backend
            .count(filter, limit, skip)
            .await
    }

    /// Inserts a document, returning its identifier.
    pub async fn insert(&self, document: Document) -> DocumentStoreResult<ObjectId> {
        debug!(collection = %self.name, "insert");

        self.backend.insert(document).await
    }

    /// Replaces the first document matching `filter`.
    pub async fn update(&self, filter: Document, document: Document) -> DocumentStoreResult<bool> {
        debug!(collection = %self.name, %filter, "update");

        self.backend
            .update(filter, document)
            .await
    }

    /// Removes documents matching `filter`.
    pub async fn remove(&self, filter: Document, just_one: bool) -> DocumentStoreResult<bool> {
        debug!(collection = %self.name, %filter, just_one, "remove");

        self.backend
            .remove(filter, just_one)
            .await
    }

    /// Drops the collection.
    pub async fn drop(&self) -> DocumentStoreResult<()> {
        debug!(collection = %self.name, "drop");

        CollectionBackend::drop(&*self.backend).await
    }
}

/// Owns a backend and caches one [`Collection`] handle per name.
///
/// Handle creation happens under a single lock, so concurrent first use of a
/// name never creates two handles.
pub struct CollectionRegistry {
    backend: Arc<dyn StoreBackend>,
    collections: Mutex<HashMap<String, Collection>>,
}

impl CollectionRegistry {
    /// Creates an empty registry over `backend`.
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            collections: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the backend this registry hands out handles for.
    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Returns the cached handle for `name`, creating it on first use.
    pub async fn get(&self, name: &str) -> Collection {
        let mut collections = self.collections.lock().await;

        if let Some(collection) = collections.get(name) {
            return collection.clone();
        }

        debug!(collection = name, "opening collection handle");
        let collection = Collection::new(self.backend.collection(name));
        collections.insert(name.to_string(), collection.clone());

        collection
    }

    /// Drops the named collection and forgets its cached handle.
    pub async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get(name).await.drop().await?;
        self.collections.lock().await.remove(name);

        Ok(())
    }

    /// Returns the number of cached handles.
    pub async fn len(&self) -> usize {
        self.collections.lock().await.len()
    }

    /// Returns `true` if no handle has been created yet.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionRegistry")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
