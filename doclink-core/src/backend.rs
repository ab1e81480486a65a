//! Storage backend abstraction.
//!
//! These traits describe what the mapping layer needs from a database driver.
//! A [`StoreBackend`] hands out [`CollectionBackend`] handles by name and runs
//! database commands; a collection handle executes filter documents produced
//! by [`Query`](crate::query::Query) and the writes issued by
//! [`Entity`](crate::entity::Entity).
//!
//! Implementations must be thread-safe (`Send + Sync`). Connection handling,
//! retries, timeouts and cancellation are entirely their concern; errors they
//! return are propagated to callers unchanged.
//!
//! # Examples
//!
//! ```ignore
//! use doclink::backend::StoreBackend;
//! use bson::doc;
//!
//! let users = backend.collection("users");
//! let id = users.insert(doc! { "name": "Alice", "age": 30 }).await?;
//! let found = users.find_one(doc! { "_id": id }, FindOptions::default()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Document, oid::ObjectId};
use std::{fmt::Debug, sync::Arc};

use crate::error::DocumentStoreResult;

/// Options applied to a `find` before iteration begins.
///
/// Every field is optional; `None` leaves the backend default in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort specification, `{field: 1 | -1}`.
    pub sort: Option<Document>,
    /// Projection, `{field: 0}` for exclusion or `{field: {"$slice": spec}}`.
    pub projection: Option<Document>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
}

/// A handle to a single named collection.
///
/// Handles are created by [`StoreBackend::collection`] and cached by
/// [`CollectionRegistry`](crate::collection::CollectionRegistry).
#[async_trait]
pub trait CollectionBackend: Send + Sync + Debug {
    /// Returns the name of the collection this handle is bound to.
    fn name(&self) -> &str;

    /// Returns all documents matching `filter`, honoring sort, projection, skip and limit.
    async fn find(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>>;

    /// Returns the first document matching `filter`, or `None`.
    async fn find_one(
        &self,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Counts documents matching `filter`, bounded by `limit` and `skip` when given.
    async fn count(
        &self,
        filter: Document,
        limit: Option<u64>,
        skip: Option<u64>,
    ) -> DocumentStoreResult<u64>;

    /// Inserts a document and returns its identifier.
    ///
    /// If the document carries no `_id`, the backend generates one.
    async fn insert(&self, document: Document) -> DocumentStoreResult<ObjectId>;

    /// Replaces the first document matching `filter` with `document`.
    ///
    /// Returns `false` when nothing matched, which callers treat as a failed write.
    async fn update(&self, filter: Document, document: Document) -> DocumentStoreResult<bool>;

    /// Removes all (or just one) documents matching `filter`.
    ///
    /// Returns `true` once the backend acknowledged the removal, whether or not
    /// anything matched.
    async fn remove(&self, filter: Document, just_one: bool) -> DocumentStoreResult<bool>;

    /// Drops the collection and all of its documents.
    async fn drop(&self) -> DocumentStoreResult<()>;
}

/// Abstract interface for a database connection.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Creates a handle for the named collection.
    ///
    /// This is not expected to be cheap or cached; the registry takes care of reuse.
    fn collection(&self, name: &str) -> Arc<dyn CollectionBackend>;

    /// Runs a database command against the selected database.
    async fn run_command(&self, command: Document) -> DocumentStoreResult<Document>;

    /// Lists the names of all collections in the selected database.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend + ?Sized,
{
    fn collection(&self, name: &str) -> Arc<dyn CollectionBackend> {
        (**self).collection(name)
    }

    async fn run_command(&self, command: Document) -> DocumentStoreResult<Document> {
        (**self).run_command(command).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (**self).list_collections().await
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        (**self).shutdown().await
    }
}

/// Factory trait for creating backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
