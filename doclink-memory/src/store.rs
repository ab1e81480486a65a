//! In-memory storage implementation for document stores.
//!
//! This module provides a simple in-memory backend that keeps documents as BSON
//! in insertion-ordered maps guarded by async-safe read-write locks.

use std::{collections::HashMap, sync::Arc};
use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use indexmap::IndexMap;
use mea::rwlock::RwLock;
use tracing::trace;

use doclink_core::{
    backend::{CollectionBackend, FindOptions, StoreBackend, StoreBackendBuilder},
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::evaluator::{DocumentEvaluator, project, sort_documents};

/// Documents of one collection keyed by their `_id`, in insertion order.
type CollectionMap = IndexMap<String, Document>;
type StoreMap = HashMap<String, CollectionMap>;

fn key_of(id: &Bson) -> String {
    id.to_string()
}


/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait to provide a fully functional
/// document store that operates entirely in memory using async-aware read-write locks.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing). For small to medium
/// datasets (< 100k documents), this is typically acceptable. For larger datasets,
/// consider using a persistent backend like MongoDB.
///
/// # Example
///
/// ```ignore
/// use doclink_memory::InMemoryStore;
/// use doclink::backend::{FindOptions, StoreBackend};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let users = store.collection("users");
///
/// let id = users.insert(doc! { "name": "Alice", "age": 30 }).await?;
/// let found = users.find(doc! { "_id": id }, FindOptions::default()).await?;
/// assert_eq!(found.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// The main storage map: collection_name -> (document_id -> document)
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// ```ignore
    /// let store = InMemoryStore::builder().build().await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    async fn count_matching(&self, collection: &str, filter: &Document) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;

        let count = match store.get(collection) {
            Some(documents) => DocumentEvaluator::filter_documents(documents.values(), filter)?.len(),
            None => 0,
        };

        Ok(count as u64)
    }
}

/// Handle to one collection of an [`InMemoryStore`].
#[derive(Clone, Debug)]
pub struct InMemoryCollection {
    name: String,
    store: Arc<RwLock<StoreMap>>,
}

#[async_trait]
impl CollectionBackend for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let collection_map = match store.get(&self.name) {
            Some(col) => col,
            None => return Ok(vec![]),
        };

        let mut documents = DocumentEvaluator::filter_documents(collection_map.values(), &filter)?;
        drop(store);

        if let Some(sort) = &options.sort {
            sort_documents(&mut documents, sort);
        }

        Ok(
            documents
                .into_iter()
                .skip(options.skip.unwrap_or(0) as usize)
                .take(options.limit.map_or(usize::MAX, |limit| limit as usize))
                .map(|document| match &options.projection {
                    Some(projection) => project(document, projection),
                    None => document,
                })
                .collect()
        )
    }

    async fn find_one(
        &self,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        let options = FindOptions {
            limit: Some(1),
            ..options
        };

        Ok(
            self.find(filter, options)
                .await?
                .into_iter()
                .next()
        )
    }

    async fn count(
        &self,
        filter: Document,
        limit: Option<u64>,
        skip: Option<u64>,
    ) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;

        let matched = match store.get(&self.name) {
            Some(documents) => DocumentEvaluator::filter_documents(documents.values(), &filter)?.len() as u64,
            None => 0,
        };

        Ok(
            matched
                .saturating_sub(skip.unwrap_or(0))
                .min(limit.unwrap_or(u64::MAX))
        )
    }

    async fn insert(&self, mut document: Document) -> DocumentStoreResult<ObjectId> {
        let id = match document.get("_id") {
            Some(Bson::ObjectId(id)) => *id,
            Some(other) => return Err(DocumentStoreError::InvalidIdentifier(other.to_string())),
            None => {
                let id = ObjectId::new();
                document.insert("_id", id);
                id
            }
        };

        let mut store = self.store.write().await;
        let collection_map = store
            .entry(self.name.clone())
            .or_default();

        let key = key_of(&Bson::ObjectId(id));

        if collection_map.contains_key(&key) {
            return Err(DocumentStoreError::DocumentAlreadyExists(key, self.name.clone()));
        }

        trace!(collection = %self.name, %id, "stored document");
        collection_map.insert(key, document);

        Ok(id)
    }

    async fn update(&self, filter: Document, mut document: Document) -> DocumentStoreResult<bool> {
        let mut store = self.store.write().await;
        let collection_map = match store.get_mut(&self.name) {
            Some(col) => col,
            None => return Ok(false),
        };

        let mut target = None;
        for (key, stored) in collection_map.iter() {
            if DocumentEvaluator::new(stored).evaluate(&filter)? {
                target = Some(key.clone());
                break;
            }
        }

        let Some(key) = target else {
            return Ok(false);
        };

        if let Some(stored) = collection_map.get_mut(&key) {
            // A replacement never changes the identifier of the record it replaces.
            if let Some(id) = stored.get("_id").cloned() {
                document.insert("_id", id);
            }
            *stored = document;
        }

        Ok(true)
    }

    async fn remove(&self, filter: Document, just_one: bool) -> DocumentStoreResult<bool> {
        let mut store = self.store.write().await;
        let collection_map = match store.get_mut(&self.name) {
            Some(col) => col,
            None => return Ok(true),
        };

        let mut doomed = Vec::new();
        for (key, stored) in collection_map.iter() {
            if DocumentEvaluator::new(stored).evaluate(&filter)? {
                doomed.push(key.clone());

                if just_one {
                    break;
                }
            }
        }

        for key in doomed {
            collection_map.shift_remove(&key);
        }

        Ok(true)
    }

    async fn drop(&self) -> DocumentStoreResult<()> {
        self.store
            .write()
            .await
            .remove(&self.name);

        Ok(())
    }
}


#[async_trait]
impl StoreBackend for InMemoryStore {
    fn collection(&self, name: &str) -> Arc<dyn CollectionBackend> {
        Arc::new(InMemoryCollection {
            name: name.to_string(),
            store: self.store.clone(),
        })
    }

    /// Supports the `ping`, `count`, `drop` and `listCollections` commands.
    async fn run_command(&self, command: Document) -> DocumentStoreResult<Document> {
        let Some((name, argument)) = command.iter().next() else {
            return Err(DocumentStoreError::InvalidDocument("empty command".into()));
        };

        match name.as_str() {
            "ping" => Ok(doc! { "ok": 1.0 }),
            "count" => {
                let collection = argument.as_str().unwrap_or_default();
                let filter = command
                    .get_document("query")
                    .cloned()
                    .unwrap_or_default();

                let n = self.count_matching(collection, &filter).await? as i64;

                Ok(doc! { "n": n, "ok": 1.0 })
            }
            "drop" => {
                let collection = argument.as_str().unwrap_or_default();

                match self.store.write().await.remove(collection) {
                    Some(_) => Ok(doc! { "ns": collection, "ok": 1.0 }),
                    None => Err(DocumentStoreError::Backend(format!("ns not found: {collection}"))),
                }
            }
            "listCollections" => {
                let batch = self
                    .list_collections()
                    .await?
                    .into_iter()
                    .map(|name| Bson::Document(doc! { "name": name, "type": "collection" }))
                    .collect::<Vec<_>>();

                Ok(doc! { "cursor": { "firstBatch": batch }, "ok": 1.0 })
            }
            other => Err(DocumentStoreError::Backend(format!("unsupported command: {other}"))),
        }
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();

        names.sort();

        Ok(names)
    }
}


/// Builder for constructing [`InMemoryStore`] instances.
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> Arc<dyn CollectionBackend> {
        let store = InMemoryStore::new();
        let users = store.collection("users");

        for (name, age) in [("Carol", 41), ("Alice", 30), ("Bob", 25), ("Dave", 17)] {
            users.insert(doc! { "name": name, "age": age }).await.unwrap();
        }

        users
    }

    #[tokio::test]
    async fn find_sorts_skips_and_limits() {
        let users = seeded().await;
        let options = FindOptions {
            sort: Some(doc! { "age": -1 }),
            projection: Some(doc! { "_id": 0 }),
            limit: Some(2),
            skip: Some(1),
        };

        let found = users
            .find(doc! { "age": { "$gte": 18 } }, options)
            .await
            .unwrap();

        assert_eq!(found, vec![doc! { "name": "Alice", "age": 30 }, doc! { "name": "Bob", "age": 25 }]);
    }

    #[tokio::test]
    async fn find_keeps_insertion_order() {
        let users = seeded().await;
        let names = users
            .find(Document::new(), FindOptions::default())
            .await
            .unwrap()
            .into_iter()
            .map(|document| document.get_str("name").unwrap().to_string())
            .collect::<Vec<_>>();

        assert_eq!(names, ["Carol", "Alice", "Bob", "Dave"]);
    }

    #[tokio::test]
    async fn count_honors_bounds() {
        let users = seeded().await;

        assert_eq!(users.count(Document::new(), None, None).await.unwrap(), 4);
        assert_eq!(users.count(Document::new(), Some(3), Some(2)).await.unwrap(), 2);
        assert_eq!(users.count(doc! { "name": "Nobody" }, None, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_reports_matches_and_keeps_id() {
        let users = seeded().await;
        let bob = users
            .find_one(doc! { "name": "Bob" }, FindOptions::default())
            .await
            .unwrap()
            .unwrap();
        let id = bob.get_object_id("_id").unwrap();

        assert!(users.update(doc! { "_id": id }, doc! { "name": "Robert" }).await.unwrap());
        assert!(!users.update(doc! { "_id": ObjectId::new() }, doc! {}).await.unwrap());

        let robert = users
            .find_one(doc! { "name": "Robert" }, FindOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(robert.get_object_id("_id").unwrap(), id);
    }

    #[tokio::test]
    async fn duplicate_identifiers_are_rejected() {
        let users = InMemoryStore::new().collection("users");
        let id = ObjectId::new();

        users.insert(doc! { "_id": id }).await.unwrap();

        assert!(matches!(
            users.insert(doc! { "_id": id }).await,
            Err(DocumentStoreError::DocumentAlreadyExists(_, _))
        ));
    }

    #[tokio::test]
    async fn remove_one_or_all() {
        let users = seeded().await;

        assert!(users.remove(doc! { "age": { "$gt": 20 } }, true).await.unwrap());
        assert_eq!(users.count(Document::new(), None, None).await.unwrap(), 3);

        assert!(users.remove(doc! { "age": { "$gt": 20 } }, false).await.unwrap());
        assert_eq!(users.count(Document::new(), None, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn commands() {
        let store = InMemoryStore::new();
        store.collection("users").insert(doc! { "a": 1 }).await.unwrap();
        store.collection("books").insert(doc! { "a": 2 }).await.unwrap();

        assert_eq!(store.run_command(doc! { "ping": 1 }).await.unwrap().get_f64("ok").unwrap(), 1.0);
        assert_eq!(
            store
                .run_command(doc! { "count": "users", "query": { "a": 1 } })
                .await
                .unwrap()
                .get_i64("n")
                .unwrap(),
            1
        );
        assert_eq!(store.list_collections().await.unwrap(), ["books", "users"]);

        store.run_command(doc! { "drop": "books" }).await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), ["users"]);
        assert!(store.run_command(doc! { "shutdown": 1 }).await.is_err());
    }
}
