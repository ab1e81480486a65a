#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use doclink::{
    bson::{Document, oid::ObjectId},
    memory::InMemoryStore,
    prelude::*,
};

/// A storage write as seen by the backend: `(collection, operation)`.
pub type Write = (String, &'static str);

/// Wraps the in-memory backend and records every write it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    inner: InMemoryStore,
    writes: Arc<Mutex<Vec<Write>>>,
}

impl RecordingStore {
    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }
}

#[derive(Debug)]
struct RecordingCollection {
    inner: Arc<dyn CollectionBackend>,
    writes: Arc<Mutex<Vec<Write>>>,
}

impl RecordingCollection {
    fn record(&self, operation: &'static str) {
        self.writes
            .lock()
            .unwrap()
            .push((self.inner.name().to_string(), operation));
    }
}

#[async_trait]
impl CollectionBackend for RecordingCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        self.inner.find(filter, options).await
    }

    async fn find_one(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<Option<Document>> {
        self.inner.find_one(filter, options).await
    }

    async fn count(&self, filter: Document, limit: Option<u64>, skip: Option<u64>) -> DocumentStoreResult<u64> {
        self.inner.count(filter, limit, skip).await
    }

    async fn insert(&self, document: Document) -> DocumentStoreResult<ObjectId> {
        self.record("insert");
        self.inner.insert(document).await
    }

    async fn update(&self, filter: Document, document: Document) -> DocumentStoreResult<bool> {
        self.record("update");
        self.inner.update(filter, document).await
    }

    async fn remove(&self, filter: Document, just_one: bool) -> DocumentStoreResult<bool> {
        self.record("remove");
        self.inner.remove(filter, just_one).await
    }

    async fn drop(&self) -> DocumentStoreResult<()> {
        CollectionBackend::drop(&*self.inner).await
    }
}

#[async_trait]
impl StoreBackend for RecordingStore {
    fn collection(&self, name: &str) -> Arc<dyn CollectionBackend> {
        Arc::new(RecordingCollection {
            inner: self.inner.collection(name),
            writes: self.writes.clone(),
        })
    }

    async fn run_command(&self, command: Document) -> DocumentStoreResult<Document> {
        self.inner.run_command(command).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.inner.list_collections().await
    }
}

pub fn recording_store() -> (DocumentStore, RecordingStore) {
    let backend = RecordingStore::default();

    (DocumentStore::new(backend.clone()), backend)
}

pub fn write(collection: &str, operation: &'static str) -> Write {
    (collection.to_string(), operation)
}
