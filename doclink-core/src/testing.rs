//! Minimal backend for unit tests: equality filters only, and a log of reads and writes.

use async_trait::async_trait;
use bson::{Document, doc, oid::ObjectId};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    backend::{CollectionBackend, FindOptions, StoreBackend},
    error::DocumentStoreResult,
};

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Vec<Document>>,
    reads: usize,
    writes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBackend {
    state: Arc<Mutex<State>>,
}

impl FakeBackend {
    /// Number of find and count calls issued so far.
    pub(crate) fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    /// Collection names of every insert and update, in order.
    pub(crate) fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub(crate) fn stored(&self, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct FakeCollection {
    name: String,
    state: Arc<Mutex<State>>,
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, value)| document.get(key) == Some(value))
}

#[async_trait]
impl CollectionBackend for FakeCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;

        let found = state
            .collections
            .get(&self.name)
            .into_iter()
            .flatten()
            .filter(|document| matches(document, &filter))
            .skip(options.skip.unwrap_or(0) as usize)
            .take(options.limit.map_or(usize::MAX, |limit| limit as usize))
            .cloned()
            .collect();

        Ok(found)
    }

    async fn find_one(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<Option<Document>> {
        Ok(self
            .find(filter, FindOptions { limit: Some(1), ..options })
            .await?
            .pop())
    }

    async fn count(&self, filter: Document, limit: Option<u64>, skip: Option<u64>) -> DocumentStoreResult<u64> {
        let found = self
            .find(filter, FindOptions { limit, skip, ..FindOptions::default() })
            .await?;

        Ok(found.len() as u64)
    }

    async fn insert(&self, mut document: Document) -> DocumentStoreResult<ObjectId> {
        let id = match document.get_object_id("_id") {
            Ok(id) => id,
            Err(_) => {
                let id = ObjectId::new();
                document.insert("_id", id);
                id
            }
        };

        let mut state = self.state.lock().unwrap();
        state.writes.push(self.name.clone());
        state
            .collections
            .entry(self.name.clone())
            .or_default()
            .push(document);

        Ok(id)
    }

    async fn update(&self, filter: Document, document: Document) -> DocumentStoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        state.writes.push(self.name.clone());

        let target = state
            .collections
            .get_mut(&self.name)
            .and_then(|documents| documents.iter_mut().find(|stored| matches(stored, &filter)));

        match target {
            Some(stored) => {
                let id = stored.get("_id").cloned();
                *stored = document;
                if let Some(id) = id {
                    stored.insert("_id", id);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, filter: Document, just_one: bool) -> DocumentStoreResult<bool> {
        let mut state = self.state.lock().unwrap();

        if let Some(documents) = state.collections.get_mut(&self.name) {
            match documents.iter().position(|stored| matches(stored, &filter)) {
                Some(index) if just_one => {
                    documents.remove(index);
                }
                _ => documents.retain(|stored| !matches(stored, &filter)),
            }
        }

        Ok(true)
    }

    async fn drop(&self) -> DocumentStoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .collections
            .remove(&self.name);

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for FakeBackend {
    fn collection(&self, name: &str) -> Arc<dyn CollectionBackend> {
        Arc::new(FakeCollection {
            name: name.to_string(),
            state: self.state.clone(),
        })
    }

    async fn run_command(&self, _command: Document) -> DocumentStoreResult<Document> {
        Ok(doc! { "ok": 1 })
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        Ok(self.state.lock().unwrap().collections.keys().cloned().collect())
    }
}
