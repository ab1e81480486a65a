use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{Bson, Document, oid::ObjectId};
use mongodb::{
    Client, Collection as MongoCollection,
    error::{ErrorKind, WriteFailure},
    options::{ClientOptions, CountOptions, FindOneOptions, FindOptions as MongoFindOptions},
};
use std::sync::Arc;
use tracing::debug;

use doclink_core::{
    backend::{CollectionBackend, FindOptions, StoreBackend, StoreBackendBuilder},
    config::StoreConfig,
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::query::normalize_filter;


#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }
}

/// Handle to one MongoDB collection.
#[derive(Debug)]
pub struct MongoDbCollection {
    name: String,
    collection: MongoCollection<Document>,
}

fn backend_error(e: mongodb::error::Error) -> DocumentStoreError {
    DocumentStoreError::Backend(e.to_string())
}

const DUPLICATE_KEY: i32 = 11000;

/// Maps a duplicate key rejection to [`DocumentStoreError::DocumentAlreadyExists`].
fn write_error(e: mongodb::error::Error, collection: &str) -> DocumentStoreError {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) if failure.code == DUPLICATE_KEY => {
            DocumentStoreError::DocumentAlreadyExists(failure.message.clone(), collection.to_string())
        }
        _ => backend_error(e),
    }
}

#[async_trait]
impl CollectionBackend for MongoDbCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        let mut find_options = MongoFindOptions::default();
        find_options.sort = options.sort;
        find_options.projection = options.projection;
        find_options.limit = options.limit.map(|limit| limit as i64);
        find_options.skip = options.skip;

        self.collection
            .find(normalize_filter(filter))
            .with_options(find_options)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn find_one(
        &self,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        let mut find_options = FindOneOptions::default();
        find_options.sort = options.sort;
        find_options.projection = options.projection;
        find_options.skip = options.skip;

        self.collection
            .find_one(normalize_filter(filter))
            .with_options(find_options)
            .await
            .map_err(backend_error)
    }

    async fn count(
        &self,
        filter: Document,
        limit: Option<u64>,
        skip: Option<u64>,
    ) -> DocumentStoreResult<u64> {
        let mut count_options = CountOptions::default();
        count_options.limit = limit;
        count_options.skip = skip;

        self.collection
            .count_documents(normalize_filter(filter))
            .with_options(count_options)
            .await
            .map_err(backend_error)
    }

    async fn insert(&self, document: Document) -> DocumentStoreResult<ObjectId> {
        let result = self.collection
            .insert_one(document)
            .await
            .map_err(|e| write_error(e, &self.name))?;

        match result.inserted_id {
            Bson::ObjectId(id) => Ok(id),
            other => Err(DocumentStoreError::InvalidIdentifier(other.to_string())),
        }
    }

    async fn update(&self, filter: Document, document: Document) -> DocumentStoreResult<bool> {
        let result = self.collection
            .replace_one(normalize_filter(filter), document)
            .await
            .map_err(backend_error)?;

        Ok(result.matched_count > 0)
    }

    async fn remove(&self, filter: Document, just_one: bool) -> DocumentStoreResult<bool> {
        let filter = normalize_filter(filter);

        let deleted = if just_one {
            self.collection
                .delete_one(filter)
                .await
                .map_err(backend_error)?
                .deleted_count
        } else {
            self.collection
                .delete_many(filter)
                .await
                .map_err(backend_error)?
                .deleted_count
        };

        debug!(collection = %self.name, deleted, "removed documents");

        Ok(true)
    }

    async fn drop(&self) -> DocumentStoreResult<()> {
        self.collection
            .drop()
            .await
            .map_err(backend_error)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    fn collection(&self, name: &str) -> Arc<dyn CollectionBackend> {
        Arc::new(MongoDbCollection {
            name: name.to_string(),
            collection: self.client
                .database(&self.database)
                .collection(name),
        })
    }

    async fn run_command(&self, command: Document) -> DocumentStoreResult<Document> {
        self.client
            .database(&self.database)
            .run_command(command)
            .await
            .map_err(backend_error)
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(backend_error)
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.client
            .clone()
            .shutdown()
            .await;

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }

    /// Creates a builder from a store configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Initialization`] if the configuration has no uri.
    pub fn from_config(config: &StoreConfig) -> DocumentStoreResult<Self> {
        Ok(Self::new(config.require_uri()?, &config.database))
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        debug!(database = %self.database, "connecting to mongodb");

        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_a_uri() {
        let config = StoreConfig::new("app");

        assert!(matches!(
            MongoDbStoreBuilder::from_config(&config),
            Err(DocumentStoreError::Initialization(_))
        ));

        let builder = MongoDbStoreBuilder::from_config(&config.with_uri("mongodb://localhost:27017")).unwrap();
        assert_eq!(builder.dsn, "mongodb://localhost:27017");
        assert_eq!(builder.database, "app");
    }
}
