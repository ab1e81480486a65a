//! MongoDB backend implementation for doclink.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait,
//! enabling persistent document storage that executes the query builder's filters on the MongoDB query engine.
//! 
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//! 
//! ```toml
//! [dependencies]
//! doclink = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data is persisted to MongoDB Atlas or self-hosted MongoDB
//! - **Full query support** - Leverages MongoDB's query engine for filtering and sorting
//! - **Async/await** - Fully asynchronous API built on MongoDB's async driver
//! - **Filter normalization** - Logical groups are rewritten into the array form MongoDB expects
//!
//! # Connection
//!
//! To use this backend, you need a MongoDB connection string. This can be provided
//! through the builder pattern, or taken from a [`StoreConfig`](doclink_core::config::StoreConfig)
//! with [`MongoDbStoreBuilder::from_config`].
//!
//! # Example
//!
//! ```ignore
//! use doclink::{backend::StoreBackendBuilder, mongodb::MongoDbStore, store::DocumentStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!     let store = DocumentStore::new(backend);
//!
//!     let count = store.query("users").count_all().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod store;
pub(crate) mod query;

pub use store::{MongoDbCollection, MongoDbStore, MongoDbStoreBuilder};
