//! Main doclink crate providing a unified interface for object-document mapping.
//!
//! This crate is the primary entry point for users of the doclink framework.
//! It re-exports the core types from the sub-crates and provides convenient
//! access to the storage backends.
//!
//! # Features
//!
//! - **Entities** - Mutable records with dirty tracking, saved depth-first with their embedded entities
//! - **Lazy references** - Reference fields resolve to entities on first access
//! - **Query builder** - Incremental filters whose operator conditions are merged per field
//! - **Typed models** - Serde types bound to a collection
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use doclink::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!
//!     let author = store.entity("authors", [("name", Value::from("Ursula"))])?;
//!     let mut book = store.entity("books", [
//!         ("title", Value::from("The Dispossessed")),
//!         ("author", Value::from(author)),
//!     ])?;
//!
//!     // Saves the author, then the book with a reference to it.
//!     book.save().await?;
//!
//!     let mut found = store
//!         .query("books")
//!         .contains("title", "dispossessed")
//!         .find_one()
//!         .await?;
//!
//!     // Resolves the reference with one lookup in "authors".
//!     let author = found.get_entity("author").await?;
//!     println!("{author:?}");
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Logical groups
//!
//! ```ignore
//! let staff = store
//!     .query("users")
//!     .equals("active", true)
//!     .or(|q| q.equals("role", "admin").equals("team", "ops"))
//!     .sort_by("name", true)
//!     .find()
//!     .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use doclink_core::{backend, collection, config, document, entity, error, query, reference, store, value};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use doclink_memory::{InMemoryCollection, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use doclink_mongodb::{MongoDbCollection, MongoDbStore, MongoDbStoreBuilder};
}
