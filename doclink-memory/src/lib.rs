//! In-memory document storage backend for doclink.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Filter evaluation** - Interprets the operator documents the query builder produces
//! - **Sorting and projection** - Type-ordered sorts, skip/limit, field exclusion and `$slice`
//! - **Commands** - Minimal `ping`, `count`, `drop` and `listCollections` support
//!
//! # Quick Start
//!
//! ```ignore
//! use doclink::{memory::InMemoryStore, store::DocumentStore, value::Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DocumentStore::new(InMemoryStore::new());
//!
//!     let mut user = store.entity("users", [("name", Value::from("Alice"))])?;
//!     user.save().await?;
//!
//!     let alice = store.query("users").equals("name", "Alice").find_one().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod store;
pub mod evaluator;

pub use store::{InMemoryCollection, InMemoryStore, InMemoryStoreBuilder};
