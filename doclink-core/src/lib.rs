//! A lightweight object-document mapping layer for document databases.
//!
//! This crate is the core of the doclink project and provides:
//!
//! - **Values** ([`value`]) - Field values, identifiers, timestamps and pattern markers
//! - **References** ([`reference`]) - Pointers from one record to another, stored as `{$ref, $id}`
//! - **Query builder** ([`query`]) - Incremental filter, sort and projection construction with a merge pass
//! - **Entities** ([`entity`]) - Mutable records with dirty tracking and lazy reference resolution
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing different storage backends
//! - **Collections** ([`collection`]) - Collection handles and the registry caching them
//! - **Document store** ([`store`]) - The context queries and entities run against
//! - **Typed models** ([`document`]) - Serde types bound to a collection
//! - **Configuration** ([`config`]) - Store settings, loadable from JSON
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use doclink_core::{store::DocumentStore, value::Value};
//!
//! let store = DocumentStore::new(backend);
//!
//! let mut user = store.entity("users", [("name", Value::from("Alice")), ("age", Value::from(30))])?;
//! user.save().await?;
//!
//! let adults = store
//!     .query("users")
//!     .greater_or_equal("age", 18)
//!     .find()
//!     .await?;
//! ```

pub mod backend;
pub mod collection;
pub mod config;
pub mod document;
pub mod entity;
pub mod error;
pub mod query;
pub mod reference;
pub mod store;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use entity::Entity;
pub use error::{DocumentStoreError, DocumentStoreResult};
pub use query::Query;
pub use reference::Reference;
pub use store::DocumentStore;
pub use value::Value;
