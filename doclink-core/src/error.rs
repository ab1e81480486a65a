//! Error types and result types for document mapping operations.
//!
//! Use [`DocumentStoreResult<T>`] as the return type for fallible operations.
//! Errors raised by a storage backend are carried through unchanged; the
//! variants specific to this layer describe query construction mistakes,
//! missing records and rejected writes.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when building queries,
/// resolving references or persisting entities.
#[derive(Error, Debug, Clone)]
pub enum DocumentStoreError {
    /// A `find_one`, `find_by_id` or reference resolution matched zero records.
    #[error("No document found in collection {collection} matching {filter}")]
    NotFound {
        /// The collection that was queried.
        collection: String,
        /// The optimized filter that matched nothing.
        filter: String,
    },
    /// The operator kind passed to [`Query::operator`](crate::query::Query::operator) is not supported.
    #[error("Invalid operator kind: {0}")]
    InvalidOperatorKind(String),
    /// The logical kind passed to [`Query::subquery`](crate::query::Query::subquery) is not one of `and`, `or`, `nor`.
    #[error("Unsupported logical kind: {0}")]
    UnsupportedLogicalKind(String),
    /// The storage backend did not accept a create or update write.
    #[error("Saving to collection {collection} failed: {reason}")]
    SaveFailed {
        /// The collection the entity is bound to.
        collection: String,
        /// Why the write was rejected.
        reason: String,
    },
    /// A value could not be coerced into an identifier.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    /// A bare equality and an operator condition were both added for the same field.
    #[error("Conflicting equality and operator conditions on field {0}")]
    ConflictingConditions(String),
    /// An operation that needs a stored identifier was called on an entity without one.
    #[error("Entity in collection {0} has no identifier")]
    MissingIdentifier(String),
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The document has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for document mapping operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
