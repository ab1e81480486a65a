//! Typed records bound to a collection.
//!
//! Entities are dynamic field maps. When a record has a fixed shape, implement
//! [`Model`] on a serde type and convert between it and entities with
//! [`Entity::from_model`](crate::entity::Entity::from_model) and
//! [`Entity::to_model`](crate::entity::Entity::to_model).
//!
//! # Example
//!
//! ```ignore
//! use doclink::document::Model;
//! use bson::oid::ObjectId;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//! }
//!
//! impl Model for User {
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//! }
//! ```

use bson::{
    Document, Bson,
    de::deserialize_from_document,
    ser::{serialize_to_bson, serialize_to_document},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, from_value, to_value};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A serde type stored in a named collection.
pub trait Model: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static {
    /// Returns the name of the collection this model is stored in.
    fn collection_name() -> &'static str;
}

/// Conversion helpers available on every [`Model`].
pub trait ModelExt: Model {
    /// Serializes this model into a stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or does not yield a document.
    fn to_document(&self) -> DocumentStoreResult<Document>;

    /// Deserializes a model from a stored document.
    fn from_document(document: Document) -> DocumentStoreResult<Self>;

    /// Converts this model to a JSON value.
    fn to_json(&self) -> DocumentStoreResult<JsonValue>;

    /// Creates a model from a JSON value.
    fn from_json(value: JsonValue) -> DocumentStoreResult<Self>;
}

impl<M: Model> ModelExt for M {
    fn to_document(&self) -> DocumentStoreResult<Document> {
        Ok(serialize_to_document(self)?)
    }

    fn from_document(document: Document) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_document(document)?)
    }

    fn to_json(&self) -> DocumentStoreResult<JsonValue> {
        Ok(to_value(self)?)
    }

    fn from_json(value: JsonValue) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}

/// Converts a stored document into relaxed extended JSON.
pub fn document_to_json(document: Document) -> JsonValue {
    Bson::Document(document).into_relaxed_extjson()
}

/// Converts a JSON object into a stored document.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidDocument`] if `value` is not an object.
pub fn document_from_json(value: JsonValue) -> DocumentStoreResult<Document> {
    match serialize_to_bson(&value)? {
        Bson::Document(document) => Ok(document),
        other => Err(DocumentStoreError::InvalidDocument(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Book {
        #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
        id: Option<ObjectId>,
        title: String,
        pages: i32,
    }

    impl Model for Book {
        fn collection_name() -> &'static str {
            "books"
        }
    }

    #[test]
    fn models_convert_to_documents() {
        let book = Book { id: None, title: "Dune".into(), pages: 412 };
        let document = book.to_document().unwrap();

        assert_eq!(document, doc! { "title": "Dune", "pages": 412 });
        assert_eq!(Book::from_document(document).unwrap(), book);
    }

    #[test]
    fn json_objects_convert_to_documents() {
        let document = document_from_json(json!({ "title": "Dune", "tags": ["scifi"] })).unwrap();

        assert_eq!(document.get_str("title").unwrap(), "Dune");
        assert!(document_from_json(json!([1, 2])).is_err());
    }
}
