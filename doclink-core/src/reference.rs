//! Cross-collection references.
//!
//! A [`Reference`] points at another entity by collection name and identifier.
//! It is stored as a DBRef-shaped sub-document (`{"$ref": .., "$id": ..}`) so
//! that it can be told apart from ordinary nested documents when an entity is
//! read back from storage.

use bson::{Bson, Document, doc, oid::ObjectId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key holding the target collection inside a stored reference.
pub const REF_KEY: &str = "$ref";
/// Key holding the target identifier inside a stored reference.
pub const ID_KEY: &str = "$id";
/// Optional key holding the target database inside a stored reference.
pub const DB_KEY: &str = "$db";

/// An immutable pointer to an entity in another (or the same) collection.
///
/// Equality is structural: two references are equal when both the collection
/// name and the identifier match.
///
/// # Example
///
/// ```ignore
/// use doclink::reference::Reference;
/// use bson::oid::ObjectId;
///
/// let owner = Reference::new("users", ObjectId::new());
/// let stored = owner.to_document();
/// assert_eq!(Reference::from_document(&stored), Some(owner));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "$ref")]
    collection: String,
    #[serde(rename = "$id")]
    id: ObjectId,
}

impl Reference {
    /// Creates a reference to the entity `id` in `collection`.
    pub fn new(collection: impl Into<String>, id: ObjectId) -> Self {
        Self { collection: collection.into(), id }
    }

    /// Returns the name of the referenced collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the identifier of the referenced entity.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns the stored (DBRef) form of this reference.
    pub fn to_document(&self) -> Document {
        doc! {
            REF_KEY: self.collection.as_str(),
            ID_KEY: self.id,
        }
    }

    /// Returns `true` if `document` has the shape of a stored reference.
    ///
    /// Only `$ref`, `$id` and an optional `$db` key are allowed, so operator
    /// documents such as `{"$in": [..]}` are never mistaken for references.
    pub fn is_reference(document: &Document) -> bool {
        matches!(document.get(REF_KEY), Some(Bson::String(_)))
            && document.contains_key(ID_KEY)
            && document
                .keys()
                .all(|key| key == REF_KEY || key == ID_KEY || key == DB_KEY)
    }

    /// Parses the stored form back into a reference.
    ///
    /// Accepts both a typed identifier and its hexadecimal string form under
    /// `$id`. Returns `None` when the document is not a reference.
    pub fn from_document(document: &Document) -> Option<Self> {
        if !Self::is_reference(document) {
            return None;
        }

        let collection = document.get_str(REF_KEY).ok()?;
        let id = match document.get(ID_KEY)? {
            Bson::ObjectId(id) => *id,
            Bson::String(hex) => ObjectId::parse_str(hex).ok()?,
            _ => return None,
        };

        Some(Self::new(collection, id))
    }
}

impl From<Reference> for Bson {
    fn from(reference: Reference) -> Self {
        Bson::Document(reference.to_document())
    }
}

impl fmt::Display for Reference {
    /// Formats the reference as relaxed extended JSON.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Bson::Document(self.to_document()).into_relaxed_extjson())
    }
}
