//! Entities: mutable records bound to a collection.
//!
//! An [`Entity`] is an ordered map of named [`Value`]s plus two flags:
//!
//! - `is_new`: the record has never been written, so `save` inserts it.
//! - `is_dirty`: the in-memory fields differ from what was last written.
//!
//! Fields holding a [`Reference`] are resolved lazily on first access with
//! [`Entity::get`] or [`Entity::get_entity`], and the resolved entity replaces
//! the reference in the field map for the rest of the entity's lifetime.
//!
//! Entities are single-owner values. They are not meant to be mutated from
//! several tasks at once; clone them instead.
//!
//! # Example
//!
//! ```ignore
//! let mut author = store.entity("authors", [("name", "Ursula".into())])?;
//! let mut book = store.entity("books", [("title", "The Dispossessed".into())])?;
//! book.set("author", author)?;
//!
//! // Saves the author first, then the book with a reference to it.
//! book.save().await?;
//!
//! let mut found = store.query("books").find_by_id(book.id()).await?;
//! let author = found.get_entity("author").await?;
//! ```
//!
//! # Arrays and nested maps
//!
//! Values returned by [`Entity::get`] are snapshots. Changing a returned array
//! does not change the entity; write it back with [`Entity::replace`] or call
//! [`Entity::mark_dirty`] after mutating a field in place.

use bson::{Bson, Document, doc, oid::ObjectId};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value as JsonValue;
use std::fmt;
use tracing::{debug, warn};

use crate::{
    document::{Model, ModelExt, document_to_json},
    error::{DocumentStoreError, DocumentStoreResult},
    query::Query,
    reference::Reference,
    store::DocumentStore,
    value::{
        Fields, ID_FIELD, TimeZone, Value, canonical_field, fields_from_document, fields_into_document,
        normalize,
    },
};

/// A record bound to a named collection.
#[derive(Clone)]
pub struct Entity {
    store: DocumentStore,
    collection: String,
    fields: Fields,
    is_new: bool,
    is_dirty: bool,
    time_zone: TimeZone,
}

/// Builder for [`Entity`] values.
///
/// By default the entity is new and dirty, its initial fields go through the
/// same coercion as [`Entity::set`], and it uses the store's default time zone.
pub struct EntityBuilder {
    store: DocumentStore,
    collection: String,
    fields: Vec<(String, Value)>,
    raw: bool,
    saved: bool,
    time_zone: Option<TimeZone>,
}

impl EntityBuilder {
    /// Adds initial fields.
    pub fn fields<K, I>(mut self, fields: I) -> Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        self.fields.extend(
            fields
                .into_iter()
                .map(|(key, value)| (key.as_ref().to_string(), value))
        );
        self
    }

    /// Adds a single initial field.
    pub fn field(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.push((field.to_string(), value.into()));
        self
    }

    /// Takes the initial fields verbatim, as already stored values.
    ///
    /// A raw entity is not new: saving it issues an update.
    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Marks the entity as matching what is stored, so it starts clean.
    pub fn saved(mut self, saved: bool) -> Self {
        self.saved = saved;
        self
    }

    /// Overrides the time zone timestamps are presented in.
    pub fn time_zone(mut self, zone: TimeZone) -> Self {
        self.time_zone = Some(zone);
        self
    }

    /// Builds the entity.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidIdentifier`] if a non-raw `id`
    /// field cannot be coerced into an identifier.
    pub fn build(self) -> DocumentStoreResult<Entity> {
        let mut fields = Fields::with_capacity(self.fields.len());

        for (field, value) in self.fields {
            if self.raw {
                fields.insert(field, value);
            } else {
                let (field, value) = normalize(&field, value)?;
                fields.insert(field, value);
            }
        }

        Ok(Entity {
            time_zone: self
                .time_zone
                .unwrap_or_else(|| self.store.default_time_zone()),
            store: self.store,
            collection: self.collection,
            fields,
            is_new: !self.raw,
            is_dirty: !self.saved,
        })
    }
}

impl Entity {
    /// Starts building an entity in `collection`.
    pub fn builder(store: &DocumentStore, collection: impl Into<String>) -> EntityBuilder {
        EntityBuilder {
            store: store.clone(),
            collection: collection.into(),
            fields: Vec::new(),
            raw: false,
            saved: false,
            time_zone: None,
        }
    }

    /// Wraps a document returned by storage. The entity is neither new nor dirty.
    pub fn from_storage(store: &DocumentStore, collection: impl Into<String>, document: Document) -> Self {
        Entity {
            store: store.clone(),
            collection: collection.into(),
            fields: fields_from_document(document),
            is_new: false,
            is_dirty: false,
            time_zone: store.default_time_zone(),
        }
    }

    /// Creates a new, unsaved entity from a typed model.
    pub fn from_model<M: Model>(store: &DocumentStore, model: &M) -> DocumentStoreResult<Self> {
        let document = model.to_document()?;

        Entity::builder(store, M::collection_name())
            .fields(fields_from_document(document))
            .build()
    }

    /// Deserializes the stored form of this entity into a typed model.
    ///
    /// Embedded entities appear as references.
    pub fn to_model<M: Model>(&self) -> DocumentStoreResult<M> {
        M::from_document(fields_into_document(self.fields.clone()))
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Returns `true` until the entity has been inserted.
    pub fn is_new_record(&self) -> bool {
        self.is_new
    }

    /// Returns `true` if in-memory fields differ from what was last written.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn is_saved(&self) -> bool {
        !self.is_dirty
    }

    /// Returns the time zone timestamps are presented in.
    pub fn time_zone(&self) -> TimeZone {
        self.time_zone
    }

    /// Returns the stored field map.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Returns the stored value of a field without resolving or converting it.
    pub fn peek(&self, field: &str) -> Option<&Value> {
        self.fields.get(canonical_field(field))
    }

    /// Returns the identifier if one is set, without generating it.
    pub fn stored_id(&self) -> Option<ObjectId> {
        self.fields
            .get(ID_FIELD)
            .and_then(Value::as_id)
    }

    /// Returns the identifier, generating and storing one if none is set.
    ///
    /// Generating an identifier marks the entity dirty.
    pub fn id(&mut self) -> ObjectId {
        if let Some(id) = self.stored_id() {
            return id;
        }

        let id = ObjectId::new();
        self.fields.insert(ID_FIELD.to_string(), Value::Id(id));
        self.is_dirty = true;

        id
    }

    /// Reads a field.
    ///
    /// - `id` returns the identifier, generating one if needed (see [`Entity::id`]).
    /// - Timestamps are returned as [`Value::Zoned`] in the entity's time zone.
    /// - References are resolved, and the resolved entity is kept in the field.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::NotFound`] if a referenced record no longer
    /// exists, or any backend error raised while resolving it.
    pub async fn get(&mut self, field: &str) -> DocumentStoreResult<Option<Value>> {
        let field = canonical_field(field);

        if field == ID_FIELD {
            return Ok(Some(Value::Id(self.id())));
        }

        self.resolve_field(field).await?;

        Ok(self.fields
            .get(field)
            .map(|value| match value {
                Value::Timestamp(timestamp) => Value::Zoned(timestamp.in_time_zone(&self.time_zone)),
                other => other.clone(),
            }))
    }

    /// Returns the entity stored in a field, resolving a reference first.
    ///
    /// The returned entity is the one held in the field map, so changes made
    /// through it are seen by later reads and written by the next save of the
    /// parent, provided the parent is dirty.
    pub async fn get_entity(&mut self, field: &str) -> DocumentStoreResult<Option<&mut Entity>> {
        let field = canonical_field(field);
        self.resolve_field(field).await?;

        Ok(self.fields
            .get_mut(field)
            .and_then(Value::as_entity_mut))
    }

    /// Writes a field and marks the entity dirty.
    ///
    /// Returns the value as stored after coercion.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidIdentifier`] if `id` is given a value
    /// that is not an identifier.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> DocumentStoreResult<Value> {
        let (field, value) = normalize(field, value.into())?;

        self.is_dirty = true;
        self.fields.insert(field, value.clone());

        Ok(value)
    }

    /// Alias for [`Entity::set`], meant for writing back a modified array or map.
    pub fn replace(&mut self, field: &str, value: impl Into<Value>) -> DocumentStoreResult<Value> {
        self.set(field, value)
    }

    /// Marks the entity dirty, for when a field was changed in place.
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Returns `true` if the field is set to a non-null value. `id` is an alias for `_id`.
    pub fn has(&self, field: &str) -> bool {
        self.peek(field)
            .is_some_and(|value| !value.is_null())
    }

    /// Removes a field, marking the entity dirty if it was present.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let removed = self.fields.shift_remove(canonical_field(field));

        if removed.is_some() {
            self.is_dirty = true;
        }

        removed
    }

    /// Returns a reference to this entity, generating an identifier if needed.
    pub fn as_reference(&mut self) -> Reference {
        Reference::new(self.collection.clone(), self.id())
    }

    /// Returns the field map as a document.
    ///
    /// With `resolve`, references are resolved and embedded entities expanded
    /// recursively. Without it, embedded entities are reduced to references.
    pub fn as_map(&mut self, resolve: bool) -> BoxFuture<'_, DocumentStoreResult<Document>> {
        async move {
            let mut document = Document::new();
            let names = self.fields.keys().cloned().collect::<Vec<_>>();

            for name in names {
                if resolve {
                    self.resolve_field(&name).await?;
                }

                let Some(value) = self.fields.get_mut(&name) else {
                    continue;
                };

                let value = if resolve {
                    expand_embedded(value).await?
                } else {
                    reduce_embedded(value)
                };

                document.insert(name, value);
            }

            Ok(document)
        }
        .boxed()
    }

    /// Returns [`Entity::as_map`] as relaxed extended JSON.
    pub async fn to_json(&mut self, resolve: bool) -> DocumentStoreResult<JsonValue> {
        Ok(document_to_json(self.as_map(resolve).await?))
    }

    /// Deletes this entity from storage and resets it to an empty, new record.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::MissingIdentifier`] if the entity has no
    /// identifier, or any backend error.
    pub async fn delete(&mut self) -> DocumentStoreResult<bool> {
        let id = self
            .stored_id()
            .ok_or_else(|| DocumentStoreError::MissingIdentifier(self.collection.clone()))?;

        debug!(collection = %self.collection, %id, "deleting entity");

        let removed = self.store
            .collection(&self.collection)
            .await
            .remove(doc! { "_id": id }, true)
            .await?;

        if removed {
            self.fields.clear();
            self.is_new = true;
            self.is_dirty = false;
        }

        Ok(removed)
    }

    /// Writes this entity to storage if it is dirty.
    ///
    /// Embedded entities, including those inside arrays and maps, are saved
    /// first, depth-first, and written as references. A new entity is inserted and takes the identifier storage
    /// returns; an existing one replaces the record with the same `_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::SaveFailed`] if storage refuses the write
    /// (a duplicate identifier, an invalid document, or an update that matched
    /// nothing). Other backend errors are returned unchanged. On any error the
    /// entity stays dirty so the save can be retried.
    pub fn save(&mut self) -> BoxFuture<'_, DocumentStoreResult<bool>> {
        async move {
            if !self.is_dirty {
                return Ok(true);
            }

            let mut document = Document::new();

            for (name, value) in self.fields.iter_mut() {
                document.insert(name.clone(), save_embedded(value).await?);
            }

            let collection = self.store.collection(&self.collection).await;

            if self.is_new {
                debug!(collection = %self.collection, "inserting entity");

                let id = collection
                    .insert(document)
                    .await
                    .map_err(|err| self.rejected(err))?;

                self.fields.insert(ID_FIELD.to_string(), Value::Id(id));
            } else {
                let id = self
                    .stored_id()
                    .ok_or_else(|| self.save_failed("entity has no identifier".to_string()))?;

                debug!(collection = %self.collection, %id, "updating entity");

                let matched = collection
                    .update(doc! { "_id": id }, document)
                    .await
                    .map_err(|err| self.rejected(err))?;

                if !matched {
                    return Err(self.save_failed(format!("no record with _id {id}")));
                }
            }

            self.is_new = false;
            self.is_dirty = false;

            Ok(true)
        }
        .boxed()
    }

    fn save_failed(&self, reason: String) -> DocumentStoreError {
        warn!(collection = %self.collection, %reason, "save rejected");

        DocumentStoreError::SaveFailed {
            collection: self.collection.clone(),
            reason,
        }
    }

    /// Turns a write the backend refused into [`DocumentStoreError::SaveFailed`].
    fn rejected(&self, err: DocumentStoreError) -> DocumentStoreError {
        match err {
            DocumentStoreError::DocumentAlreadyExists(..)
            | DocumentStoreError::InvalidDocument(_)
            | DocumentStoreError::InvalidIdentifier(_) => self.save_failed(err.to_string()),
            other => other,
        }
    }

    /// Replaces a reference held in `field` with the entity it points to.
    async fn resolve_field(&mut self, field: &str) -> DocumentStoreResult<()> {
        let Some(Value::Reference(reference)) = self.fields.get(field) else {
            return Ok(());
        };

        let reference = reference.clone();
        debug!(
            collection = %self.collection,
            field,
            target = reference.collection(),
            id = %reference.id(),
            "resolving reference"
        );

        let resolved = Query::new(&self.store, reference.collection())
            .find_by_id(reference.id())
            .await?;

        self.fields
            .insert(field.to_string(), Value::Entity(Box::new(resolved)));

        Ok(())
    }
}

/// Saves entities embedded in `value`, inside arrays and maps too, and returns
/// the stored form with each of them reduced to a reference.
fn save_embedded(value: &mut Value) -> BoxFuture<'_, DocumentStoreResult<Bson>> {
    async move {
        match value {
            Value::Entity(nested) => {
                nested.save().await?;
                Ok(Bson::from(nested.as_reference()))
            }
            Value::Array(items) => {
                let mut stored = Vec::with_capacity(items.len());

                for item in items.iter_mut() {
                    stored.push(save_embedded(item).await?);
                }

                Ok(Bson::Array(stored))
            }
            Value::Map(fields) => {
                let mut stored = Document::new();

                for (name, item) in fields.iter_mut() {
                    stored.insert(name.clone(), save_embedded(item).await?);
                }

                Ok(Bson::Document(stored))
            }
            other => Ok(other.to_bson()),
        }
    }
    .boxed()
}

/// Expands embedded entities at any depth into their field maps.
fn expand_embedded(value: &mut Value) -> BoxFuture<'_, DocumentStoreResult<Bson>> {
    async move {
        match value {
            Value::Entity(nested) => Ok(Bson::Document(nested.as_map(true).await?)),
            Value::Array(items) => {
                let mut expanded = Vec::with_capacity(items.len());

                for item in items.iter_mut() {
                    expanded.push(expand_embedded(item).await?);
                }

                Ok(Bson::Array(expanded))
            }
            Value::Map(fields) => {
                let mut expanded = Document::new();

                for (name, item) in fields.iter_mut() {
                    expanded.insert(name.clone(), expand_embedded(item).await?);
                }

                Ok(Bson::Document(expanded))
            }
            other => Ok(other.to_bson()),
        }
    }
    .boxed()
}

/// Reduces embedded entities at any depth to references. Identifiers generated
/// on the way are kept by the embedded entities.
fn reduce_embedded(value: &mut Value) -> Bson {
    match value {
        Value::Entity(nested) => nested.as_reference().into(),
        Value::Array(items) => Bson::Array(
            items
                .iter_mut()
                .map(reduce_embedded)
                .collect()
        ),
        Value::Map(fields) => Bson::Document(
            fields
                .iter_mut()
                .map(|(name, item)| (name.clone(), reduce_embedded(item)))
                .collect()
        ),
        other => other.to_bson(),
    }
}

impl PartialEq for Entity {
    /// Entities are equal when they belong to the same collection and hold the same fields.
    fn eq(&self, other: &Self) -> bool {
        self.collection == other.collection && self.fields == other.fields
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("collection", &self.collection)
            .field("fields", &self.fields)
            .field("is_new", &self.is_new)
            .field("is_dirty", &self.is_dirty)
            .field("time_zone", &self.time_zone)
            .finish()
    }
}

impl fmt::Display for Entity {
    /// Prints the reference to this entity as JSON, or `null` if it has no identifier yet.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stored_id() {
            Some(id) => write!(f, "{}", Reference::new(self.collection.clone(), id)),
            None => f.write_str("null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone as _};

    use super::*;
    use crate::{testing::FakeBackend, value::Timestamp};

    fn store() -> (DocumentStore, FakeBackend) {
        let backend = FakeBackend::default();
        (DocumentStore::new(backend.clone()), backend)
    }

    #[test]
    fn fresh_entities_are_new_and_dirty() {
        let (store, _) = store();
        let entity = store
            .entity("users", [("name", Value::from("Alice"))])
            .unwrap();

        assert!(entity.is_new_record());
        assert!(entity.is_dirty());
    }

    #[test]
    fn raw_saved_entities_start_clean() {
        let (store, _) = store();
        let entity = Entity::builder(&store, "users")
            .field("name", "Alice")
            .raw(true)
            .saved(true)
            .build()
            .unwrap();

        assert!(!entity.is_new_record());
        assert!(entity.is_saved());
    }

    #[test]
    fn reading_id_materializes_it_once() {
        let (store, _) = store();
        let mut entity = Entity::from_storage(&store, "users", doc! { "name": "Alice" });

        assert!(!entity.has("id"));
        let first = entity.id();
        assert!(entity.is_dirty());
        assert_eq!(entity.id(), first);
        assert!(entity.has("_id"));
    }

    #[test]
    fn set_coerces_and_dirties() {
        let (store, _) = store();
        let mut entity = Entity::from_storage(&store, "users", doc! {});
        let hex = "507f191e810c19729de860ea";

        let stored = entity.set("id", hex).unwrap();

        assert_eq!(stored, Value::Id(ObjectId::parse_str(hex).unwrap()));
        assert_eq!(entity.stored_id(), Some(ObjectId::parse_str(hex).unwrap()));
        assert!(entity.is_dirty());
        assert!(entity.set("id", "zzz").is_err());
    }

    #[test]
    fn null_fields_count_as_absent() {
        let (store, _) = store();
        let mut entity = Entity::from_storage(&store, "users", doc! { "nickname": Bson::Null });

        assert!(!entity.has("nickname"));
        assert!(entity.remove("nickname").is_some());
        assert!(entity.is_dirty());
    }

    #[tokio::test]
    async fn timestamps_are_presented_in_entity_zone() {
        let (store, _) = store();
        let zone = FixedOffset::east_opt(9 * 3600).unwrap();
        let stored = Timestamp::from_seconds(0);
        let mut entity = Entity::builder(&store, "events")
            .field("at", stored)
            .time_zone(zone)
            .build()
            .unwrap();

        let presented = entity.get("at").await.unwrap().unwrap();

        assert_eq!(presented, Value::Zoned(zone.timestamp_opt(0, 0).unwrap()));
        assert_eq!(entity.peek("at"), Some(&Value::Timestamp(stored)));
    }

    #[tokio::test]
    async fn references_resolve_once() {
        let (store, backend) = store();
        let id = store
            .collection("authors")
            .await
            .insert(doc! { "name": "Ursula" })
            .await
            .unwrap();
        let mut book = Entity::from_storage(
            &store,
            "books",
            doc! { "author": { "$ref": "authors", "$id": id } },
        );

        let author = book.get_entity("author").await.unwrap().unwrap();
        assert_eq!(author.peek("name"), Some(&Value::from("Ursula")));
        author.set("name", "Le Guin").unwrap();

        let reads = backend.reads();
        let again = book.get("author").await.unwrap().unwrap();

        assert_eq!(backend.reads(), reads);
        assert_eq!(again.as_entity().unwrap().peek("name"), Some(&Value::from("Le Guin")));
        assert!(!book.is_dirty());
    }

    #[tokio::test]
    async fn dangling_references_fail() {
        let (store, _) = store();
        let mut book = Entity::from_storage(
            &store,
            "books",
            doc! { "author": { "$ref": "authors", "$id": ObjectId::new() } },
        );

        let err = book.get("author").await.unwrap_err();

        assert!(matches!(err, DocumentStoreError::NotFound { collection, .. } if collection == "authors"));
    }

    #[tokio::test]
    async fn save_writes_nested_entities_first() {
        let (store, backend) = store();
        let author = store
            .entity("authors", [("name", Value::from("Ursula"))])
            .unwrap();
        let mut book = store
            .entity("books", [("title", Value::from("Lathe")), ("author", Value::from(author))])
            .unwrap();

        assert!(book.save().await.unwrap());

        assert_eq!(backend.writes(), vec!["authors".to_string(), "books".to_string()]);
        assert!(!book.is_new_record());
        assert!(!book.is_dirty());

        let author = book.peek("author").and_then(Value::as_entity).unwrap();
        let stored = backend.stored("books").pop().unwrap();
        assert_eq!(
            stored.get_document("author").unwrap(),
            &doc! { "$ref": "authors", "$id": author.stored_id().unwrap() }
        );
    }

    #[tokio::test]
    async fn save_writes_entities_inside_arrays_and_maps() {
        let (store, backend) = store();
        let tag = store.entity("tags", [("name", Value::from("rust"))]).unwrap();
        let editor = store.entity("people", [("name", Value::from("Ursula"))]).unwrap();
        let mut credits = Fields::new();
        credits.insert("editor".to_string(), Value::from(editor));
        let mut post = store
            .entity("posts", [("tags", Value::Array(vec![Value::from(tag)])), ("credits", Value::Map(credits))])
            .unwrap();

        post.save().await.unwrap();

        assert_eq!(
            backend.writes(),
            vec!["tags".to_string(), "people".to_string(), "posts".to_string()]
        );

        let tag_id = backend.stored("tags")[0].get_object_id("_id").unwrap();
        let editor_id = backend.stored("people")[0].get_object_id("_id").unwrap();
        let stored = backend.stored("posts").pop().unwrap();

        assert_eq!(
            stored.get_array("tags").unwrap(),
            &vec![Bson::Document(doc! { "$ref": "tags", "$id": tag_id })]
        );
        assert_eq!(
            stored.get_document("credits").unwrap(),
            &doc! { "editor": { "$ref": "people", "$id": editor_id } }
        );

        let held = post.peek("tags").and_then(Value::as_array).unwrap();
        assert_eq!(held[0].as_entity().and_then(Entity::stored_id), Some(tag_id));
    }

    #[tokio::test]
    async fn reduced_maps_keep_generated_identifiers() {
        let (store, _) = store();
        let tag = store.entity("tags", [("name", Value::from("rust"))]).unwrap();
        let mut post = store
            .entity("posts", [("tags", Value::Array(vec![Value::from(tag)]))])
            .unwrap();

        let map = post.as_map(false).await.unwrap();
        let held = post.peek("tags").and_then(Value::as_array).unwrap();
        let id = held[0].as_entity().and_then(Entity::stored_id).unwrap();

        assert_eq!(
            map.get_array("tags").unwrap(),
            &vec![Bson::Document(doc! { "$ref": "tags", "$id": id })]
        );
    }

    #[tokio::test]
    async fn saving_a_clean_entity_writes_nothing() {
        let (store, backend) = store();
        let mut entity = store
            .entity("users", [("name", Value::from("Alice"))])
            .unwrap();

        entity.save().await.unwrap();
        entity.save().await.unwrap();
        entity.set("age", 31).unwrap();
        entity.save().await.unwrap();

        assert_eq!(backend.writes().len(), 2);
        assert_eq!(backend.stored("users").len(), 1);
    }

    #[tokio::test]
    async fn failed_updates_leave_entity_dirty() {
        let (store, _) = store();
        let mut entity = Entity::from_storage(&store, "users", doc! { "_id": ObjectId::new() });
        entity.set("name", "Ghost").unwrap();

        let err = entity.save().await.unwrap_err();

        assert!(matches!(err, DocumentStoreError::SaveFailed { .. }));
        assert!(entity.is_dirty());
    }

    #[tokio::test]
    async fn delete_resets_the_entity() {
        let (store, backend) = store();
        let mut entity = store
            .entity("users", [("name", Value::from("Alice"))])
            .unwrap();
        entity.save().await.unwrap();

        assert!(entity.delete().await.unwrap());

        assert!(entity.fields().is_empty());
        assert!(entity.is_new_record());
        assert!(entity.is_saved());
        assert!(backend.stored("users").is_empty());
    }

    #[tokio::test]
    async fn delete_requires_an_identifier() {
        let (store, _) = store();
        let mut entity = store.entity("users", Vec::<(&str, Value)>::new()).unwrap();

        assert!(matches!(
            entity.delete().await,
            Err(DocumentStoreError::MissingIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn as_map_expands_or_references() {
        let (store, _) = store();
        let mut author = store
            .entity("authors", [("name", Value::from("Ursula"))])
            .unwrap();
        let author_id = author.id();
        let mut book = store
            .entity("books", [("author", Value::from(author))])
            .unwrap();

        let expanded = book.as_map(true).await.unwrap();
        let flat = book.as_map(false).await.unwrap();

        assert_eq!(
            expanded.get_document("author").unwrap(),
            &doc! { "name": "Ursula", "_id": author_id }
        );
        assert_eq!(
            flat.get_document("author").unwrap(),
            &doc! { "$ref": "authors", "$id": author_id }
        );
    }

    #[test]
    fn display_prints_the_reference() {
        let (store, _) = store();
        let id = ObjectId::new();
        let entity = Entity::from_storage(&store, "users", doc! { "_id": id });

        let rendered = entity.to_string();

        assert!(rendered.contains(r#""$ref":"users""#));
        assert!(rendered.contains(&id.to_hex()));
        assert_eq!(store.entity("users", [("a", Value::from(1))]).unwrap().to_string(), "null");
    }
}
