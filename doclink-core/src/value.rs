//! Field values held by entities and used in query conditions.
//!
//! [`Value`] is a tagged union over everything an entity field can hold:
//! plain BSON scalars, arrays and nested maps, plus the three value types this
//! layer gives special meaning to (identifiers, timestamps and references) and
//! embedded [`Entity`] values that are turned into references on save.
//!
//! Conversion from storage goes through [`Value::from_bson`], which recognizes
//! stored references and timestamps. Conversion back goes through
//! [`Value::into_bson`]. Coercion applied when a caller writes a field lives in
//! [`normalize`].

use bson::{Bson, Document, doc, oid::ObjectId};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use indexmap::IndexMap;

use crate::{
    entity::Entity,
    error::{DocumentStoreError, DocumentStoreResult},
    reference::Reference,
};

/// Name of the canonical identifier field.
pub const ID_FIELD: &str = "_id";
/// Alias accepted everywhere for [`ID_FIELD`].
pub const ID_ALIAS: &str = "id";

/// Time zone used to present timestamps.
pub type TimeZone = FixedOffset;

/// Ordered field map of an entity or nested sub-document.
pub type Fields = IndexMap<String, Value>;

/// Returns the UTC time zone.
pub fn utc() -> TimeZone {
    Utc.fix()
}

/// Maps the `id` alias onto the canonical identifier field name.
pub fn canonical_field(field: &str) -> &str {
    if field == ID_ALIAS { ID_FIELD } else { field }
}

/// A zone-less point in time, stored with millisecond precision.
///
/// The time zone is only applied when the value is presented to a caller,
/// see [`Timestamp::in_time_zone`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(bson::DateTime);

impl Timestamp {
    /// Returns the current time.
    pub fn now() -> Self {
        Self(bson::DateTime::now())
    }

    /// Creates a timestamp from milliseconds since the Unix epoch.
    pub fn from_millis(millis: i64) -> Self {
        Self(bson::DateTime::from_millis(millis))
    }

    /// Creates a timestamp from whole seconds since the Unix epoch.
    pub fn from_seconds(seconds: i64) -> Self {
        Self::from_millis(seconds.saturating_mul(1000))
    }

    /// Returns milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Returns the stored BSON form.
    pub fn as_bson_datetime(&self) -> bson::DateTime {
        self.0
    }

    /// Presents this instant in the given time zone.
    pub fn in_time_zone(&self, zone: &TimeZone) -> DateTime<FixedOffset> {
        self.0.to_chrono().with_timezone(zone)
    }
}

impl From<bson::DateTime> for Timestamp {
    fn from(value: bson::DateTime) -> Self {
        Self(value)
    }
}

impl<Tz: chrono::TimeZone> From<DateTime<Tz>> for Timestamp {
    fn from(value: DateTime<Tz>) -> Self {
        Self(bson::DateTime::from_chrono(value))
    }
}

impl From<Timestamp> for Bson {
    fn from(value: Timestamp) -> Self {
        Bson::DateTime(value.0)
    }
}

/// A regular expression condition marker.
///
/// Rendered as `{"$regex": pattern, "$options": options}` so that it combines
/// with other operator conditions on the same field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    /// The regular expression source.
    pub pattern: String,
    /// Matching flags such as `i`, `m`, `s` or `x`.
    pub options: String,
}

impl Pattern {
    /// Creates a new pattern marker.
    pub fn new(pattern: impl Into<String>, options: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), options: options.into() }
    }

    /// Creates a case-insensitive pattern matching any string containing `needle`.
    pub fn contains(needle: &str) -> Self {
        Self::new(format!(".*{}.*", regex::escape(needle)), "i")
    }

    /// Returns the operator document form of this marker.
    pub fn to_document(&self) -> Document {
        doc! {
            "$regex": self.pattern.as_str(),
            "$options": self.options.as_str(),
        }
    }
}

impl From<&str> for Pattern {
    fn from(pattern: &str) -> Self {
        Pattern::new(pattern, "")
    }
}

impl From<String> for Pattern {
    fn from(pattern: String) -> Self {
        Pattern::new(pattern, "")
    }
}

/// A field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent or explicit null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit integer.
    Int32(i32),
    /// 64-bit integer.
    Int64(i64),
    /// Floating point number.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Nested ordered field map.
    Map(Fields),
    /// Document identifier.
    Id(ObjectId),
    /// Stored, zone-less point in time.
    Timestamp(Timestamp),
    /// A point in time presented in a time zone. Produced on read and accepted
    /// on write, where it is normalized into [`Value::Timestamp`].
    Zoned(DateTime<FixedOffset>),
    /// Regular expression condition marker.
    Pattern(Pattern),
    /// Unresolved pointer to another entity.
    Reference(Reference),
    /// Embedded or resolved entity. Stored as a reference.
    Entity(Box<Entity>),
    /// Any other BSON value, passed through untouched.
    Other(Bson),
}

impl Value {
    /// Converts a stored BSON value, recognizing references, identifiers and timestamps.
    pub fn from_bson(bson: Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Value::Null,
            Bson::Boolean(value) => Value::Bool(value),
            Bson::Int32(value) => Value::Int32(value),
            Bson::Int64(value) => Value::Int64(value),
            Bson::Double(value) => Value::Double(value),
            Bson::String(value) => Value::String(value),
            Bson::ObjectId(value) => Value::Id(value),
            Bson::DateTime(value) => Value::Timestamp(Timestamp(value)),
            Bson::Array(values) => Value::Array(
                values
                    .into_iter()
                    .map(Value::from_bson)
                    .collect()
            ),
            Bson::Document(document) => match Reference::from_document(&document) {
                Some(reference) => Value::Reference(reference),
                None => Value::Map(fields_from_document(document)),
            },
            other => Value::Other(other),
        }
    }

    /// Converts this value into its stored BSON form.
    ///
    /// Embedded entities are reduced to their reference, which materializes an
    /// identifier on the entity if it has none yet.
    pub fn into_bson(self) -> Bson {
        match self {
            Value::Null => Bson::Null,
            Value::Bool(value) => Bson::Boolean(value),
            Value::Int32(value) => Bson::Int32(value),
            Value::Int64(value) => Bson::Int64(value),
            Value::Double(value) => Bson::Double(value),
            Value::String(value) => Bson::String(value),
            Value::Array(values) => Bson::Array(
                values
                    .into_iter()
                    .map(Value::into_bson)
                    .collect()
            ),
            Value::Map(fields) => Bson::Document(fields_into_document(fields)),
            Value::Id(id) => Bson::ObjectId(id),
            Value::Timestamp(timestamp) => timestamp.into(),
            Value::Zoned(datetime) => Timestamp::from(datetime).into(),
            Value::Pattern(pattern) => Bson::Document(pattern.to_document()),
            Value::Reference(reference) => reference.into(),
            Value::Entity(mut entity) => entity.as_reference().into(),
            Value::Other(bson) => bson,
        }
    }

    /// Returns the stored BSON form without consuming the value.
    pub fn to_bson(&self) -> Bson {
        self.clone().into_bson()
    }

    /// Converts this value into its stored BSON form without generating identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::MissingIdentifier`] if an embedded entity,
    /// at any depth, has no identifier yet.
    pub fn try_into_bson(self) -> DocumentStoreResult<Bson> {
        match self {
            Value::Array(values) => values
                .into_iter()
                .map(Value::try_into_bson)
                .collect::<DocumentStoreResult<Vec<_>>>()
                .map(Bson::Array),
            Value::Map(fields) => fields
                .into_iter()
                .map(|(key, value)| Ok((key, value.try_into_bson()?)))
                .collect::<DocumentStoreResult<Document>>()
                .map(Bson::Document),
            Value::Entity(entity) => match entity.stored_id() {
                Some(id) => Ok(Reference::new(entity.collection_name(), id).into()),
                None => Err(DocumentStoreError::MissingIdentifier(entity.collection_name().to_string())),
            },
            other => Ok(other.into_bson()),
        }
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns integer values widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(value) => Some(i64::from(*value)),
            Value::Int64(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns any numeric value as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(value) => Some(f64::from(*value)),
            Value::Int64(value) => Some(*value as f64),
            Value::Double(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<ObjectId> {
        match self {
            Value::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(timestamp) => Some(*timestamp),
            Value::Zoned(datetime) => Some(Timestamp::from(*datetime)),
            _ => None,
        }
    }

    pub fn as_zoned(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Value::Zoned(datetime) => Some(datetime),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_entity_mut(&mut self) -> Option<&mut Entity> {
        match self {
            Value::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Value::Entity(entity) => Some(*entity),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Value::Map(fields) => Some(fields),
            _ => None,
        }
    }
}

/// Coerces a value into an identifier.
///
/// Accepts a typed identifier, its 24 character hexadecimal string form, a
/// reference (its target id) or an entity that already carries an `_id`.
pub fn coerce_identifier(value: Value) -> DocumentStoreResult<ObjectId> {
    match value {
        Value::Id(id) => Ok(id),
        Value::String(hex) => ObjectId::parse_str(&hex)
            .map_err(|_| DocumentStoreError::InvalidIdentifier(hex)),
        Value::Reference(reference) => Ok(reference.id()),
        Value::Entity(entity) => entity
            .stored_id()
            .ok_or_else(|| DocumentStoreError::MissingIdentifier(entity.collection_name().to_string())),
        other => Err(DocumentStoreError::InvalidIdentifier(format!("{other:?}"))),
    }
}

/// Applies write-time coercion to a single field.
///
/// - `id` is renamed to `_id`, and the value of `_id` is coerced into an identifier.
/// - Zoned date-times are converted into stored timestamps, also inside
///   arrays and nested maps.
///
/// Returns the canonical field name and the coerced value.
pub fn normalize(field: &str, value: Value) -> DocumentStoreResult<(String, Value)> {
    let field = canonical_field(field);

    if field == ID_FIELD {
        return Ok((field.to_string(), Value::Id(coerce_identifier(value)?)));
    }

    Ok((field.to_string(), normalize_value(value)))
}

fn normalize_value(value: Value) -> Value {
    match value {
        Value::Zoned(datetime) => Value::Timestamp(Timestamp::from(datetime)),
        Value::Array(values) => Value::Array(
            values
                .into_iter()
                .map(normalize_value)
                .collect()
        ),
        Value::Map(fields) => Value::Map(
            fields
                .into_iter()
                .map(|(key, value)| (key, normalize_value(value)))
                .collect()
        ),
        Value::Other(bson) => Value::from_bson(bson),
        other => other,
    }
}

/// Converts a stored document into an ordered field map.
pub fn fields_from_document(document: Document) -> Fields {
    document
        .into_iter()
        .map(|(key, value)| (key, Value::from_bson(value)))
        .collect()
}

/// Converts an ordered field map into its stored document form.
pub fn fields_into_document(fields: Fields) -> Document {
    fields
        .into_iter()
        .map(|(key, value)| (key, value.into_bson()))
        .collect()
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Value::Id(value)
    }
}

impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Value::Timestamp(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::Zoned(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Zoned(value.fixed_offset())
    }
}

impl From<Pattern> for Value {
    fn from(value: Pattern) -> Self {
        Value::Pattern(value)
    }
}

impl From<Reference> for Value {
    fn from(value: Reference) -> Self {
        Value::Reference(value)
    }
}

impl From<Entity> for Value {
    fn from(value: Entity) -> Self {
        Value::Entity(Box::new(value))
    }
}

impl From<&mut Entity> for Value {
    /// Reduces a borrowed entity to its reference.
    fn from(value: &mut Entity) -> Self {
        Value::Reference(value.as_reference())
    }
}

impl From<Fields> for Value {
    fn from(value: Fields) -> Self {
        Value::Map(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::from_bson(Bson::Document(value))
    }
}

impl From<Bson> for Value {
    fn from(value: Bson) -> Self {
        Value::from_bson(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<Value> for Bson {
    fn from(value: Value) -> Self {
        value.into_bson()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    #[test]
    fn stored_references_are_recognized() {
        let id = ObjectId::new();
        let value = Value::from_bson(Bson::Document(doc! { "$ref": "users", "$id": id }));

        assert_eq!(value, Value::Reference(Reference::new("users", id)));
    }

    #[test]
    fn unsaved_embedded_entities_have_no_stored_form() {
        let store = crate::store::DocumentStore::new(crate::testing::FakeBackend::default());
        let tag = store.entity("tags", [("name", Value::from("rust"))]).unwrap();

        let err = Value::Array(vec![Value::from(tag.clone())]).try_into_bson().unwrap_err();
        assert!(matches!(err, DocumentStoreError::MissingIdentifier(collection) if collection == "tags"));
        assert_eq!(tag.stored_id(), None);

        let id = ObjectId::new();
        let mut saved = tag;
        saved.set("id", id).unwrap();
        let mut fields = Fields::new();
        fields.insert("primary".to_string(), Value::from(saved));

        assert_eq!(
            Value::Map(fields).try_into_bson().unwrap(),
            Bson::Document(doc! { "primary": { "$ref": "tags", "$id": id } })
        );
    }

    #[test]
    fn nested_documents_stay_maps() {
        let value = Value::from(doc! { "street": "Main", "number": 4 });
        let map = value.as_map().unwrap();

        assert_eq!(map.get("street"), Some(&Value::String("Main".into())));
        assert_eq!(map.get("number"), Some(&Value::Int32(4)));
    }

    #[test]
    fn id_alias_is_coerced() {
        let (field, value) = normalize("id", Value::from("507f191e810c19729de860ea")).unwrap();

        assert_eq!(field, "_id");
        assert_eq!(
            value,
            Value::Id(ObjectId::parse_str("507f191e810c19729de860ea").unwrap())
        );
    }

    #[test]
    fn malformed_identifiers_are_rejected() {
        let err = normalize("_id", Value::from("not-an-id")).unwrap_err();

        assert!(matches!(err, DocumentStoreError::InvalidIdentifier(_)));
    }

    #[test]
    fn zoned_values_become_timestamps() {
        let zone = FixedOffset::east_opt(2 * 3600).unwrap();
        let zoned = zone.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let (_, value) = normalize("created", Value::Array(vec![Value::Zoned(zoned)])).unwrap();

        assert_eq!(value, Value::Array(vec![Value::Timestamp(Timestamp::from(zoned))]));
    }

    #[test]
    fn timestamps_present_in_any_zone() {
        let timestamp = Timestamp::from_seconds(0);
        let zone = FixedOffset::west_opt(5 * 3600).unwrap();
        let presented = timestamp.in_time_zone(&zone);

        assert_eq!(presented.to_rfc3339(), "1969-12-31T19:00:00-05:00");
        assert_eq!(Timestamp::from(presented), timestamp);
    }

    #[test]
    fn contains_pattern_escapes_input() {
        let pattern = Pattern::contains("a.b");

        assert_eq!(pattern.pattern, ".*a\\.b.*");
        assert_eq!(pattern.options, "i");
    }
}
