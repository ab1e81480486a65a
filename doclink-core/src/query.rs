//! Query specification builder.
//!
//! A [`Query`] accumulates filter conditions, a sort, a projection and
//! skip/limit bounds for one collection. Conditions are kept in the order
//! they were added and are only folded into a filter document by
//! [`Query::optimize`], which every execution method calls first.
//!
//! # Query Building
//!
//! ```ignore
//! use doclink::prelude::*;
//!
//! let adults = store
//!     .query("users")
//!     .equals("status", "active")
//!     .greater_or_equal("age", 21)
//!     .sort_by("age", false)
//!     .limit(10)
//!     .find()
//!     .await?;
//!
//! for user in adults {
//!     println!("{user}");
//! }
//! ```
//!
//! # Optimization
//!
//! Conditions on the same field whose values are operator documents are merged,
//! so `greater_than("age", 18)` followed by `less_than("age", 65)` becomes
//! `{"age": {"$gt": 18, "$lt": 65}}`. Two bare equalities on one field keep the
//! last one. Mixing a bare equality with an operator condition on the same
//! field is rejected with [`DocumentStoreError::ConflictingConditions`].
//!
//! Logical groups built with [`Query::subquery`] are stored verbatim under
//! `$and`, `$or` or `$nor`.

use bson::{Bson, Document, doc, oid::ObjectId};
use indexmap::IndexMap;
use std::{fmt, str::FromStr};
use tracing::trace;

use crate::{
    backend::FindOptions,
    document::{Model, ModelExt},
    entity::Entity,
    error::{DocumentStoreError, DocumentStoreResult},
    reference::Reference,
    store::DocumentStore,
    value::{ID_FIELD, Pattern, Value, canonical_field, coerce_identifier},
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// Returns the stored form, `1` or `-1`.
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Field operators supported by [`Query::operator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    /// Value is one of a list.
    In,
    /// Value is none of a list.
    NotIn,
    /// Value differs.
    NotEquals,
    /// Value is greater.
    GreaterThan,
    /// Value is greater or equal.
    GreaterOrEqual,
    /// Value is smaller.
    LessThan,
    /// Value is smaller or equal.
    LessOrEqual,
    /// Array has exactly the given length.
    Size,
    /// Field is present (or absent).
    Exists,
    /// Array contains all given values.
    All,
    /// Value modulo divisor equals remainder.
    Mod,
    /// Point is near a location.
    Near,
    /// Upper bound on the distance used by [`OperatorKind::Near`].
    MaxDistance,
}

impl OperatorKind {
    /// Every supported operator.
    pub const ALL: [OperatorKind; 13] = [
        OperatorKind::In,
        OperatorKind::NotIn,
        OperatorKind::NotEquals,
        OperatorKind::GreaterThan,
        OperatorKind::GreaterOrEqual,
        OperatorKind::LessThan,
        OperatorKind::LessOrEqual,
        OperatorKind::Size,
        OperatorKind::Exists,
        OperatorKind::All,
        OperatorKind::Mod,
        OperatorKind::Near,
        OperatorKind::MaxDistance,
    ];

    /// Returns the operator name without the `$` prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorKind::In => "in",
            OperatorKind::NotIn => "nin",
            OperatorKind::NotEquals => "ne",
            OperatorKind::GreaterThan => "gt",
            OperatorKind::GreaterOrEqual => "gte",
            OperatorKind::LessThan => "lt",
            OperatorKind::LessOrEqual => "lte",
            OperatorKind::Size => "size",
            OperatorKind::Exists => "exists",
            OperatorKind::All => "all",
            OperatorKind::Mod => "mod",
            OperatorKind::Near => "near",
            OperatorKind::MaxDistance => "maxDistance",
        }
    }

    /// Returns the key used in a filter document, e.g. `$gt`.
    pub fn key(&self) -> String {
        format!("${}", self.as_str())
    }
}

impl FromStr for OperatorKind {
    type Err = DocumentStoreError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        OperatorKind::ALL
            .into_iter()
            .find(|operator| operator.as_str() == kind)
            .ok_or_else(|| DocumentStoreError::InvalidOperatorKind(kind.to_string()))
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical operators accepted by [`Query::subquery`].
///
/// `not` is deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalKind {
    And,
    Or,
    Nor,
}

impl LogicalKind {
    /// Returns the key used in a filter document, e.g. `$or`.
    pub fn key(&self) -> &'static str {
        match self {
            LogicalKind::And => "$and",
            LogicalKind::Or => "$or",
            LogicalKind::Nor => "$nor",
        }
    }
}

impl FromStr for LogicalKind {
    type Err = DocumentStoreError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "and" => Ok(LogicalKind::And),
            "or" => Ok(LogicalKind::Or),
            "nor" => Ok(LogicalKind::Nor),
            other => Err(DocumentStoreError::UnsupportedLogicalKind(other.to_string())),
        }
    }
}

/// One accumulated filter condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `{field: value}` where value is a plain value or an operator document.
    Field(String, Bson),
    /// A nested, already optimized filter under `$and`, `$or` or `$nor`.
    Logical(LogicalKind, Document),
}

/// How a field is projected in results.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Leave the field out.
    Exclude,
    /// Return only part of an array field: a count, or `[skip, count]`.
    Slice(Bson),
}

impl Projection {
    fn to_bson(&self) -> Bson {
        match self {
            Projection::Exclude => Bson::Int32(0),
            Projection::Slice(spec) => Bson::Document(doc! { "$slice": spec.clone() }),
        }
    }
}

/// A query specification for one collection.
///
/// Builder methods consume and return the query so calls can be chained.
/// A query is a single-owner value and is not meant to be shared between tasks
/// while it is being built.
#[derive(Debug, Clone)]
pub struct Query {
    store: DocumentStore,
    collection: String,
    conditions: Vec<Condition>,
    sort: Document,
    projection: IndexMap<String, Projection>,
    limit: u64,
    skip: u64,
    deferred: Option<DocumentStoreError>,
}

impl Query {
    /// Creates an empty query against `collection`.
    pub fn new(store: &DocumentStore, collection: impl Into<String>) -> Self {
        Self {
            store: store.clone(),
            collection: collection.into(),
            conditions: Vec::new(),
            sort: Document::new(),
            projection: IndexMap::new(),
            limit: 0,
            skip: 0,
            deferred: None,
        }
    }

    /// Returns the name of the queried collection.
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Returns the store this query executes against.
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Returns the accumulated conditions in insertion order.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Returns the sort specification.
    pub fn sort(&self) -> &Document {
        &self.sort
    }

    /// Returns the projection document.
    pub fn projection(&self) -> Document {
        self.projection
            .iter()
            .map(|(field, projection)| (field.clone(), projection.to_bson()))
            .collect()
    }

    /// Returns the limit, `0` meaning unbounded.
    pub fn limit_value(&self) -> u64 {
        self.limit
    }

    /// Returns the number of skipped records.
    pub fn skip_value(&self) -> u64 {
        self.skip
    }

    /// Adds an equality condition.
    ///
    /// `id` is rewritten to `_id` and its value coerced into an identifier.
    /// An entity value is reduced to its reference; an entity that has no
    /// identifier yet fails with [`DocumentStoreError::MissingIdentifier`] when
    /// the query is optimized. Pass `&mut entity` to generate one instead.
    pub fn equals(mut self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();

        if canonical_field(field) == ID_FIELD && !matches!(value, Value::Array(_) | Value::Map(_)) {
            let id = self.identifier(value);
            return self.push(ID_FIELD, Bson::ObjectId(id));
        }

        let value = self.condition_value(value);
        self.push(field, value)
    }

    /// Adds an equality condition against a reference to `id` in `collection`.
    pub fn reference(self, field: &str, collection: &str, id: ObjectId) -> Self {
        self.equals(field, Reference::new(collection, id))
    }

    /// Adds `{field: {"$kind": value}}` for an operator given by name.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidOperatorKind`] if `kind` is not supported.
    pub fn operator(self, kind: &str, field: &str, value: impl Into<Value>) -> DocumentStoreResult<Self> {
        let kind = kind.parse::<OperatorKind>()?;

        Ok(self.with_operator(kind, field, value))
    }

    /// Adds `{field: {"$kind": value}}` for a typed operator.
    pub fn with_operator(mut self, kind: OperatorKind, field: &str, value: impl Into<Value>) -> Self {
        let mut operator = Document::new();
        operator.insert(kind.key(), self.condition_value(value.into()));

        self.push(field, Bson::Document(operator))
    }

    /// Field value is one of `values`. Values for `id` are coerced into identifiers.
    pub fn is_in<V: Into<Value>>(self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.membership(OperatorKind::In, field, values)
    }

    /// Field value is none of `values`. Values for `id` are coerced into identifiers.
    pub fn not_in<V: Into<Value>>(self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.membership(OperatorKind::NotIn, field, values)
    }

    pub fn not_equals(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_operator(OperatorKind::NotEquals, field, value)
    }

    pub fn greater_than(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_operator(OperatorKind::GreaterThan, field, value)
    }

    pub fn greater_or_equal(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_operator(OperatorKind::GreaterOrEqual, field, value)
    }

    pub fn less_than(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_operator(OperatorKind::LessThan, field, value)
    }

    pub fn less_or_equal(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_operator(OperatorKind::LessOrEqual, field, value)
    }

    /// Field value lies strictly between `start` and `end`.
    pub fn range(self, field: &str, start: impl Into<Value>, end: impl Into<Value>) -> Self {
        self.greater_than(field, start)
            .less_than(field, end)
    }

    /// Array field has exactly `size` elements.
    pub fn array_size(self, field: &str, size: i64) -> Self {
        self.with_operator(OperatorKind::Size, field, size)
    }

    /// Field is present (`exists == true`) or absent.
    pub fn field_exists(self, field: &str, exists: bool) -> Self {
        self.with_operator(OperatorKind::Exists, field, exists)
    }

    /// Array field contains every one of `values`.
    pub fn array_contains_all<V: Into<Value>>(self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values
            .into_iter()
            .map(Into::into)
            .collect::<Vec<Value>>();

        self.with_operator(OperatorKind::All, field, values)
    }

    /// Field value modulo `divisor` equals `remainder`.
    pub fn modulo(self, field: &str, divisor: i64, remainder: i64) -> Self {
        self.with_operator(OperatorKind::Mod, field, vec![divisor, remainder])
    }

    /// Location field is near `[lat, lng]`, optionally within `max_distance`.
    pub fn near(self, field: &str, lat: f64, lng: f64, max_distance: Option<f64>) -> Self {
        let query = match max_distance {
            Some(distance) => self.with_operator(OperatorKind::MaxDistance, field, distance),
            None => self,
        };

        query.with_operator(OperatorKind::Near, field, vec![lat, lng])
    }

    /// Field value matches a regular expression.
    pub fn matches_pattern(self, field: &str, pattern: impl Into<Pattern>) -> Self {
        self.equals(field, Value::Pattern(pattern.into()))
    }

    /// Field value contains `substring`, ignoring case.
    pub fn contains(self, field: &str, substring: &str) -> Self {
        self.matches_pattern(field, Pattern::contains(substring))
    }

    /// Adds a logical group built by `build` against a fresh query on the same collection.
    ///
    /// The nested query's optimized filter is stored under `$kind`. Errors raised
    /// while optimizing the nested query surface when this query is optimized.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::UnsupportedLogicalKind`] unless `kind` is
    /// `and`, `or` or `nor`.
    pub fn subquery<F>(self, kind: &str, build: F) -> DocumentStoreResult<Self>
    where
        F: FnOnce(Query) -> Query,
    {
        let kind = kind.parse::<LogicalKind>()?;

        Ok(self.logical(kind, build))
    }

    /// All conditions built by `build` must match.
    pub fn and<F: FnOnce(Query) -> Query>(self, build: F) -> Self {
        self.logical(LogicalKind::And, build)
    }

    /// At least one condition built by `build` must match.
    pub fn or<F: FnOnce(Query) -> Query>(self, build: F) -> Self {
        self.logical(LogicalKind::Or, build)
    }

    /// None of the conditions built by `build` may match.
    pub fn nor<F: FnOnce(Query) -> Query>(self, build: F) -> Self {
        self.logical(LogicalKind::Nor, build)
    }

    /// Leaves `field` out of returned documents.
    pub fn exclude(mut self, field: &str) -> Self {
        self.projection.insert(field.to_string(), Projection::Exclude);
        self
    }

    /// Returns only part of the array `field`: a count, or `[skip, count]`.
    pub fn slice(mut self, field: &str, spec: impl Into<Bson>) -> Self {
        self.projection.insert(field.to_string(), Projection::Slice(spec.into()));
        self
    }

    /// Sorts by a single field, replacing any previous sort.
    pub fn sort_by(mut self, field: &str, ascending: bool) -> Self {
        let direction = if ascending { SortDirection::Asc } else { SortDirection::Desc };

        self.sort = Document::new();
        self.sort.insert(canonical_field(field), direction.as_i32());
        self
    }

    /// Returns at most `count` records; `0` removes the bound.
    pub fn limit(mut self, count: u64) -> Self {
        self.limit = count;
        self
    }

    /// Skips the first `count` records.
    pub fn skip(mut self, count: u64) -> Self {
        self.skip = count;
        self
    }

    /// Folds the accumulated conditions into a filter document.
    ///
    /// # Errors
    ///
    /// Returns a deferred identifier coercion error, or
    /// [`DocumentStoreError::ConflictingConditions`] when a bare equality and an
    /// operator condition target the same field.
    pub fn optimize(&self) -> DocumentStoreResult<Document> {
        if let Some(err) = &self.deferred {
            return Err(err.clone());
        }

        let mut filter = Document::new();

        for condition in &self.conditions {
            match condition {
                Condition::Logical(kind, nested) => {
                    filter.insert(kind.key(), nested.clone());
                }
                Condition::Field(field, value) => {
                    let incoming_is_operator = is_operator(value);

                    match filter.get(field).map(is_operator) {
                        Some(true) if incoming_is_operator => {
                            if let (Some(Bson::Document(existing)), Bson::Document(incoming)) =
                                (filter.get_mut(field), value)
                            {
                                for (key, operand) in incoming {
                                    existing.insert(key.clone(), operand.clone());
                                }
                            }
                        }
                        Some(existing_is_operator) if existing_is_operator != incoming_is_operator => {
                            return Err(DocumentStoreError::ConflictingConditions(field.clone()));
                        }
                        _ => {
                            filter.insert(field.clone(), value.clone());
                        }
                    }
                }
            }
        }

        trace!(collection = %self.collection, %filter, "optimized query");

        Ok(filter)
    }

    /// Alias for [`Query::optimize`].
    pub fn filter(&self) -> DocumentStoreResult<Document> {
        self.optimize()
    }

    /// Executes the query and returns a cursor over the matching entities.
    ///
    /// # Errors
    ///
    /// Returns an optimization error or any backend error.
    pub async fn find(&self) -> DocumentStoreResult<Cursor> {
        let filter = self.optimize()?;
        let documents = self.store
            .collection(&self.collection)
            .await
            .find(filter, self.find_options())
            .await?;

        Ok(Cursor {
            store: self.store.clone(),
            collection: self.collection.clone(),
            documents: documents.into_iter(),
        })
    }

    /// Executes the query and deserializes every match into a typed model.
    pub async fn models<M: Model>(&self) -> DocumentStoreResult<Vec<M>> {
        let filter = self.optimize()?;

        self.store
            .collection(&self.collection)
            .await
            .find(filter, self.find_options())
            .await?
            .into_iter()
            .map(M::from_document)
            .collect()
    }

    /// Returns the first matching entity.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::NotFound`] when nothing matches.
    pub async fn find_one(&self) -> DocumentStoreResult<Entity> {
        let filter = self.optimize()?;
        let options = FindOptions {
            limit: None,
            ..self.find_options()
        };

        match self.store
            .collection(&self.collection)
            .await
            .find_one(filter.clone(), options)
            .await?
        {
            Some(document) => Ok(Entity::from_storage(&self.store, self.collection.clone(), document)),
            None => Err(DocumentStoreError::NotFound {
                collection: self.collection.clone(),
                filter: filter.to_string(),
            }),
        }
    }

    /// Shortcut for `equals("id", id)` followed by [`Query::find_one`].
    pub async fn find_by_id(self, id: impl Into<Value>) -> DocumentStoreResult<Entity> {
        self.equals(ID_FIELD, id)
            .find_one()
            .await
    }

    /// Counts matching records, honoring skip and limit.
    pub async fn count(&self) -> DocumentStoreResult<u64> {
        let filter = self.optimize()?;

        self.store
            .collection(&self.collection)
            .await
            .count(filter, self.limit_bound(), self.skip_bound())
            .await
    }

    /// Counts matching records, ignoring skip and limit.
    pub async fn count_all(&self) -> DocumentStoreResult<u64> {
        let filter = self.optimize()?;

        self.store
            .collection(&self.collection)
            .await
            .count(filter, None, None)
            .await
    }

    /// Removes all (or just one) matching records from storage.
    ///
    /// Entities already built from this collection are not touched.
    pub async fn remove(&self, just_one: bool) -> DocumentStoreResult<bool> {
        let filter = self.optimize()?;

        self.store
            .collection(&self.collection)
            .await
            .remove(filter, just_one)
            .await
    }

    fn find_options(&self) -> FindOptions {
        FindOptions {
            sort: (!self.sort.is_empty()).then(|| self.sort.clone()),
            projection: (!self.projection.is_empty()).then(|| self.projection()),
            limit: self.limit_bound(),
            skip: self.skip_bound(),
        }
    }

    fn limit_bound(&self) -> Option<u64> {
        (self.limit > 0).then_some(self.limit)
    }

    fn skip_bound(&self) -> Option<u64> {
        (self.skip > 0).then_some(self.skip)
    }

    fn push(mut self, field: &str, value: Bson) -> Self {
        self.conditions
            .push(Condition::Field(canonical_field(field).to_string(), value));
        self
    }

    fn membership<V: Into<Value>>(
        mut self,
        kind: OperatorKind,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let is_id = canonical_field(field) == ID_FIELD;
        let mut list = Vec::new();

        for value in values {
            let value = value.into();
            list.push(if is_id { Value::Id(self.identifier(value)) } else { value });
        }

        self.with_operator(kind, field, list)
    }

    fn logical<F: FnOnce(Query) -> Query>(mut self, kind: LogicalKind, build: F) -> Self {
        let nested = build(Query::new(&self.store, self.collection.clone()));

        match nested.optimize() {
            Ok(filter) => self.conditions.push(Condition::Logical(kind, filter)),
            Err(err) => self.defer(err),
        }

        self
    }

    /// Coerces `value` into an identifier, recording the first failure for `optimize`.
    fn identifier(&mut self, value: Value) -> ObjectId {
        match coerce_identifier(value) {
            Ok(id) => id,
            Err(err) => {
                self.defer(err);
                ObjectId::from_bytes([0; 12])
            }
        }
    }

    /// Converts a condition value, recording a failure for `optimize`.
    fn condition_value(&mut self, value: Value) -> Bson {
        value
            .try_into_bson()
            .unwrap_or_else(|err| {
                self.defer(err);
                Bson::Null
            })
    }

    fn defer(&mut self, err: DocumentStoreError) {
        if self.deferred.is_none() {
            self.deferred = Some(err);
        }
    }
}

/// A finite, single-pass sequence of entities returned by [`Query::find`].
///
/// Entities are built from the fetched documents as the cursor is advanced.
#[derive(Debug)]
pub struct Cursor {
    store: DocumentStore,
    collection: String,
    documents: std::vec::IntoIter<Document>,
}

impl Iterator for Cursor {
    type Item = Entity;

    fn next(&mut self) -> Option<Self::Item> {
        self.documents
            .next()
            .map(|document| Entity::from_storage(&self.store, self.collection.clone(), document))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.documents.size_hint()
    }
}

impl ExactSizeIterator for Cursor {}

/// Returns `true` for a non-empty document whose keys are all operators.
///
/// Stored references use `$`-prefixed keys too and count as plain values.
pub fn is_operator_document(document: &Document) -> bool {
    !document.is_empty()
        && !Reference::is_reference(document)
        && document.keys().all(|key| key.starts_with('$'))
}

fn is_operator(value: &Bson) -> bool {
    matches!(value, Bson::Document(document) if is_operator_document(document))
}
