//! Filter evaluation for in-memory documents.
//!
//! This module interprets the filter, sort and projection documents produced by
//! the query builder against plain BSON documents. It understands the operator
//! subset the builder emits, and accepts logical groups both in array form
//! (`{"$or": [{"a": 1}, {"b": 2}]}`) and in the builder's document form
//! (`{"$or": {"a": 1, "b": 2}}`).

use std::cmp::Ordering;
use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::RegexBuilder;

use doclink_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::is_operator_document,
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 for comparison.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// Document identifier
    ObjectId(ObjectId),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Sub-document entries in stored order; equality is order-sensitive
    Map(Vec<(&'a str, Comparable<'a>)>),
    /// Any other BSON value, compared for equality only
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<Vec<_>>()
            ),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl<'a> Comparable<'a> {
    /// Position of this value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Other(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
        }
    }

    /// Total order used for sorting: values of different types order by type first.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.partial_cmp(other).unwrap_or(Ordering::Equal))
    }
}


pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Returns `true` if the document satisfies every condition of `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidOperatorKind`] for unknown operators and
    /// [`DocumentStoreError::InvalidDocument`] for malformed operands.
    pub fn evaluate(&self, filter: &Document) -> DocumentStoreResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for nested in subfilters(key, condition)? {
                        if !self.evaluate(&nested)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" => self.any(key, condition)?,
                "$nor" => !self.any(key, condition)?,
                operator if operator.starts_with('$') => {
                    return Err(DocumentStoreError::InvalidOperatorKind(operator.to_string()));
                }
                path => self.evaluate_field(path, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn any(&self, key: &str, condition: &Bson) -> DocumentStoreResult<bool> {
        for nested in subfilters(key, condition)? {
            if self.evaluate(&nested)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn evaluate_field(&self, path: &str, condition: &Bson) -> DocumentStoreResult<bool> {
        let value = lookup(self.document, path);

        match condition {
            Bson::Document(operators) if is_operator_document(operators) => {
                for (operator, operand) in operators {
                    if !apply(operator, operand, value, operators)? {
                        return Ok(false);
                    }
                }

                Ok(true)
            }
            expected => Ok(equals(value, expected)),
        }
    }
}

/// Splits a logical operand into the filters it combines.
fn subfilters(key: &str, condition: &Bson) -> DocumentStoreResult<Vec<Document>> {
    match condition {
        Bson::Array(items) => items
            .iter()
            .map(|item| match item {
                Bson::Document(nested) => Ok(nested.clone()),
                other => Err(DocumentStoreError::InvalidDocument(format!(
                    "{key} expects documents, got {other}"
                ))),
            })
            .collect(),
        Bson::Document(conditions) => Ok(
            conditions
                .iter()
                .map(|(field, value)| {
                    let mut single = Document::new();
                    single.insert(field.clone(), value.clone());
                    single
                })
                .collect()
        ),
        other => Err(DocumentStoreError::InvalidDocument(format!(
            "{key} expects an array or a document, got {other}"
        ))),
    }
}

fn apply(
    operator: &str,
    operand: &Bson,
    value: Option<&Bson>,
    siblings: &Document,
) -> DocumentStoreResult<bool> {
    match operator {
        "$eq" => Ok(equals(value, operand)),
        "$ne" => Ok(!equals(value, operand)),
        "$gt" => Ok(compare(value, operand, |ordering| ordering == Ordering::Greater)),
        "$gte" => Ok(compare(value, operand, |ordering| ordering != Ordering::Less)),
        "$lt" => Ok(compare(value, operand, |ordering| ordering == Ordering::Less)),
        "$lte" => Ok(compare(value, operand, |ordering| ordering != Ordering::Greater)),
        "$in" => Ok(list(operator, operand)?
            .iter()
            .any(|candidate| equals(value, candidate))),
        "$nin" => Ok(!list(operator, operand)?
            .iter()
            .any(|candidate| equals(value, candidate))),
        "$exists" => Ok(value.is_some() == truthy(operand)),
        "$size" => Ok(match (value, number(operand)) {
            (Some(Bson::Array(items)), Some(size)) => items.len() as f64 == size,
            _ => false,
        }),
        "$all" => {
            let required = list(operator, operand)?;

            Ok(value.is_some() && required.iter().all(|item| equals(value, item)))
        }
        "$mod" => modulo(value, operand),
        "$regex" => {
            let pattern = operand.as_str().ok_or_else(|| {
                DocumentStoreError::InvalidDocument(format!("$regex expects a string, got {operand}"))
            })?;
            let options = siblings.get_str("$options").unwrap_or("");

            matches_pattern(value, pattern, options)
        }
        "$near" => near(value, operand, siblings.get("$maxDistance")),
        // Modifiers read by `$regex` and `$near`.
        "$options" | "$maxDistance" => Ok(true),
        other => Err(DocumentStoreError::InvalidOperatorKind(other.to_string())),
    }
}

/// Equality with implicit array membership; `null` also matches a missing field.
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    let Some(actual) = value else {
        return matches!(expected, Bson::Null);
    };
    let expected = Comparable::from(expected);

    if Comparable::from(actual) == expected {
        return true;
    }

    matches!(actual, Bson::Array(items) if items.iter().any(|item| Comparable::from(item) == expected))
}

fn compare(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let expected = Comparable::from(operand);

    candidates(value)
        .into_iter()
        .any(|candidate| {
            Comparable::from(candidate)
                .partial_cmp(&expected)
                .is_some_and(&accept)
        })
}

/// The value itself plus, for arrays, each element.
fn candidates(value: Option<&Bson>) -> Vec<&Bson> {
    match value {
        Some(Bson::Array(items)) => items
            .iter()
            .chain(value)
            .collect(),
        Some(single) => vec![single],
        None => Vec::new(),
    }
}

fn list<'b>(operator: &str, operand: &'b Bson) -> DocumentStoreResult<&'b [Bson]> {
    match operand {
        Bson::Array(items) => Ok(items),
        other => Err(DocumentStoreError::InvalidDocument(format!(
            "{operator} expects an array, got {other}"
        ))),
    }
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(value) => *value,
        Bson::Null => false,
        other => number(other).is_none_or(|n| n != 0.0),
    }
}

fn modulo(value: Option<&Bson>, operand: &Bson) -> DocumentStoreResult<bool> {
    let invalid = || DocumentStoreError::InvalidDocument(format!("$mod expects [divisor, remainder], got {operand}"));

    let (divisor, remainder) = match operand {
        Bson::Array(pair) if pair.len() == 2 => (
            number(&pair[0]).ok_or_else(invalid)? as i64,
            number(&pair[1]).ok_or_else(invalid)? as i64,
        ),
        _ => return Err(invalid()),
    };

    if divisor == 0 {
        return Err(DocumentStoreError::InvalidDocument("$mod divisor must not be zero".into()));
    }

    Ok(candidates(value)
        .into_iter()
        .filter_map(number)
        .any(|n| (n.trunc() as i64).wrapping_rem(divisor) == remainder))
}

fn matches_pattern(value: Option<&Bson>, pattern: &str, options: &str) -> DocumentStoreResult<bool> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|err| DocumentStoreError::InvalidDocument(format!("invalid pattern {pattern:?}: {err}")))?;

    Ok(candidates(value)
        .into_iter()
        .any(|candidate| matches!(candidate, Bson::String(text) if regex.is_match(text))))
}

/// Planar distance check between a stored point and the `$near` target.
fn near(value: Option<&Bson>, operand: &Bson, max_distance: Option<&Bson>) -> DocumentStoreResult<bool> {
    let target = point(operand).ok_or_else(|| {
        DocumentStoreError::InvalidDocument(format!("$near expects a [x, y] point, got {operand}"))
    })?;

    let Some(position) = value.and_then(point) else {
        return Ok(false);
    };

    let distance = ((position.0 - target.0).powi(2) + (position.1 - target.1).powi(2)).sqrt();

    Ok(max_distance
        .and_then(number)
        .is_none_or(|max| distance <= max))
}

/// Reads `[x, y]` or a two-field legacy coordinate document.
fn point(value: &Bson) -> Option<(f64, f64)> {
    let coordinates = match value {
        Bson::Array(items) => items.iter().collect::<Vec<_>>(),
        Bson::Document(fields) => fields.values().collect::<Vec<_>>(),
        _ => return None,
    };

    match coordinates.as_slice() {
        [x, y] => Some((number(x)?, number(y)?)),
        _ => None,
    }
}

/// Resolves a dotted path. Numeric segments index into arrays.
pub(crate) fn lookup<'d>(document: &'d Document, path: &str) -> Option<&'d Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(nested) => nested.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Sorts by every key of `sort` in order; `-1` sorts descending.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &Document) {
    documents.sort_by(|left, right| {
        for (field, direction) in sort {
            let left = lookup(left, field)
                .map(Comparable::from)
                .unwrap_or(Comparable::Null);
            let right = lookup(right, field)
                .map(Comparable::from)
                .unwrap_or(Comparable::Null);

            let ordering = match number(direction) {
                Some(direction) if direction < 0.0 => right.sort_cmp(&left),
                _ => left.sort_cmp(&right),
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    });
}

/// Applies a projection: inclusion (`1`), exclusion (`0`) and `{"$slice": spec}`.
pub(crate) fn project(document: Document, projection: &Document) -> Document {
    let included = projection
        .iter()
        .filter(|(_, spec)| is_inclusion(spec))
        .map(|(field, _)| field.as_str())
        .collect::<Vec<_>>();

    let mut document = if included.is_empty() {
        document
    } else {
        document
            .into_iter()
            .filter(|(key, _)| key == "_id" || included.contains(&key.as_str()))
            .collect()
    };

    for (field, spec) in projection {
        match spec {
            Bson::Document(options) => {
                if let (Some(slice), Some(Bson::Array(items))) = (options.get("$slice"), document.get_mut(field)) {
                    *items = slice_items(std::mem::take(items), slice);
                }
            }
            spec if !is_inclusion(spec) => {
                document.remove(field);
            }
            _ => {}
        }
    }

    document
}

fn is_inclusion(spec: &Bson) -> bool {
    match spec {
        Bson::Boolean(value) => *value,
        other => number(other).is_some_and(|n| n != 0.0),
    }
}

/// `$slice` with a count (negative counts from the end) or `[skip, count]`.
fn slice_items(items: Vec<Bson>, slice: &Bson) -> Vec<Bson> {
    let len = items.len() as i64;

    let (start, count) = match slice {
        Bson::Array(pair) if pair.len() == 2 => {
            let skip = number(&pair[0]).unwrap_or(0.0) as i64;
            let count = number(&pair[1]).unwrap_or(0.0).max(0.0) as i64;
            let start = if skip < 0 { (len + skip).max(0) } else { skip.min(len) };

            (start, count)
        }
        other => {
            let count = number(other).unwrap_or(0.0) as i64;

            if count < 0 { ((len + count).max(0), -count) } else { (0, count) }
        }
    };

    items
        .into_iter()
        .skip(start as usize)
        .take(count as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn evaluate(document: Document, filter: Document) -> bool {
        DocumentEvaluator::new(&document)
            .evaluate(&filter)
            .unwrap()
    }

    #[test]
    fn equality_and_array_membership() {
        let user = doc! { "name": "Alice", "tags": ["admin", "ops"] };

        assert!(evaluate(user.clone(), doc! { "name": "Alice" }));
        assert!(evaluate(user.clone(), doc! { "tags": "ops" }));
        assert!(!evaluate(user.clone(), doc! { "name": "Bob" }));
        assert!(evaluate(user, doc! { "missing": Bson::Null }));
    }

    #[test]
    fn numeric_ranges_compare_across_widths() {
        let user = doc! { "age": 30_i64 };

        assert!(evaluate(user.clone(), doc! { "age": { "$gt": 18, "$lt": 65 } }));
        assert!(!evaluate(user.clone(), doc! { "age": { "$gte": 31.5 } }));
        assert!(evaluate(user, doc! { "age": { "$in": [1, 30] } }));
    }

    #[test]
    fn logical_groups_accept_both_forms() {
        let user = doc! { "role": "admin", "active": false };

        assert!(evaluate(user.clone(), doc! { "$or": { "role": "admin", "active": true } }));
        assert!(evaluate(user.clone(), doc! { "$or": [{ "role": "guest" }, { "active": false }] }));
        assert!(!evaluate(user.clone(), doc! { "$and": { "role": "admin", "active": true } }));
        assert!(evaluate(user, doc! { "$nor": [{ "role": "guest" }] }));
    }

    #[test]
    fn pattern_exists_size_and_mod() {
        let user = doc! { "name": "Alicia", "tags": ["a", "b"], "score": 17 };

        assert!(evaluate(user.clone(), doc! { "name": { "$regex": ".*ALI.*", "$options": "i" } }));
        assert!(!evaluate(user.clone(), doc! { "name": { "$regex": "^bob" } }));
        assert!(evaluate(user.clone(), doc! { "tags": { "$size": 2, "$all": ["b", "a"] } }));
        assert!(evaluate(user.clone(), doc! { "email": { "$exists": false } }));
        assert!(evaluate(user, doc! { "score": { "$mod": [5, 2] } }));
    }

    #[test]
    fn embedded_documents_match_in_field_order() {
        let user = doc! { "address": { "city": "Oslo", "zip": 150 } };

        assert!(evaluate(user.clone(), doc! { "address": { "city": "Oslo", "zip": 150 } }));
        assert!(!evaluate(user.clone(), doc! { "address": { "zip": 150, "city": "Oslo" } }));
        assert!(!evaluate(user, doc! { "address": { "city": "Oslo" } }));
    }

    #[test]
    fn mod_handles_signed_and_extreme_operands() {
        let record = doc! { "v": i64::MIN, "w": -7 };

        assert!(evaluate(record.clone(), doc! { "v": { "$mod": [-1, 0] } }));
        assert!(evaluate(record.clone(), doc! { "v": { "$mod": [2, 0] } }));
        assert!(evaluate(record.clone(), doc! { "w": { "$mod": [3, -1] } }));
        assert!(evaluate(record.clone(), doc! { "w": { "$mod": [-3, -1] } }));
        assert!(!evaluate(record, doc! { "w": { "$mod": [3, 2] } }));
    }

    #[test]
    fn near_honors_max_distance() {
        let place = doc! { "loc": [3.0, 4.0] };

        assert!(evaluate(place.clone(), doc! { "loc": { "$maxDistance": 5.0, "$near": [0.0, 0.0] } }));
        assert!(!evaluate(place, doc! { "loc": { "$maxDistance": 4.9, "$near": [0.0, 0.0] } }));
    }

    #[test]
    fn dotted_paths_and_references() {
        let id = ObjectId::new();
        let book = doc! {
            "meta": { "pages": 300 },
            "author": { "$ref": "authors", "$id": id },
        };

        assert!(evaluate(book.clone(), doc! { "meta.pages": { "$gt": 100 } }));
        assert!(evaluate(book, doc! { "author": { "$ref": "authors", "$id": id } }));
    }

    #[test]
    fn unknown_operators_are_errors() {
        let document = doc! { "a": 1 };

        assert!(matches!(
            DocumentEvaluator::new(&document).evaluate(&doc! { "a": { "$between": [0, 2] } }),
            Err(DocumentStoreError::InvalidOperatorKind(_))
        ));
        assert!(DocumentEvaluator::new(&document).evaluate(&doc! { "$where": "1" }).is_err());
    }

    #[test]
    fn sorting_orders_types_then_values() {
        let mut documents = vec![
            doc! { "v": "b" },
            doc! { "v": 2 },
            doc! {},
            doc! { "v": 1.5 },
            doc! { "v": "a" },
        ];

        sort_documents(&mut documents, &doc! { "v": 1 });

        assert_eq!(
            documents,
            vec![doc! {}, doc! { "v": 1.5 }, doc! { "v": 2 }, doc! { "v": "a" }, doc! { "v": "b" }]
        );
    }

    #[test]
    fn projection_excludes_and_slices() {
        let document = doc! { "name": "Alice", "password": "x", "comments": [1, 2, 3, 4] };

        assert_eq!(
            project(document.clone(), &doc! { "password": 0, "comments": { "$slice": -2 } }),
            doc! { "name": "Alice", "comments": [3, 4] }
        );
        assert_eq!(
            project(document, &doc! { "comments": { "$slice": [1, 2] } }).get_array("comments").unwrap(),
            &vec![Bson::Int32(2), Bson::Int32(3)]
        );
    }
}
