//! Filter normalization for the MongoDB query engine.
//!
//! The query builder stores logical groups in document form,
//! `{"$or": {"a": 1, "b": 2}}`, which MongoDB rejects. This module rewrites
//! every such group into the array form the server expects,
//! `{"$or": [{"a": 1}, {"b": 2}]}`, recursing into nested groups.

use bson::{Bson, Document};

const LOGICAL_KEYS: [&str; 3] = ["$and", "$or", "$nor"];

/// Rewrites document-form logical groups into array form.
pub(crate) fn normalize_filter(filter: Document) -> Document {
    filter
        .into_iter()
        .map(|(key, value)| {
            let value = if LOGICAL_KEYS.contains(&key.as_str()) { normalize_group(value) } else { value };
            (key, value)
        })
        .collect()
}

fn normalize_group(value: Bson) -> Bson {
    match value {
        Bson::Document(conditions) => Bson::Array(
            conditions
                .into_iter()
                .map(|(field, condition)| {
                    let mut single = Document::new();
                    single.insert(field, condition);
                    Bson::Document(normalize_filter(single))
                })
                .collect()
        ),
        Bson::Array(items) => Bson::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Bson::Document(nested) => Bson::Document(normalize_filter(nested)),
                    other => other,
                })
                .collect()
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn document_groups_become_arrays() {
        let filter = doc! {
            "status": "active",
            "$or": { "role": "admin", "age": { "$gt": 18, "$lt": 65 } },
        };

        assert_eq!(
            normalize_filter(filter),
            doc! {
                "status": "active",
                "$or": [{ "role": "admin" }, { "age": { "$gt": 18, "$lt": 65 } }],
            }
        );
    }

    #[test]
    fn nested_groups_are_rewritten() {
        let filter = doc! { "$and": { "$nor": { "a": 1, "b": 2 } } };

        assert_eq!(
            normalize_filter(filter),
            doc! { "$and": [{ "$nor": [{ "a": 1 }, { "b": 2 }] }] }
        );
    }

    #[test]
    fn array_groups_and_plain_fields_are_kept() {
        let filter = doc! { "$or": [{ "a": 1 }], "tags": { "$all": ["x"] } };

        assert_eq!(normalize_filter(filter.clone()), filter);
    }
}
