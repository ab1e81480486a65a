//! Convenient re-exports of commonly used types from doclink.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use doclink::prelude::*;
//! ```

pub use doclink_core::{
    backend::{CollectionBackend, FindOptions, StoreBackend, StoreBackendBuilder},
    collection::{Collection, CollectionRegistry},
    config::StoreConfig,
    document::{Model, ModelExt},
    entity::{Entity, EntityBuilder},
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Cursor, LogicalKind, OperatorKind, Query, SortDirection},
    reference::Reference,
    store::DocumentStore,
    value::{Fields, Pattern, Timestamp, TimeZone, Value},
};
