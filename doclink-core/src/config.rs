//! Store configuration.
//!
//! [`StoreConfig`] carries the settings a [`DocumentStore`](crate::store::DocumentStore)
//! is created with. It can be built in code or deserialized from JSON:
//!
//! ```ignore
//! let config = StoreConfig::from_json(r#"{
//!     "database": "app",
//!     "uri": "mongodb://localhost:27017",
//!     "default_time_zone": "+02:00"
//! }"#)?;
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    value::{TimeZone, utc},
};

/// Settings for a document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name of the database collections live in.
    pub database: String,
    /// Connection string for backends that connect to a server.
    pub uri: Option<String>,
    /// Time zone timestamps are presented in unless an entity overrides it.
    #[serde(serialize_with = "serialize_zone", deserialize_with = "deserialize_zone")]
    pub default_time_zone: TimeZone,
}

impl StoreConfig {
    /// Creates a configuration for `database` with no connection string and UTC timestamps.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Parses a configuration from a JSON string. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Serialization`] if the JSON is malformed.
    pub fn from_json(json: &str) -> DocumentStoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the connection string.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Sets the default time zone.
    pub fn with_default_time_zone(mut self, zone: TimeZone) -> Self {
        self.default_time_zone = zone;
        self
    }

    /// Returns the connection string or an initialization error if none is set.
    pub fn require_uri(&self) -> DocumentStoreResult<&str> {
        self.uri
            .as_deref()
            .ok_or_else(|| DocumentStoreError::Initialization("no connection uri configured".into()))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: "doclink".to_string(),
            uri: None,
            default_time_zone: utc(),
        }
    }
}

/// Parses an offset such as `+02:00`, `-0530`, `Z` or `UTC`.
pub fn parse_time_zone(input: &str) -> DocumentStoreResult<TimeZone> {
    let trimmed = input.trim();

    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(utc());
    }

    trimmed
        .parse::<TimeZone>()
        .map_err(|err| DocumentStoreError::Serialization(format!("invalid time zone {input:?}: {err}")))
}

fn serialize_zone<S: Serializer>(zone: &TimeZone, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&zone.to_string())
}

fn deserialize_zone<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TimeZone, D::Error> {
    let raw = String::deserialize(deserializer)?;

    parse_time_zone(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let config = StoreConfig::from_json(r#"{ "database": "app" }"#).unwrap();

        assert_eq!(config.database, "app");
        assert_eq!(config.uri, None);
        assert_eq!(config.default_time_zone, utc());
    }

    #[test]
    fn time_zone_is_parsed() {
        let config = StoreConfig::from_json(r#"{ "default_time_zone": "+02:00" }"#).unwrap();

        assert_eq!(config.default_time_zone.local_minus_utc(), 2 * 3600);
        assert_eq!(config.database, "doclink");
    }

    #[test]
    fn invalid_time_zone_is_rejected() {
        assert!(StoreConfig::from_json(r#"{ "default_time_zone": "Mars/Olympus" }"#).is_err());
    }

    #[test]
    fn missing_uri_is_an_initialization_error() {
        let err = StoreConfig::new("app").require_uri().unwrap_err();

        assert!(matches!(err, DocumentStoreError::Initialization(_)));
        assert_eq!(
            StoreConfig::new("app").with_uri("mongodb://localhost").require_uri().unwrap(),
            "mongodb://localhost"
        );
    }
}
