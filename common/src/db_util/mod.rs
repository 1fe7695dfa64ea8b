//! Interfaces between the application code and the document store.

mod config;
pub mod conversions;
#[cfg(feature = "database")]
mod documents;
mod in_memory;

use crate::{Document, RecordKey};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

pub use config::DatabaseConfig;
#[cfg(feature = "database")]
pub use documents::{PgDocumentStore, PgPool, get_database_connection};
pub use in_memory::InMemoryStore;

/// A conjunctive filter over the documents of one collection.
///
/// Deserializes from a plain `{field: value}` map. Key memberships are only
/// built in code, for following a foreign key into another collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    equals: Map<String, Value>,
    #[serde(skip)]
    memberships: Vec<Membership>,
}

#[derive(Debug, Clone, PartialEq)]
struct Membership {
    field: String,
    keys: BTreeSet<RecordKey>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`.
    #[must_use]
    pub fn with_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    /// Require the key held in `field` to be one of `keys`.
    #[must_use]
    pub fn with_key_in(
        mut self,
        field: impl Into<String>,
        keys: impl IntoIterator<Item = RecordKey>,
    ) -> Self {
        self.memberships.push(Membership {
            field: field.into(),
            keys: keys.into_iter().collect(),
        });
        self
    }

    pub fn equals(&self) -> &Map<String, Value> {
        &self.equals
    }

    pub fn has_memberships(&self) -> bool {
        !self.memberships.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.memberships.is_empty()
    }

    pub fn matches(&self, document: &Document) -> bool {
        let equals_ok = self.equals.iter().all(|(field, required)| {
            document
                .get(field)
                .is_some_and(|actual| conversions::values_match(actual, required))
        });
        equals_ok
            && self.memberships.iter().all(|m| {
                document
                    .get(&m.field)
                    .and_then(RecordKey::from_value)
                    .is_some_and(|key| m.keys.contains(&key))
            })
    }
}

/// Which fields of a matching document to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Fields(Vec<String>),
}

impl Projection {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Fields(fields.into_iter().map(Into::into).collect())
    }

    /// Keep only the projected fields. Missing fields stay missing.
    pub fn apply(&self, document: Document) -> Document {
        match self {
            Projection::All => document,
            Projection::Fields(fields) => document
                .into_iter()
                .filter(|(name, _)| fields.contains(name))
                .collect(),
        }
    }
}

/// Read and bulk-write access to a set of named document collections.
///
/// Documents come back in insertion order. A collection that was never
/// written behaves as an empty one.
pub trait DocumentStore: Send + Sync {
    /// All documents of `collection` matching `filter`, reduced to `projection`.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be read.
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<Document>>;

    /// The first matching document, if any.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be read.
    fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Option<Document>> {
        Ok(self
            .find(collection, filter, projection)?
            .into_iter()
            .next())
    }

    /// Number of documents of `collection` matching `filter`.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be read.
    fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let matches = self.find(collection, filter, &Projection::Fields(Vec::new()))?;
        Ok(matches.len() as u64)
    }

    /// Append documents to `collection`, returning how many were written.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be written.
    fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize>;

    /// Remove every document of `collection`, returning how many were removed.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be written.
    fn clear(&self, collection: &str) -> Result<u64>;

    /// Names of all non-empty collections, sorted.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be read.
    fn collection_names(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test_log::test]
    fn test_empty_filter_matches_everything() {
        let filter = Filter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&doc(json!({}))));
        assert!(filter.matches(&doc(json!({"ganador": false}))));
    }

    #[test_log::test]
    fn test_filter_is_conjunctive() {
        let filter = Filter::new().with_eq("ganador", true).with_eq("premio", 3);
        assert!(filter.matches(&doc(json!({"ganador": true, "premio": 3}))));
        assert!(filter.matches(&doc(json!({"ganador": true, "premio": 3.0}))));
        assert!(!filter.matches(&doc(json!({"ganador": true, "premio": 4}))));
        assert!(!filter.matches(&doc(json!({"ganador": true}))));
    }

    #[test_log::test]
    fn test_filter_key_membership() {
        let filter =
            Filter::new().with_key_in("_id", [RecordKey::from(1), RecordKey::from("3")]);
        assert!(filter.has_memberships());
        assert!(filter.matches(&doc(json!({"_id": 1}))));
        assert!(filter.matches(&doc(json!({"_id": 1.0}))));
        assert!(filter.matches(&doc(json!({"_id": "3"}))));
        assert!(!filter.matches(&doc(json!({"_id": 3}))));
        assert!(!filter.matches(&doc(json!({"_id": "1"}))));
        assert!(!filter.matches(&doc(json!({"_id": 2}))));
        assert!(!filter.matches(&doc(json!({"titulo": "sin id"}))));
    }

    #[test_log::test]
    fn test_filter_deserializes_from_map() {
        let filter: Filter = serde_json::from_value(json!({"ganador": true})).unwrap();
        assert_eq!(filter, Filter::new().with_eq("ganador", true));
    }

    #[test_log::test]
    fn test_projection_keeps_only_listed_fields() {
        let projected = Projection::fields(["idioma"])
            .apply(doc(json!({"_id": 1, "idioma": "es", "titulo": "X"})));
        assert_eq!(Value::Object(projected), json!({"idioma": "es"}));

        let missing = Projection::fields(["idioma"]).apply(doc(json!({"_id": 2})));
        assert!(missing.is_empty());

        let all = Projection::All.apply(doc(json!({"_id": 3})));
        assert_eq!(Value::Object(all), json!({"_id": 3}));
    }
}
