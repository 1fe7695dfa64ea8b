//! The JSON dataset file and the bulk import into a document store.
//!
//! The file is one object whose keys are collection names and whose values
//! are arrays of flat records:
//!
//! ```json
//! { "generos": [{"_id": 1, "nombre": "Misterio"}], "libros": [...] }
//! ```

use crate::Document;
use crate::db_util::DocumentStore;
use crate::db_util::conversions::{json_type_name, value_to_document};
use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// What to do with documents already in a target collection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ImportMode {
    /// Insert alongside what is there. Re-running duplicates data.
    Append,
    /// Clear each target collection first.
    Replace,
}

/// Every collection of a dataset file, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    collections: Vec<(String, Vec<Document>)>,
}

/// What the import did to one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub collection: String,
    pub cleared: u64,
    pub inserted: usize,
}

impl Dataset {
    /// # Errors
    /// Returns an error if the file cannot be opened or is not a valid dataset.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("could not open {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("could not load dataset {}", path.display()))
    }

    /// # Errors
    /// Returns an error if the input is not JSON or is not a valid dataset.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let value: Value = serde_json::from_reader(reader).context("invalid JSON")?;
        Self::from_value(value)
    }

    /// # Errors
    /// Returns an error naming the first collection or entry with the wrong shape.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(top) = value else {
            return Err(anyhow!(
                "dataset must be an object of collections, found {}",
                json_type_name(&value)
            ));
        };

        let mut collections = Vec::with_capacity(top.len());
        for (name, entries) in top {
            let Value::Array(entries) = entries else {
                return Err(anyhow!(
                    "collection {name} must be an array, found {}",
                    json_type_name(&entries)
                ));
            };
            let documents = entries
                .into_iter()
                .enumerate()
                .map(|(i, entry)| {
                    value_to_document(entry).with_context(|| format!("{name}[{i}]"))
                })
                .collect::<Result<Vec<_>>>()?;
            collections.push((name, documents));
        }
        Ok(Self { collections })
    }

    pub fn collections(&self) -> impl Iterator<Item = (&str, &[Document])> {
        self.collections
            .iter()
            .map(|(name, documents)| (name.as_str(), documents.as_slice()))
    }

    pub fn documents(&self, collection: &str) -> Option<&[Document]> {
        self.collections()
            .find(|(name, _)| *name == collection)
            .map(|(_, documents)| documents)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

/// Write every collection of `dataset` into `store`.
///
/// # Errors
/// Returns an error on the first collection the store fails to write.
pub fn import_dataset(
    store: &dyn DocumentStore,
    dataset: &Dataset,
    mode: ImportMode,
) -> Result<Vec<ImportSummary>> {
    let mut summaries = Vec::with_capacity(dataset.len());
    for (collection, documents) in dataset.collections() {
        let cleared = match mode {
            ImportMode::Replace => store.clear(collection)?,
            ImportMode::Append => 0,
        };
        let inserted = if documents.is_empty() {
            0
        } else {
            store.insert_many(collection, documents)?
        };
        log::info!("Imported {inserted} documents into {collection} (cleared {cleared})");
        summaries.push(ImportSummary {
            collection: collection.to_string(),
            cleared,
            inserted,
        });
    }
    Ok(summaries)
}
