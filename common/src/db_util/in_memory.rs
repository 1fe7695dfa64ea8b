//! InMemoryStore - insertion-ordered collections held in memory.

use super::{DocumentStore, Filter, Projection};
use crate::Document;
use crate::dataset::Dataset;
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-memory document store. Clone-friendly via Arc.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    collections: Arc<RwLock<HashMap<String, Vec<Document>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding a snapshot of every collection in `dataset`.
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let collections = dataset
            .collections()
            .map(|(name, documents)| (name.to_string(), documents.to_vec()))
            .collect();
        Self {
            collections: Arc::new(RwLock::new(collections)),
        }
    }
}

impl DocumentStore for InMemoryStore {
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<Document>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| anyhow!("document store lock poisoned"))?;

        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|d| filter.matches(d))
                    .map(|d| projection.apply(d.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| anyhow!("document store lock poisoned"))?;

        collections
            .entry(collection.to_string())
            .or_default()
            .extend(documents.iter().cloned());
        Ok(documents.len())
    }

    fn clear(&self, collection: &str) -> Result<u64> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| anyhow!("document store lock poisoned"))?;

        Ok(collections
            .remove(collection)
            .map_or(0, |removed| removed.len() as u64))
    }

    fn collection_names(&self) -> Result<Vec<String>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| anyhow!("document store lock poisoned"))?;

        let mut names: Vec<String> = collections
            .iter()
            .filter(|(_, documents)| !documents.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
