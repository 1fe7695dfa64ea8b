//! The join-and-rank procedure behind every catalog query.
//!
//! Each query is a [`QuerySpec`] configuration record run through the same
//! pipeline:
//!
//! 1. resolve the optional category name to its key (absent name → [`QueryOutcome::CategoryNotFound`])
//! 2. fetch the filtered primary records, projecting only the fields needed
//! 3. extract the reference key, optionally following one foreign-key hop
//! 4. tally records per key, or average a numeric field per key
//! 5. join keys to display names from the de-duplicated lookup collection
//! 6. sort by metric descending, ties kept in first-seen order, and truncate

use crate::db_util::conversions::display_name;
use crate::db_util::{DocumentStore, Filter, Projection};
use crate::number_stats::mean_skip_invalid;
use crate::{
    DEFAULT_KEY_FIELD, DEFAULT_NAME_FIELD, DEFAULT_TOP_K, Document, Metric, QueryOutcome,
    RecordKey, ResultRow, Table,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

fn default_key_field() -> String {
    DEFAULT_KEY_FIELD.to_string()
}

fn default_name_field() -> String {
    DEFAULT_NAME_FIELD.to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_top_k() -> Option<usize> {
    Some(DEFAULT_TOP_K)
}

/// How records sharing a reference key are reduced to one metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aggregation {
    /// Number of records per distinct key.
    CountDistinctGroups,
    /// Mean of `field` per distinct key, skipping values that are not numbers.
    MeanNumericField { field: String },
}

impl Aggregation {
    fn metric_field(&self) -> Option<&str> {
        match self {
            Aggregation::CountDistinctGroups => None,
            Aggregation::MeanNumericField { field } => Some(field),
        }
    }
}

/// A collection read as `key → display name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupSpec {
    pub collection: String,
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default = "default_name_field")]
    pub name_field: String,
}

impl LookupSpec {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key_field: default_key_field(),
            name_field: default_name_field(),
        }
    }
}

/// Restrict the primary records to one named category, e.g. the genre "Misterio".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFilter {
    pub lookup: LookupSpec,
    pub name: String,
    /// Field on the primary record holding the category key.
    pub field: String,
}

/// Follow the primary's reference into `collection` and group by `field` there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub collection: String,
    #[serde(default = "default_key_field")]
    pub key_field: String,
    pub field: String,
}

/// One query, fully described as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub name: String,
    #[serde(default)]
    pub title: String,
    pub primary: String,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub category: Option<CategoryFilter>,
    #[serde(default)]
    pub through: Option<Hop>,
    pub reference_field: String,
    pub lookup: LookupSpec,
    pub aggregation: Aggregation,
    /// Keep only this many rows; `None` keeps them all.
    #[serde(default = "default_top_k")]
    pub top_k: Option<usize>,
    pub name_column: String,
    pub metric_column: String,
}

impl QuerySpec {
    /// A top-1 ranking of `primary.reference_field` joined with `lookup`.
    /// Counts records per key until [`QuerySpec::mean_of`] picks a field to average.
    pub fn new(
        name: impl Into<String>,
        primary: impl Into<String>,
        reference_field: impl Into<String>,
        lookup: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            title: String::new(),
            primary: primary.into(),
            filter: Filter::new(),
            category: None,
            through: None,
            reference_field: reference_field.into(),
            lookup: LookupSpec::new(lookup),
            aggregation: Aggregation::CountDistinctGroups,
            top_k: default_top_k(),
            name_column: DEFAULT_NAME_FIELD.to_string(),
            metric_column: "total".to_string(),
        }
    }

    #[must_use]
    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: CategoryFilter) -> Self {
        self.category = Some(category);
        self
    }

    #[must_use]
    pub fn through(mut self, collection: impl Into<String>, field: impl Into<String>) -> Self {
        self.through = Some(Hop {
            collection: collection.into(),
            key_field: default_key_field(),
            field: field.into(),
        });
        self
    }

    #[must_use]
    pub fn mean_of(mut self, field: impl Into<String>) -> Self {
        self.aggregation = Aggregation::MeanNumericField {
            field: field.into(),
        };
        self
    }

    #[must_use]
    pub fn top(mut self, top_k: Option<usize>) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub fn columns(
        mut self,
        name_column: impl Into<String>,
        metric_column: impl Into<String>,
    ) -> Self {
        self.name_column = name_column.into();
        self.metric_column = metric_column.into();
        self
    }
}

/// A lookup collection reduced to `key → display name`.
///
/// When a key appears more than once the first record seen wins, so a
/// duplicated key still joins to exactly one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lookup {
    names: HashMap<RecordKey, String>,
    duplicates: usize,
}

impl Lookup {
    pub fn from_documents(documents: &[Document], spec: &LookupSpec) -> Self {
        let mut lookup = Self::default();
        for document in documents {
            let Some(key) = document.get(&spec.key_field).and_then(RecordKey::from_value) else {
                continue;
            };
            let Some(name) = document.get(&spec.name_field).and_then(display_name) else {
                continue;
            };
            if lookup.names.contains_key(&key) {
                lookup.duplicates += 1;
            } else {
                lookup.names.insert(key, name);
            }
        }
        lookup
    }

    /// Fetch the whole lookup collection once, projecting key and name.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub fn load(store: &dyn DocumentStore, spec: &LookupSpec) -> Result<Self> {
        let projection = Projection::fields([spec.key_field.clone(), spec.name_field.clone()]);
        let documents = store
            .find(&spec.collection, &Filter::new(), &projection)
            .with_context(|| format!("could not load lookup collection {}", spec.collection))?;
        let lookup = Self::from_documents(&documents, spec);
        if lookup.duplicates > 0 {
            log::debug!(
                "Lookup {} had {} duplicate keys; kept the first of each",
                spec.collection,
                lookup.duplicates
            );
        }
        Ok(lookup)
    }

    pub fn name(&self, key: &RecordKey) -> Option<&str> {
        self.names.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

/// Count occurrences per key, keeping keys in first-seen order.
pub fn tally<'a, I>(keys: I) -> Vec<(RecordKey, u64)>
where
    I: IntoIterator<Item = &'a RecordKey>,
{
    let mut index: HashMap<&RecordKey, usize> = HashMap::new();
    let mut counts: Vec<(RecordKey, u64)> = Vec::new();
    for key in keys {
        match index.get(key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(key, counts.len());
                counts.push((key.clone(), 1));
            }
        }
    }
    counts
}

/// Mean of the numeric values per key, keys in first-seen order.
/// Keys with no numeric value at all are left out.
pub fn group_means(records: &[(RecordKey, Option<Value>)]) -> Vec<(RecordKey, f64)> {
    let mut index: HashMap<&RecordKey, usize> = HashMap::new();
    let mut groups: Vec<(&RecordKey, Vec<&Value>)> = Vec::new();
    for (key, value) in records {
        let i = *index.entry(key).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        if let Some(value) = value {
            groups[i].1.push(value);
        }
    }
    groups
        .into_iter()
        .filter_map(|(key, values)| mean_skip_invalid(values).map(|mean| (key.clone(), mean)))
        .collect()
}

/// Sort rows by metric, largest first, and keep the first `top_k`.
/// The sort is stable, so equal metrics keep their incoming order.
pub fn rank(rows: &mut Vec<ResultRow>, top_k: Option<usize>) {
    rows.sort_by(|a, b| b.metric.as_f64().total_cmp(&a.metric.as_f64()));
    if let Some(k) = top_k {
        rows.truncate(k);
    }
}

/// Run one query against `store`.
///
/// # Errors
/// Only store failures are errors. Empty matches and unknown categories are
/// reported through [`QueryOutcome`].
pub fn run_query(store: &dyn DocumentStore, spec: &QuerySpec) -> Result<QueryOutcome> {
    let mut filter = spec.filter.clone();
    if let Some(category) = &spec.category {
        match resolve_category(store, category)? {
            Some(key) => filter = filter.with_eq(category.field.clone(), key),
            None => {
                log::debug!(
                    "{}: category {:?} not found in {}",
                    spec.name,
                    category.name,
                    category.lookup.collection
                );
                return Ok(QueryOutcome::CategoryNotFound {
                    collection: category.lookup.collection.clone(),
                    name: category.name.clone(),
                });
            }
        }
    }

    let keyed = extract_keyed_records(store, spec, &filter)?;
    log::debug!("{}: {} records carry a reference key", spec.name, keyed.len());
    if keyed.is_empty() {
        return Ok(QueryOutcome::EmptyResult);
    }

    let groups: Vec<(RecordKey, Metric)> = match &spec.aggregation {
        Aggregation::CountDistinctGroups => tally(keyed.iter().map(|(key, _)| key))
            .into_iter()
            .map(|(key, n)| (key, Metric::Count(n)))
            .collect(),
        Aggregation::MeanNumericField { .. } => group_means(&keyed)
            .into_iter()
            .map(|(key, mean)| (key, Metric::Mean(mean)))
            .collect(),
    };
    if groups.is_empty() {
        return Ok(QueryOutcome::EmptyResult);
    }

    let lookup = Lookup::load(store, &spec.lookup)?;
    let group_count = groups.len();
    let mut rows: Vec<ResultRow> = groups
        .into_iter()
        .filter_map(|(key, metric)| {
            lookup.name(&key).map(|name| ResultRow {
                name: name.to_string(),
                metric,
            })
        })
        .collect();
    if rows.len() < group_count {
        log::debug!(
            "{}: dropped {} groups with no entry in {}",
            spec.name,
            group_count - rows.len(),
            spec.lookup.collection
        );
    }

    rank(&mut rows, spec.top_k);
    if rows.is_empty() {
        return Ok(QueryOutcome::EmptyResult);
    }
    Ok(QueryOutcome::Found(Table {
        name_column: spec.name_column.clone(),
        metric_column: spec.metric_column.clone(),
        rows,
    }))
}

/// The key of the first lookup record carrying the category name.
fn resolve_category(
    store: &dyn DocumentStore,
    category: &CategoryFilter,
) -> Result<Option<Value>> {
    let filter =
        Filter::new().with_eq(category.lookup.name_field.clone(), category.name.clone());
    let projection = Projection::fields([category.lookup.key_field.clone()]);
    let found = store.find_one(&category.lookup.collection, &filter, &projection)?;
    Ok(found.and_then(|d| d.get(&category.lookup.key_field).cloned()))
}

fn key_projection(reference_field: &str, metric_field: Option<&str>) -> Projection {
    let mut fields = vec![reference_field.to_string()];
    if let Some(metric_field) = metric_field {
        fields.push(metric_field.to_string());
    }
    Projection::Fields(fields)
}

/// Pair each record's reference key with its metric value, dropping records
/// without a usable key.
fn key_records(
    documents: &[Document],
    reference_field: &str,
    metric_field: Option<&str>,
) -> Vec<(RecordKey, Option<Value>)> {
    documents
        .iter()
        .filter_map(|d| {
            let key = d.get(reference_field).and_then(RecordKey::from_value)?;
            let value = metric_field.and_then(|f| d.get(f).cloned());
            Some((key, value))
        })
        .collect()
}

fn extract_keyed_records(
    store: &dyn DocumentStore,
    spec: &QuerySpec,
    filter: &Filter,
) -> Result<Vec<(RecordKey, Option<Value>)>> {
    let metric_field = spec.aggregation.metric_field();

    let Some(hop) = &spec.through else {
        let projection = key_projection(&spec.reference_field, metric_field);
        let documents = store.find(&spec.primary, filter, &projection)?;
        return Ok(key_records(&documents, &spec.reference_field, metric_field));
    };

    let documents = store.find(
        &spec.primary,
        filter,
        &Projection::fields([spec.reference_field.clone()]),
    )?;
    let hop_keys: Vec<RecordKey> = documents
        .iter()
        .filter_map(|d| d.get(&spec.reference_field).and_then(RecordKey::from_value))
        .collect();
    if hop_keys.is_empty() {
        return Ok(Vec::new());
    }

    // each target record counts once, however many primary records point at it
    let hop_filter = Filter::new().with_key_in(hop.key_field.clone(), hop_keys);
    let projection = key_projection(&hop.field, metric_field);
    let targets = store.find(&hop.collection, &hop_filter, &projection)?;
    Ok(key_records(&targets, &hop.field, metric_field))
}
