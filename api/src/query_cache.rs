//! In-memory cache of query outcomes so repeated dashboard loads skip the store.
//!
//! Entries are keyed by query name and live until the cache is cleared, which
//! is expected after every import.

use anyhow::{Result, anyhow};
use libros_common::QueryOutcome;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Thread-safe map from query name to its last outcome.
#[derive(Default)]
pub struct QueryCache {
    outcomes: Mutex<HashMap<String, QueryOutcome>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached outcome for `name`, or run `query` and cache what it returns.
    ///
    /// The lock is not held while the query runs. Two requests racing on a cold
    /// entry both run the query and the later result wins.
    pub fn get_or_run<F>(&self, name: &str, query: F) -> Result<QueryOutcome>
    where
        F: FnOnce() -> Result<QueryOutcome>,
    {
        {
            let outcomes = self
                .outcomes
                .lock()
                .map_err(|_| anyhow!("query cache lock poisoned"))?;
            if let Some(outcome) = outcomes.get(name) {
                tracing::debug!(query = name, "Query cache hit");
                return Ok(outcome.clone());
            }
        }

        let outcome = query()?;

        let mut outcomes = self
            .outcomes
            .lock()
            .map_err(|_| anyhow!("query cache lock poisoned"))?;
        outcomes.insert(name.to_string(), outcome.clone());
        tracing::debug!(query = name, cached = outcomes.len(), "Query cache filled");
        Ok(outcome)
    }

    /// Drop every entry, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut outcomes = self
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = outcomes.len();
        outcomes.clear();
        count
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.outcomes
            .lock()
            .map(|outcomes| outcomes.len())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test_log::test]
    fn test_second_call_is_served_from_cache() {
        let cache = QueryCache::new();
        let runs = Cell::new(0);
        let run = || {
            runs.set(runs.get() + 1);
            Ok(QueryOutcome::EmptyResult)
        };

        assert_eq!(cache.get_or_run("q", run).unwrap(), QueryOutcome::EmptyResult);
        assert_eq!(cache.get_or_run("q", run).unwrap(), QueryOutcome::EmptyResult);
        assert_eq!(runs.get(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test_log::test]
    fn test_errors_are_not_cached() {
        let cache = QueryCache::new();
        assert!(cache.get_or_run("q", || Err(anyhow!("boom"))).is_err());
        assert_eq!(cache.len(), 0);
    }

    #[test_log::test]
    fn test_clear_reports_dropped_entries() {
        let cache = QueryCache::new();
        cache
            .get_or_run("a", || Ok(QueryOutcome::EmptyResult))
            .unwrap();
        cache
            .get_or_run("b", || Ok(QueryOutcome::EmptyResult))
            .unwrap();
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.len(), 0);
    }
}
