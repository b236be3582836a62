//! Result store
//!
//! The only shared mutable state during a task. Accumulates accepted
//! results in arrival order, deduplicates by url (fallback: normalized
//! title + source), unions attribution on duplicates, and tracks the run's
//! entity set. All operations take the single mutex only for the duration
//! of the update; no lock is held across an external call.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use tracing::debug;

use crate::domain::{CoverageFacts, ResultKey, SearchResult, StoredResult};

/// Whether an `add` stored a new record or folded into an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    New,
    Duplicate,
}

/// Point-in-time counters for computing a hypothesis's facts
#[derive(Debug, Clone, Copy)]
pub struct StoreSnapshot {
    accepted: usize,
    duplicates: u64,
    entities: usize,
}

#[derive(Default)]
struct StoreInner {
    results: Vec<StoredResult>,
    index: HashMap<ResultKey, usize>,
    entities: BTreeSet<String>,
    duplicates: u64,
}

/// Per-run accumulation of deduplicated, attributed results
#[derive(Default)]
pub struct ResultStore {
    inner: Mutex<StoreInner>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one result with its attribution.
    ///
    /// Duplicates union their attribution onto the stored record; all other
    /// fields keep the first occurrence.
    pub fn add(
        &self,
        result: SearchResult,
        hypothesis_id: Option<u32>,
        task_id: u32,
    ) -> AddOutcome {
        let key = result.key();
        let mut inner = self.inner.lock().unwrap();
        if let Some(&idx) = inner.index.get(&key) {
            let stored = &mut inner.results[idx];
            if let Some(hypothesis_id) = hypothesis_id {
                stored.hypothesis_ids.insert(hypothesis_id);
            }
            stored.task_ids.insert(task_id);
            inner.duplicates += 1;
            debug!(%key, "duplicate result, attribution unioned");
            return AddOutcome::Duplicate;
        }

        let mut stored = StoredResult {
            result,
            hypothesis_ids: BTreeSet::new(),
            task_ids: BTreeSet::new(),
        };
        if let Some(hypothesis_id) = hypothesis_id {
            stored.hypothesis_ids.insert(hypothesis_id);
        }
        stored.task_ids.insert(task_id);

        let idx = inner.results.len();
        inner.results.push(stored);
        inner.index.insert(key, idx);
        AddOutcome::New
    }

    /// Merge extracted entities into the run set, returning how many were new
    pub fn merge_entities<I>(&self, entities: I) -> u32
    where
        I: IntoIterator<Item = String>,
    {
        let mut inner = self.inner.lock().unwrap();
        let mut added = 0;
        for entity in entities {
            if inner.entities.insert(entity) {
                added += 1;
            }
        }
        added
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock().unwrap();
        StoreSnapshot {
            accepted: inner.results.len(),
            duplicates: inner.duplicates,
            entities: inner.entities.len(),
        }
    }

    /// Facts for the work done since `before`:
    /// incremental_gain_percent = new / max(1, new + duplicates) x 100,
    /// rounded to integer.
    pub fn delta(&self, before: &StoreSnapshot) -> CoverageFacts {
        let inner = self.inner.lock().unwrap();
        let new = (inner.results.len() - before.accepted) as u32;
        let duplicates = (inner.duplicates - before.duplicates) as u32;
        let denominator = (new + duplicates).max(1);
        let gain = (f64::from(new) * 100.0 / f64::from(denominator)).round() as u8;
        CoverageFacts {
            new_results: new,
            duplicate_results: duplicates,
            incremental_gain_percent: gain,
            new_entities: (inner.entities.len() - before.entities) as u32,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duplicates(&self) -> u64 {
        self.inner.lock().unwrap().duplicates
    }

    pub fn entities(&self) -> BTreeSet<String> {
        self.inner.lock().unwrap().entities.clone()
    }

    /// Clone of all accepted results, in arrival order
    pub fn export(&self) -> Vec<StoredResult> {
        self.inner.lock().unwrap().results.clone()
    }

    /// Results attributed to one task, in arrival order
    pub fn results_for_task(&self, task_id: u32) -> Vec<StoredResult> {
        self.inner
            .lock()
            .unwrap()
            .results
            .iter()
            .filter(|r| r.task_ids.contains(&task_id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, url: Option<&str>, source: &str) -> SearchResult {
        let mut r = SearchResult::new(title).with_source(source);
        if let Some(url) = url {
            r = r.with_url(url);
        }
        r
    }

    #[test]
    fn test_dedup_by_url_unions_attribution() {
        let store = ResultStore::new();
        let a = result("Award Notice", Some("https://sam.gov/a"), "sam_gov");
        let b = result("Different Title Same Page", Some("https://sam.gov/a"), "dvids");

        assert_eq!(store.add(a, Some(1), 10), AddOutcome::New);
        assert_eq!(store.add(b, Some(2), 11), AddOutcome::Duplicate);

        let exported = store.export();
        assert_eq!(exported.len(), 1);
        // first occurrence wins on fields
        assert_eq!(exported[0].result.title, "Award Notice");
        assert_eq!(exported[0].result.source.as_deref(), Some("sam_gov"));
        // attribution unioned and sorted
        assert_eq!(
            exported[0].hypothesis_ids.iter().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(
            exported[0].task_ids.iter().copied().collect::<Vec<_>>(),
            vec![10, 11]
        );
    }

    #[test]
    fn test_dedup_falls_back_to_title_and_source() {
        let store = ResultStore::new();
        store.add(result("Army Awards  Contract!", None, "sam_gov"), Some(1), 1);
        let outcome = store.add(result("army awards contract", None, "sam_gov"), Some(1), 1);
        assert_eq!(outcome, AddOutcome::Duplicate);

        // same title from a different source is a different record
        let outcome = store.add(result("army awards contract", None, "dvids"), Some(1), 1);
        assert_eq!(outcome, AddOutcome::New);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_attribution_never_empty_and_only_grows() {
        let store = ResultStore::new();
        store.add(result("r", Some("https://x/1"), "s"), Some(1), 1);
        store.add(result("r", Some("https://x/1"), "s"), Some(2), 1);
        store.add(result("r", Some("https://x/1"), "s"), Some(3), 2);

        let exported = store.export();
        assert!(!exported[0].hypothesis_ids.is_empty());
        assert_eq!(exported[0].hypothesis_ids.len(), 3);
        assert_eq!(exported[0].task_ids.len(), 2);
    }

    #[test]
    fn test_delta_math() {
        let store = ResultStore::new();
        let before = store.snapshot();

        store.add(result("a", Some("https://x/a"), "s"), Some(1), 1);
        store.add(result("b", Some("https://x/b"), "s"), Some(1), 1);
        store.add(result("a", Some("https://x/a"), "s"), Some(1), 1); // dup
        store.merge_entities(["Fort Meade".to_string(), "NSA".to_string()]);

        let facts = store.delta(&before);
        assert_eq!(facts.new_results, 2);
        assert_eq!(facts.duplicate_results, 1);
        // 2 / 3 * 100 = 66.67 -> 67
        assert_eq!(facts.incremental_gain_percent, 67);
        assert_eq!(facts.new_entities, 2);
    }

    #[test]
    fn test_delta_with_no_activity_guards_division() {
        let store = ResultStore::new();
        let before = store.snapshot();
        let facts = store.delta(&before);
        assert_eq!(facts.new_results, 0);
        assert_eq!(facts.incremental_gain_percent, 0);
    }

    #[test]
    fn test_delta_only_duplicates_is_zero_gain() {
        let store = ResultStore::new();
        store.add(result("a", Some("https://x/a"), "s"), Some(1), 1);
        let before = store.snapshot();
        store.add(result("a", Some("https://x/a"), "s"), Some(2), 1);
        store.add(result("a", Some("https://x/a"), "s"), Some(3), 1);

        let facts = store.delta(&before);
        assert_eq!(facts.new_results, 0);
        assert_eq!(facts.duplicate_results, 2);
        assert_eq!(facts.incremental_gain_percent, 0);
    }

    #[test]
    fn test_results_for_task_filters_by_attribution() {
        let store = ResultStore::new();
        store.add(result("a", Some("https://x/a"), "s"), Some(1), 1);
        store.add(result("b", Some("https://x/b"), "s"), Some(2), 2);
        store.add(result("a", Some("https://x/a"), "s"), Some(3), 2); // dup attributes task 2

        assert_eq!(store.results_for_task(1).len(), 1);
        assert_eq!(store.results_for_task(2).len(), 2);
        assert!(store.results_for_task(3).is_empty());
    }

    #[test]
    fn test_entity_merge_counts_only_new() {
        let store = ResultStore::new();
        assert_eq!(store.merge_entities(["A".to_string(), "B".to_string()]), 2);
        assert_eq!(store.merge_entities(["B".to_string(), "C".to_string()]), 1);
        assert_eq!(store.entities().len(), 3);
    }
}
