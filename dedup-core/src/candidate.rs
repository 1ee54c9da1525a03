//! Candidate generation: an ordered, filtered, budget-guarded
//! stream of plausible match candidates for a subject record.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::debug;

use crate::error::StoreError;
use crate::model::{CandidateIndex, Record};
use crate::store::DocumentStore;

/// Per-probe candidate ceiling before the generator abandons a probe with
/// a too-many-candidates event.
const DEFAULT_BUDGET: usize = 1_000;
/// Ceiling applied to a probe that has already tripped the guard once.
const TRIPPED_BUDGET: usize = 100;
/// Capacity of the bounded LRU-like registry of tripped probes.
const REGISTRY_CAPACITY: usize = 2_000;

/// Process-wide-shaped, but owned-by-the-engine (not a process global)
/// registry of `(index, key)` probes that have tripped the
/// budget guard before. Re-encountering a registered probe drops its
/// budget to `TRIPPED_BUDGET`. Eviction is oldest-first, insertion order.
pub struct TooManyCandidatesRegistry {
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    order: VecDeque<(CandidateIndex, String)>,
    capacity: usize,
}

impl Default for TooManyCandidatesRegistry {
    fn default() -> Self {
        Self::new(REGISTRY_CAPACITY)
    }
}

impl TooManyCandidatesRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                order: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
            }),
        }
    }

    fn contains(&self, index: CandidateIndex, key: &str) -> bool {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.order.iter().any(|(i, k)| *i == index && k == key)
    }

    /// Record that `(index, key)` tripped the guard. No-op if already present.
    fn record_trip(&self, index: CandidateIndex, key: &str) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if inner.order.iter().any(|(i, k)| *i == index && k == key) {
            return;
        }
        if inner.order.len() >= inner.capacity {
            inner.order.pop_front();
        }
        inner.order.push_back((index, key.to_string()));
    }

    fn budget_for(&self, index: CandidateIndex, key: &str) -> usize {
        if self.contains(index, key) {
            TRIPPED_BUDGET
        } else {
            DEFAULT_BUDGET
        }
    }
}

/// Outcome of generating candidates for one subject record: the candidates
/// that survived in-stream filtering, in priority order, plus whether any probe
/// tripped the budget guard along the way (a normal terminal condition,
/// never an error).
pub struct CandidateBatch {
    pub candidates: Vec<Record>,
    pub any_probe_tripped: bool,
}

/// Would admitting `candidate` break invariant 3 (no two same-source
/// records in one live group)? True iff `candidate` already belongs to a
/// different live group than `subject` that already holds a record from
/// `subject.source_id`.
async fn violates_source_uniqueness(
    store: &dyn DocumentStore,
    subject: &Record,
    candidate: &Record,
) -> Result<bool, StoreError> {
    let Some(group_id) = &candidate.dedup_id else {
        return Ok(false);
    };
    if subject.dedup_id.as_deref() == Some(group_id.as_str()) {
        return Ok(false);
    }
    let Some(group) = store.find_group(group_id).await? else {
        return Ok(false); // dangling reference: not this call site's concern
    };
    if group.deleted {
        return Ok(false);
    }
    for member_id in &group.ids {
        if member_id == &candidate.id {
            continue;
        }
        if let Some(member) = store.find_record(member_id).await? {
            if !member.deleted && member.source_id == subject.source_id {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Yield candidates for `subject` from `store`, applying the priority ladder,
/// in-stream filters and budget guard.
pub async fn generate_candidates(
    store: &dyn DocumentStore,
    registry: &TooManyCandidatesRegistry,
    subject: &Record,
) -> Result<CandidateBatch, StoreError> {
    let mut candidates = Vec::new();
    let mut any_probe_tripped = false;
    let mut seen_ids = std::collections::HashSet::new();

    for &index in CandidateIndex::PRIORITY_ORDER.iter() {
        let keys = match index {
            CandidateIndex::Isbn => &subject.isbn_keys,
            CandidateIndex::Id => &subject.id_keys,
            CandidateIndex::Title => &subject.title_keys,
        };

        for key in keys {
            if key.is_empty() {
                continue;
            }
            let budget = registry.budget_for(index, key);
            let cursor = store.find_by_index(index, key).await?;

            let mut processed = 0usize;
            let mut tripped = false;
            for candidate in cursor {
                if processed >= budget {
                    tripped = true;
                    break;
                }
                processed += 1;

                if candidate.deleted || candidate.source_id == subject.source_id {
                    continue;
                }
                if matches!(index, CandidateIndex::Id | CandidateIndex::Title)
                    && subject.shares_isbn_key(&candidate)
                {
                    continue;
                }
                if matches!(index, CandidateIndex::Title) && subject.shares_id_key(&candidate) {
                    continue;
                }
                if violates_source_uniqueness(store, subject, &candidate).await? {
                    continue;
                }
                if seen_ids.insert(candidate.id.clone()) {
                    candidates.push(candidate);
                }
            }

            if tripped {
                any_probe_tripped = true;
                registry.record_trip(index, key);
                debug!(
                    index = ?index,
                    key = %key,
                    "candidate generator abandoned probe: too many candidates"
                );
            }
        }
    }

    Ok(CandidateBatch {
        candidates,
        any_probe_tripped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, source: &str) -> Record {
        Record {
            id: id.to_string(),
            source_id: source.to_string(),
            format: "flat".to_string(),
            oai_id: String::new(),
            deleted: false,
            raw: String::new(),
            title_keys: vec![],
            isbn_keys: vec![],
            id_keys: vec![],
            host_record_id: None,
            linking_id: None,
            dedup_id: None,
            update_needed: false,
            updated: Utc::now(),
        }
    }

    #[test]
    fn registry_escalates_and_evicts_oldest() {
        let registry = TooManyCandidatesRegistry::new(2);
        assert_eq!(registry.budget_for(CandidateIndex::Isbn, "k1"), DEFAULT_BUDGET);

        registry.record_trip(CandidateIndex::Isbn, "k1");
        assert_eq!(registry.budget_for(CandidateIndex::Isbn, "k1"), TRIPPED_BUDGET);

        registry.record_trip(CandidateIndex::Isbn, "k2");
        registry.record_trip(CandidateIndex::Isbn, "k3"); // evicts k1

        assert_eq!(registry.budget_for(CandidateIndex::Isbn, "k1"), DEFAULT_BUDGET);
        assert_eq!(registry.budget_for(CandidateIndex::Isbn, "k3"), TRIPPED_BUDGET);
    }

    #[tokio::test]
    async fn same_source_candidates_are_dropped() {
        let store = crate::store::InMemoryStore::new();
        let mut r = record("r1", "A");
        r.isbn_keys.push("9780001".to_string());
        let mut same_source = record("r2", "A");
        same_source.isbn_keys.push("9780001".to_string());
        store.seed_record(r.clone()).await;
        store.seed_record(same_source).await;

        let registry = TooManyCandidatesRegistry::default();
        let batch = generate_candidates(store.as_ref(), &registry, &r)
            .await
            .unwrap();

        assert!(batch.candidates.is_empty());
    }

    #[tokio::test]
    async fn title_pass_skips_records_already_found_via_isbn_or_id() {
        let store = crate::store::InMemoryStore::new();
        let mut r = record("r1", "A");
        r.isbn_keys.push("isbn-x".to_string());
        r.id_keys.push("id-x".to_string());
        r.title_keys.push("title-x".to_string());

        let mut via_isbn = record("c1", "B");
        via_isbn.isbn_keys.push("isbn-x".to_string());
        via_isbn.title_keys.push("title-x".to_string());

        let mut via_title_only = record("c2", "C");
        via_title_only.title_keys.push("title-x".to_string());

        store.seed_record(r.clone()).await;
        store.seed_record(via_isbn).await;
        store.seed_record(via_title_only.clone()).await;

        let registry = TooManyCandidatesRegistry::default();
        let batch = generate_candidates(store.as_ref(), &registry, &r)
            .await
            .unwrap();

        let ids: Vec<&str> = batch.candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2"]);
    }

    #[tokio::test]
    async fn budget_guard_trips_past_one_thousand() {
        let store = crate::store::InMemoryStore::new();
        let mut r = record("r1", "A");
        r.title_keys.push("generic".to_string());
        store.seed_record(r.clone()).await;

        for i in 0..1001 {
            let mut c = record(&format!("c{i}"), "B");
            c.title_keys.push("generic".to_string());
            store.seed_record(c).await;
        }

        let registry = TooManyCandidatesRegistry::default();
        let batch = generate_candidates(store.as_ref(), &registry, &r)
            .await
            .unwrap();

        assert!(batch.any_probe_tripped);
        assert_eq!(batch.candidates.len(), DEFAULT_BUDGET);
    }

    #[tokio::test]
    async fn budget_guard_untripped_at_exactly_one_thousand() {
        let store = crate::store::InMemoryStore::new();
        let mut r = record("r1", "A");
        r.title_keys.push("generic".to_string());
        store.seed_record(r.clone()).await;

        for i in 0..1000 {
            let mut c = record(&format!("c{i}"), "B");
            c.title_keys.push("generic".to_string());
            store.seed_record(c).await;
        }

        let registry = TooManyCandidatesRegistry::default();
        let batch = generate_candidates(store.as_ref(), &registry, &r)
            .await
            .unwrap();

        assert!(!batch.any_probe_tripped);
        assert_eq!(batch.candidates.len(), 1000);
    }
}
