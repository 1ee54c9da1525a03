//! The `DocumentStore` trait seam and an in-process implementation.
//!
//! Production deployments plug in a real document-store driver (out of
//! scope); this in-process store exists so the engine can be
//! exercised and tested against a real, behaviorally-faithful
//! implementation of the trait rather than a mock.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::model::{CandidateIndex, DedupGroup, Record};

/// A lazily-evaluated sequence of candidate records. The in-process store
/// materializes it eagerly since there is no cursor to stream from, but
/// the trait keeps the Vec so `dedup-core` callers can early-exit without
/// the store having done unbounded work up front in a real backend.
pub type Cursor<T> = std::vec::IntoIter<T>;

/// Two collections, `record` and `dedup`, each addressable by primary id
/// and by equality on the indexed candidate-generation fields.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_record(&self, id: &str) -> Result<Option<Record>, StoreError>;
    async fn find_group(&self, id: &str) -> Result<Option<DedupGroup>, StoreError>;

    /// Records carrying `key` in the named candidate index, excluding
    /// `source_id`'s own records is NOT done here: the candidate generator
    /// performs that and all other in-stream filtering itself.
    async fn find_by_index(
        &self,
        index: CandidateIndex,
        key: &str,
    ) -> Result<Cursor<Record>, StoreError>;

    /// All non-deleted records with `(source_id, host_record_id) = (source_id, linking_id)`.
    async fn find_components(
        &self,
        source_id: &str,
        linking_id: &str,
    ) -> Result<Vec<Record>, StoreError>;

    /// Up to `limit` non-deleted records flagged `update_needed`: the work
    /// queue a worker pool pulls subject records from. Order across
    /// calls is not guaranteed; a worker re-polls once its batch drains.
    async fn find_pending_dedup(&self, limit: usize) -> Result<Vec<Record>, StoreError>;

    async fn save_record(&self, record: &Record) -> Result<(), StoreError>;

    /// Insert a brand-new group, failing if one with the same id exists.
    async fn insert_group(&self, group: &DedupGroup) -> Result<(), StoreError>;

    /// Optimistic-concurrency update: succeeds only if the stored group's
    /// `changed` timestamp still matches `expected_changed`, then persists
    /// `group` (whose `changed` field the caller has already bumped).
    /// Returns `StoreError::Conflict` if another writer won the race.
    async fn save_group_cas(
        &self,
        group: &DedupGroup,
        expected_changed: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// A single in-memory record/group table pair, guarded by one `RwLock` per
/// collection. Good enough to stand in for a real store in tests and for
/// `dedup-worker`'s default runnable configuration.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, Record>>,
    groups: RwLock<HashMap<String, DedupGroup>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn seed_record(&self, record: Record) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    /// Snapshot helper for idempotence tests: compares the full
    /// store content, not just a subset of fields.
    pub async fn snapshot(&self) -> (Vec<Record>, Vec<DedupGroup>) {
        let mut records: Vec<Record> = self.records.read().await.values().cloned().collect();
        let mut groups: Vec<DedupGroup> = self.groups.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        (records, groups)
    }
}

fn record_keys_for<'a>(record: &'a Record, index: CandidateIndex) -> &'a [String] {
    match index {
        CandidateIndex::Isbn => &record.isbn_keys,
        CandidateIndex::Id => &record.id_keys,
        CandidateIndex::Title => &record.title_keys,
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn find_record(&self, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn find_group(&self, id: &str) -> Result<Option<DedupGroup>, StoreError> {
        Ok(self.groups.read().await.get(id).cloned())
    }

    async fn find_by_index(
        &self,
        index: CandidateIndex,
        key: &str,
    ) -> Result<Cursor<Record>, StoreError> {
        let matches: Vec<Record> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| record_keys_for(r, index).iter().any(|k| k == key))
            .cloned()
            .collect();
        Ok(matches.into_iter())
    }

    async fn find_components(
        &self,
        source_id: &str,
        linking_id: &str,
    ) -> Result<Vec<Record>, StoreError> {
        let matches = self
            .records
            .read()
            .await
            .values()
            .filter(|r| {
                !r.deleted
                    && r.source_id == source_id
                    && r.host_record_id.as_deref() == Some(linking_id)
            })
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn find_pending_dedup(&self, limit: usize) -> Result<Vec<Record>, StoreError> {
        let records = self.records.read().await;
        let mut pending: Vec<Record> = records
            .values()
            .filter(|r| !r.deleted && r.update_needed)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn save_record(&self, record: &Record) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn insert_group(&self, group: &DedupGroup) -> Result<(), StoreError> {
        let mut groups = self.groups.write().await;
        if groups.contains_key(&group.id) {
            return Err(StoreError::Conflict {
                kind: "dedup",
                id: group.id.clone(),
            });
        }
        groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn save_group_cas(
        &self,
        group: &DedupGroup,
        expected_changed: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut groups = self.groups.write().await;
        if let Some(existing) = groups.get(&group.id) {
            if existing.changed != expected_changed {
                return Err(StoreError::Conflict {
                    kind: "dedup",
                    id: group.id.clone(),
                });
            }
        }
        groups.insert(group.id.clone(), group.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, update_needed: bool, deleted: bool) -> Record {
        Record {
            id: id.to_string(),
            source_id: "A".to_string(),
            format: "flat".to_string(),
            oai_id: String::new(),
            deleted,
            raw: String::new(),
            title_keys: vec![],
            isbn_keys: vec![],
            id_keys: vec![],
            host_record_id: None,
            linking_id: None,
            dedup_id: None,
            update_needed,
            updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn find_pending_dedup_filters_deleted_and_caps_the_batch() {
        let store = InMemoryStore::new();
        store.seed_record(record("a", true, false)).await;
        store.seed_record(record("b", true, true)).await; // deleted: excluded
        store.seed_record(record("c", false, false)).await; // not flagged: excluded
        store.seed_record(record("d", true, false)).await;

        let batch = store.find_pending_dedup(1).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "a");

        let batch = store.find_pending_dedup(10).await.unwrap();
        let ids: Vec<&str> = batch.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
    }
}
