//! Group Manager and the Engine API operations that are not
//! owned by another module: `dedup`, `markDuplicates`, `leave`,
//! `checkDedupRecord`, `updateDedupCandidateKeys`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use dedup_common::retry::RetryPolicy;

use crate::candidate::{generate_candidates, TooManyCandidatesRegistry};
use crate::cascade::cascade_component_parts;
use crate::error::{EngineError, StoreError};
use crate::metadata::{FormatMapper, MetadataView, RecordFactory, StringUtility};
use crate::match_predicate::is_match;
use crate::model::{DedupGroup, Record};
use crate::store::DocumentStore;

/// Open question: `leave()` re-dedups remaining group members, which may
/// transitively re-attach the record being removed. Bounded here rather
/// than left as unbounded recursion — a small constant is enough for the
/// fixed-point to settle in practice, and hitting it is logged, not an error.
const MAX_REENTRY_DEPTH: u32 = 8;

pub struct GroupManager {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) record_factory: Arc<dyn RecordFactory>,
    pub(crate) strings: Arc<dyn StringUtility>,
    pub(crate) format_mapper: Arc<dyn FormatMapper>,
    pub(crate) candidate_registry: TooManyCandidatesRegistry,
    pub(crate) group_retry_policy: RetryPolicy,
}

impl GroupManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        record_factory: Arc<dyn RecordFactory>,
        strings: Arc<dyn StringUtility>,
        format_mapper: Arc<dyn FormatMapper>,
    ) -> Self {
        Self {
            store,
            record_factory,
            strings,
            format_mapper,
            candidate_registry: TooManyCandidatesRegistry::default(),
            group_retry_policy: RetryPolicy::default(),
        }
    }

    /// Override the backoff policy used when a group mutation's optimistic
    /// concurrency check loses a race. Defaults to `RetryPolicy::default()`.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.group_retry_policy = policy;
        self
    }

    pub(crate) async fn view_of(&self, record: &Record) -> Result<Box<dyn MetadataView>, EngineError> {
        self.record_factory
            .create_record(&record.format, &record.raw, &record.oai_id, &record.source_id)
            .await
            .map_err(EngineError::from)
    }

    /// `updateDedupCandidateKeys(R, Rᵐ)`: recompute `title_keys`,
    /// `isbn_keys`, `id_keys` from `view`. Fields collapse to absent (empty
    /// `Vec`) when the source yields nothing, keeping the fields in sync
    /// with the current metadata view.
    pub fn update_dedup_candidate_keys(&self, record: &mut Record, view: &dyn MetadataView) {
        record.title_keys.clear();
        record.isbn_keys.clear();
        record.id_keys.clear();

        if let Some(title) = view.title(true).or_else(|| view.full_title()) {
            let key = self.strings.create_title_key(&title);
            if !key.is_empty() {
                record.add_title_key(key);
            }
        }
        for isbn in view.isbns() {
            let key = self.strings.normalize(&isbn);
            if !key.is_empty() {
                record.add_isbn_key(key);
            }
        }
        for id in view.unique_ids() {
            let key = self.strings.normalize(&id);
            if !key.is_empty() {
                record.add_id_key(key);
            }
        }
    }

    /// Drive the full matching flow for one subject record.
    pub async fn dedup(&self, record_id: &str) -> Result<bool, EngineError> {
        self.dedup_at_depth(record_id, 0).await
    }

    fn dedup_at_depth<'a>(
        &'a self,
        record_id: &'a str,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = Result<bool, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            let mut subject = self
                .store
                .find_record(record_id)
                .await?
                .ok_or_else(|| EngineError::RecordNotFound(record_id.to_string()))?;

            let subject_view = self.view_of(&subject).await?;
            self.update_dedup_candidate_keys(&mut subject, subject_view.as_ref());
            self.store.save_record(&subject).await?;

            let batch = generate_candidates(self.store.as_ref(), &self.candidate_registry, &subject)
                .await?;
            if batch.any_probe_tripped {
                debug!(record = %subject.id, "dedup: one or more candidate probes hit the budget guard");
            }

            for candidate in batch.candidates {
                let candidate_view = self.view_of(&candidate).await?;
                if is_match(
                    &subject,
                    subject_view.as_ref(),
                    &candidate,
                    candidate_view.as_ref(),
                    self.strings.as_ref(),
                    self.format_mapper.as_ref(),
                ) {
                    self.mark_duplicates(&subject, &candidate, depth).await?;
                    return Ok(true);
                }
            }

            if subject.dedup_id.is_some() || subject.update_needed {
                if let Some(group_id) = subject.dedup_id.clone() {
                    self.leave(&group_id, &subject.id, depth).await?;
                }
                subject.dedup_id = None;
                subject.updated = Utc::now();
                subject.update_needed = false;
                self.store.save_record(&subject).await?;
            }

            Ok(false)
        })
    }

    /// `markDuplicates(A, B)`. Resolves post-state by case on
    /// existing group membership, persists both records in one shot, then
    /// cascades to component parts when `a` is a host record.
    pub async fn mark_duplicates(&self, a: &Record, b: &Record, depth: u32) -> Result<(), EngineError> {
        let mut a = a.clone();
        let mut b = b.clone();

        let group_id = if let Some(g_b) = b.dedup_id.clone() {
            self.add_member_with_retry(&g_b, &a.id, &a.source_id).await?;
            if let Some(g_a) = a.dedup_id.clone() {
                if g_a != g_b {
                    self.leave(&g_a, &a.id, depth).await?;
                }
            }
            g_b
        } else if let Some(g_a) = a.dedup_id.clone() {
            self.add_member_with_retry(&g_a, &b.id, &b.source_id).await?;
            g_a
        } else {
            let new_id = Uuid::new_v4().to_string();
            let group = DedupGroup::new(new_id.clone(), a.id.clone(), b.id.clone(), Utc::now());
            self.store.insert_group(&group).await?;
            new_id
        };

        // Only stamp and persist a record whose stored state actually
        // changes: re-running `dedup` against an already-converged pair
        // must leave the store untouched.
        let now = Utc::now();
        if a.dedup_id.as_deref() != Some(group_id.as_str()) || a.update_needed {
            a.dedup_id = Some(group_id.clone());
            a.updated = now;
            a.update_needed = false;
            self.store.save_record(&a).await?;
        }
        if b.dedup_id.as_deref() != Some(group_id.as_str()) || b.update_needed {
            b.dedup_id = Some(group_id);
            b.updated = now;
            b.update_needed = false;
            self.store.save_record(&b).await?;
        }

        if a.host_record_id.is_none() {
            match cascade_component_parts(self, &a).await {
                Ok(count) => {
                    if count > 0 {
                        debug!(host = %a.id, matched = count, "cascaded component parts");
                    }
                }
                Err(err) => error!(host = %a.id, error = %err, "component-part cascade failed"),
            }
        }

        Ok(())
    }

    /// Would adding a record with `member_source_id` to `group` violate
    /// invariant 3 (no two same-source records in one live group)? Checked
    /// against the group's *current* membership as just re-fetched, since a
    /// concurrent worker may have committed a competing member after
    /// candidate-time filtering already passed (§5).
    async fn group_has_source(&self, group: &DedupGroup, member_source_id: &str) -> Result<bool, StoreError> {
        for existing_id in &group.ids {
            if let Some(existing) = self.store.find_record(existing_id).await? {
                if !existing.deleted && existing.source_id == member_source_id {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Add `member_id` (of `member_source_id`) to group `group_id`, retrying
    /// the read-modify-write under optimistic concurrency when another
    /// worker races us. Invariant 3 is re-checked against the freshly-fetched
    /// group on every attempt, not just once at candidate-filter time.
    async fn add_member_with_retry(
        &self,
        group_id: &str,
        member_id: &str,
        member_source_id: &str,
    ) -> Result<(), EngineError> {
        let mut attempt = 0;
        loop {
            let mut group = self
                .store
                .find_group(group_id)
                .await?
                .ok_or_else(|| EngineError::GroupNotFound(group_id.to_string()))?;
            let expected_changed = group.changed;
            if group.ids.iter().any(|id| id == member_id) {
                return Ok(()); // already a member
            }
            if self.group_has_source(&group, member_source_id).await? {
                return Err(EngineError::SourceConflict {
                    group: group_id.to_string(),
                    member: member_id.to_string(),
                    source_id: member_source_id.to_string(),
                });
            }
            group.add_member(member_id.to_string());
            group.changed = Utc::now();

            match self.store.save_group_cas(&group, expected_changed).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Conflict { .. }) if attempt < self.group_retry_policy.max_attempts() => {
                    let wait = self.group_retry_policy.time_until_next_retry(attempt);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Remove `member_id` from group `group_id` and tombstone or
    /// re-dedup as needed.
    async fn leave(&self, group_id: &str, member_id: &str, depth: u32) -> Result<(), EngineError> {
        let mut attempt = 0;
        let remaining = loop {
            let mut group = self
                .store
                .find_group(group_id)
                .await?
                .ok_or_else(|| EngineError::GroupNotFound(group_id.to_string()))?;
            let expected_changed = group.changed;

            if !group.remove_member(member_id) {
                return Ok(()); // not a member, nothing to do
            }

            let remaining_singleton = if group.ids.len() == 1 {
                let other_id = group.ids[0].clone();
                if let Some(mut other) = self.store.find_record(&other_id).await? {
                    other.dedup_id = None;
                    other.updated = Utc::now();
                    self.store.save_record(&other).await?;
                }
                group.ids.clear();
                group.deleted = true;
                None
            } else if group.ids.is_empty() {
                group.deleted = true;
                None
            } else {
                Some(group.ids.clone())
            };

            group.changed = Utc::now();

            match self.store.save_group_cas(&group, expected_changed).await {
                Ok(()) => break remaining_singleton,
                Err(StoreError::Conflict { .. }) if attempt < self.group_retry_policy.max_attempts() => {
                    let wait = self.group_retry_policy.time_until_next_retry(attempt);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(other) => return Err(other.into()),
            }
        };

        if let Some(ids) = remaining {
            if depth >= MAX_REENTRY_DEPTH {
                warn!(
                    group = %group_id,
                    depth,
                    "leave: max re-entry depth reached, skipping re-dedup of remaining members"
                );
                return Ok(());
            }
            for id in ids {
                self.dedup_at_depth(&id, depth + 1).await?;
            }
        }

        Ok(())
    }

    /// `checkDedupRecord(g) -> list<string>`: verifies invariant 2 for
    /// group `g`, expelling members whose back-link is absent or
    /// mismatched and returning human-readable repair lines.
    pub async fn check_dedup_record(&self, group_id: &str) -> Result<Vec<String>, EngineError> {
        let mut repairs = Vec::new();
        let Some(group) = self.store.find_group(group_id).await? else {
            return Ok(repairs);
        };
        if group.deleted {
            return Ok(repairs);
        }

        for member_id in group.ids.clone() {
            match self.store.find_record(&member_id).await? {
                None => {
                    error!(group = %group_id, record = %member_id, "dangling reference: member record missing");
                    repairs.push(format!(
                        "expelled {member_id} from group {group_id}: record not found"
                    ));
                    self.leave(group_id, &member_id, 0).await?;
                }
                Some(record) if record.deleted || record.dedup_id.as_deref() != Some(group_id) => {
                    error!(
                        group = %group_id,
                        record = %member_id,
                        "dangling reference: back-link absent or mismatched"
                    );
                    repairs.push(format!(
                        "expelled {member_id} from group {group_id}: back-link mismatch"
                    ));
                    self.leave(group_id, &member_id, 0).await?;
                }
                Some(_) => {}
            }
        }

        Ok(repairs)
    }
}
