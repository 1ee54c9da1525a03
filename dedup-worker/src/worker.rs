use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::error;

use dedup_common::health::HealthHandle;
use dedup_core::group_manager::GroupManager;
use dedup_core::model::Record;
use dedup_core::store::DocumentStore;

use crate::error::WorkerError;

/// A worker to poll the document store for records flagged `update_needed`
/// and run `GroupManager::dedup` on each one concurrently. Multiple workers
/// call `dedup(R)` concurrently for different subject records; a single
/// `dedup(R)` call is internally sequential.
pub struct DedupWorker {
    /// An identifier for this worker, used only in logs/metrics labels.
    name: String,
    store: Arc<dyn DocumentStore>,
    group_manager: Arc<GroupManager>,
    /// The interval for polling the store when the queue is empty.
    poll_interval: Duration,
    /// Maximum number of `dedup(R)` calls running at once.
    max_concurrent_dedups: usize,
    /// The liveness check handle, called on a schedule to report healthy.
    liveness: HealthHandle,
}

impl DedupWorker {
    pub fn new(
        name: &str,
        store: Arc<dyn DocumentStore>,
        group_manager: Arc<GroupManager>,
        poll_interval: Duration,
        max_concurrent_dedups: usize,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            name: name.to_owned(),
            store,
            group_manager,
            poll_interval,
            max_concurrent_dedups,
            liveness,
        }
    }

    /// Wait until at least one record is flagged `update_needed`.
    async fn wait_for_batch(&self) -> Result<Vec<Record>, WorkerError> {
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;
            self.liveness.report_healthy().await;

            let batch = self
                .store
                .find_pending_dedup(self.max_concurrent_dedups)
                .await?;
            if !batch.is_empty() {
                return Ok(batch);
            }
        }
    }

    /// Run this worker to continuously dedup any records that become
    /// eligible. Never returns under normal operation.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_dedups));

        loop {
            metrics::gauge!("dedup_worker_saturation_percent").set(
                1f64 - semaphore.available_permits() as f64 / self.max_concurrent_dedups as f64,
            );

            let batch = self.wait_for_batch().await?;
            for record in batch {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("semaphore has been closed");
                let group_manager = self.group_manager.clone();
                let worker_name = self.name.clone();

                tokio::spawn(async move {
                    let result = process_record(&group_manager, &record.id).await;
                    drop(permit);
                    if let Err(error) = result {
                        error!(worker = %worker_name, record = %record.id, %error, "failed to dedup record");
                    }
                });
            }
        }
    }
}

/// Run `dedup(record_id)` once and record its outcome in metrics.
async fn process_record(group_manager: &GroupManager, record_id: &str) -> Result<(), WorkerError> {
    let now = tokio::time::Instant::now();

    let matched = group_manager.dedup(record_id).await?;

    metrics::counter!("dedup_records_processed_total").increment(1);
    metrics::histogram!("dedup_record_duration_seconds").record(now.elapsed().as_secs_f64());
    if matched {
        metrics::counter!("dedup_records_matched_total").increment(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dedup_common::health::HealthRegistry;
    use dedup_core::metadata::{DefaultStringUtility, FlatRecordFactory, IdentityFormatMapper};
    use dedup_core::store::InMemoryStore;

    fn record(id: &str, source: &str, raw: &str, update_needed: bool) -> Record {
        Record {
            id: id.to_string(),
            source_id: source.to_string(),
            format: "flat".to_string(),
            oai_id: String::new(),
            deleted: false,
            raw: raw.to_string(),
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
    async fn wait_for_batch_returns_once_a_record_is_flagged() {
        let store = InMemoryStore::new();
        store
            .seed_record(record("r", "A", "title=Alpha\nisbn=9780001", true))
            .await;

        let group_manager = Arc::new(GroupManager::new(
            store.clone(),
            Arc::new(FlatRecordFactory),
            Arc::new(DefaultStringUtility),
            Arc::new(IdentityFormatMapper),
        ));
        let registry = HealthRegistry::new("liveness");
        let liveness = registry
            .register("worker".to_string(), ::time::Duration::seconds(30))
            .await;

        let worker = DedupWorker::new(
            "test",
            store,
            group_manager,
            Duration::from_millis(10),
            4,
            liveness,
        );

        let batch = worker.wait_for_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "r");
    }
}
