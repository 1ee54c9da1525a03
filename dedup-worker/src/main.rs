//! Run a worker pool that continuously drains records flagged
//! `update_needed` through `dedup_core::GroupManager::dedup`.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;

use dedup_common::health::HealthRegistry;
use dedup_common::metrics::{serve, setup_metrics_router};
use dedup_common::retry::RetryPolicy;
use dedup_core::group_manager::GroupManager;
use dedup_core::metadata::{DefaultStringUtility, FlatRecordFactory, IdentityFormatMapper};
use dedup_core::store::InMemoryStore;

mod config;
mod error;
mod worker;

use config::Config;
use error::WorkerError;
use worker::DedupWorker;

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness
        .register("worker".to_string(), time::Duration::seconds(60)) // TODO: compute the value from worker params
        .await;

    let retry = &config.group_mutation_retry;
    let retry_policy = RetryPolicy::new(
        retry.backoff_coefficient,
        retry.initial_interval.0,
        Some(retry.maximum_interval.0),
        retry.max_attempts,
    );

    // The document store, record factory, string utility and format mapper
    // are the four external collaborators the engine depends on; a real
    // deployment swaps the in-process store for its document-store driver
    // and supplies one `RecordFactory` per source format. This binary runs
    // against the in-process store so it is runnable standalone.
    let store = InMemoryStore::new();
    let group_manager = Arc::new(
        GroupManager::new(
            store.clone(),
            Arc::new(FlatRecordFactory),
            Arc::new(DefaultStringUtility),
            Arc::new(IdentityFormatMapper),
        )
        .with_retry_policy(retry_policy),
    );

    let worker = DedupWorker::new(
        &config.worker_name,
        store,
        group_manager,
        config.poll_interval.0,
        config.max_concurrent_dedups,
        worker_liveness,
    );

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = router.merge(setup_metrics_router());
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    worker.run().await?;

    Ok(())
}

pub async fn index() -> &'static str {
    "dedup-worker"
}
