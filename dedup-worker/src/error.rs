use dedup_core::error::{EngineError, StoreError};
use thiserror::Error;

/// Enumeration of errors related to initialization and polling of the
/// worker's pending-dedup queue.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("document store error while polling for pending records")]
    Store(#[from] StoreError),
    #[error("dedup engine error")]
    Engine(#[from] EngineError),
}
