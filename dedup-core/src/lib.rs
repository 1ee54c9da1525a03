//! Bibliographic record deduplication engine.
//!
//! Candidate generation, the match predicate, dedup-group maintenance and
//! component-part cascading, against a pluggable `DocumentStore` and the
//! `RecordFactory` / `StringUtility` / `FormatMapper` collaborator seams.

pub mod candidate;
pub mod cascade;
pub mod error;
pub mod group_manager;
pub mod match_predicate;
pub mod metadata;
pub mod model;
pub mod store;

pub use error::EngineError;
pub use group_manager::GroupManager;
pub use model::{CandidateIndex, DedupGroup, Record};
