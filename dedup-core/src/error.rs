use thiserror::Error;

/// Errors surfaced by the document store. Per the engine's propagation
/// policy these are always fatal to the call that triggered them.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store query failed: {0}")]
    Query(String),
    #[error("optimistic concurrency conflict on {kind} {id}")]
    Conflict { kind: &'static str, id: String },
}

/// Errors surfaced by the record factory while parsing a raw payload.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("no record factory registered for format {0}")]
    UnknownFormat(String),
    #[error("failed to parse raw payload: {0}")]
    Parse(String),
}

/// Top-level error returned by `GroupManager` operations. Dangling
/// references, budget trips and missing linking ids are *not* modeled
/// here: they are recovered locally with logging rather than
/// propagated.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("record {0} not found")]
    RecordNotFound(String),
    #[error("group {0} not found")]
    GroupNotFound(String),
    #[error("cannot add {member} to group {group}: a record from source {source_id} is already a member")]
    SourceConflict {
        group: String,
        member: String,
        source_id: String,
    },
}
