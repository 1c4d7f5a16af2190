use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Coordination service unreachable or session down. Retryable.
    #[error("coordination service unavailable: {0}")]
    Connection(String),

    /// Malformed URL or missing required parameter. Not retryable
    /// without a caller-side fix.
    #[error("registration failed: {0}")]
    Registration(String),

    /// Lookup of a node or entry that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create of a node that already exists. The registry core turns
    /// this into delete-then-create upsert semantics.
    #[error("node already exists: {0}")]
    AlreadyExists(String),

    /// Node name that is not a valid encoded service URL.
    #[error("malformed node name: {0}")]
    Decode(String),

    /// Operation on a destroyed registry or a closed listener.
    #[error("resource closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
