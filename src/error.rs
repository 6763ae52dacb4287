//! Typed errors returned by every public engine operation.
//!
//! The first five variants are the boundary taxonomy seen by the service layer.
//! The rest wrap lower-level failures (SQLite, JSON, task joins) so they can be
//! propagated with `?` without collapsing into strings.

use std::time::Duration;

use crate::memory::types::Scope;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The embedder failed, timed out, or returned a vector of the wrong size.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A collection's declared vector dimension differs from the one in use.
    #[error("schema mismatch on collection `{collection}`: declared dimension {declared}, got {actual}")]
    SchemaMismatch {
        collection: String,
        declared: usize,
        actual: usize,
    },

    /// Another prune is already running for this scope. Requests are rejected, not queued.
    #[error("a prune is already in progress for scope `{0}`")]
    PruneInProgress(Scope),

    /// A metrics sample could not be taken.
    #[error("metrics collection failed: {0}")]
    CollectorFailure(String),

    /// A bounded wait on the backing store was exceeded.
    #[error("backing store did not respond within {0:?}")]
    BackingStoreTimeout(Duration),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl MemoryError {
    /// Short machine-readable code, used in tool responses and audit details.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmbeddingUnavailable(_) => "embedding_unavailable",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::PruneInProgress(_) => "prune_in_progress",
            Self::CollectorFailure(_) => "collector_failure",
            Self::BackingStoreTimeout(_) => "backing_store_timeout",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Storage(_) => "storage",
            Self::VectorStore(_) => "vector_store",
            Self::Serialization(_) => "serialization",
            Self::Task(_) => "task",
        }
    }
}

pub type Result<T, E = MemoryError> = std::result::Result<T, E>;
