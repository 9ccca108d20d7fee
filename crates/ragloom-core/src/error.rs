//! Error taxonomy for the chunking and retrieval pipeline.
//!
//! Pure operations (chunking, filter building, argument checks) fail with
//! one of the caller-facing variants of [`Error`]. The two external
//! boundaries, the vector store and the embedder, report [`StoreError`]
//! and [`EmbedError`], which surface as [`Error::Retrieval`] and
//! [`Error::Embedding`] respectively. Nothing in this crate retries.

use thiserror::Error;

/// Main error type for Ragloom core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or empty input to a pure function.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No chunking strategy is registered for the requested key.
    #[error("unknown chunking strategy: '{0}'")]
    UnknownStrategy(String),

    /// Misconfiguration detected while building a context, registry or filter.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Out-of-range parameter such as `alpha` or `top_k`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A filter references a metadata field the store does not index.
    #[error("invalid filter: field '{field}' is not indexed")]
    InvalidFilter { field: String },

    /// The vector store failed during a search or write.
    #[error("retrieval error: {0}")]
    Retrieval(#[from] StoreError),

    /// The embedder failed to produce vectors.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),
}

/// Vector store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("schema error: {0}")]
    Schema(String),
}

/// Embedding provider errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embeddings are disabled")]
    Disabled,

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Result type alias for Ragloom core operations.
pub type Result<T> = std::result::Result<T, Error>;
