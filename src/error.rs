//! Error types for the similarity search system
//!
//! This module provides structured error types using thiserror. The taxonomy
//! separates recoverable conditions (store unavailable, no embeddings yet)
//! from contract violations (malformed query vectors), so callers can degrade
//! gracefully on the former and surface the latter.

use crate::vector::VectorError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a record store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record store unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Record store query '{operation}' failed: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Failed to read store dump '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Store dump '{path}' is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

impl StoreError {
    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> String {
        match self {
            Self::Unreachable { .. } => "STORE_UNREACHABLE",
            Self::QueryFailed { .. } => "STORE_QUERY_FAILED",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::Malformed { .. } => "STORE_MALFORMED",
        }
        .to_string()
    }
}

/// Reasons the reference index could not be (re)built.
///
/// Every variant is recoverable: the index simply stays empty and similarity
/// search returns no matches until a later load succeeds.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("No reference items with embeddings are available yet")]
    NoEmbeddings,

    #[error("Embedding source unavailable: {0}")]
    Unavailable(#[from] StoreError),

    #[error("Failed to build index from reference items: {0}")]
    Build(#[from] VectorError),
}

impl LoadError {
    pub fn status_code(&self) -> String {
        match self {
            Self::NoEmbeddings => "NO_EMBEDDINGS",
            Self::Unavailable(_) => "SOURCE_UNAVAILABLE",
            Self::Build(_) => "INDEX_BUILD_FAILED",
        }
        .to_string()
    }
}

/// Errors surfaced to callers of the similarity service.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Similarity index is not ready. Call ensure_loaded() before querying.")]
    IndexNotReady,

    #[error("Malformed query: {0}")]
    MalformedQuery(#[from] VectorError),

    #[error("Metadata lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl SearchError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::IndexNotReady => "INDEX_NOT_READY".to_string(),
            Self::MalformedQuery(_) => "MALFORMED_QUERY".to_string(),
            Self::Store(e) => e.status_code(),
        }
    }

    /// True when the caller sent something that can never succeed as-is.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, Self::MalformedQuery(_))
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::IndexNotReady => vec![
                "Populate reference embeddings in the record store",
                "Call ensure_loaded() and check its result before querying",
            ],
            Self::MalformedQuery(VectorError::DimensionMismatch { .. }) => vec![
                "Generate the query embedding with the same model as the reference set",
            ],
            Self::MalformedQuery(_) => vec!["Check the query vector for NaN or infinite values"],
            Self::Store(StoreError::Unreachable { .. }) => vec![
                "Check network access and credentials for the record store",
                "Retry the request; the store may be temporarily unavailable",
            ],
            Self::Store(StoreError::FileRead { .. } | StoreError::Malformed { .. }) => vec![
                "Check the storage.dump_path setting",
                "Regenerate the store dump",
            ],
            Self::Store(_) => vec![],
        }
    }
}

/// Result type alias for record store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for similarity search operations
pub type SearchResult<T> = Result<T, SearchError>;
