//! Type-safe wrappers and core types for the similarity index.
//!
//! Identifiers and dimensions are newtypes so that an item id can never be
//! confused with a free-form string and a zero-length vector can never be
//! indexed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of a reference item, exactly as stored in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Creates an id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Every vector in one index shares the same dimension; queries are checked
/// against it before any distance is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference item eligible for indexing: an id with a non-empty embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub id: ItemId,
    pub embedding: Vec<f32>,
}

impl ReferenceItem {
    pub fn new(id: impl Into<ItemId>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
        }
    }
}

/// One hit of a k-nearest-neighbor query.
///
/// `distance` is the squared Euclidean distance; lower is more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: ItemId,
    pub distance: f64,
}

/// Errors that can occur while building or querying the index.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure query and reference embeddings come from the same model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "Reference item '{id}' has dimension {actual}, expected {expected}\nSuggestion: Re-run embedding population so every item uses the same model"
    )]
    InconsistentItem {
        id: ItemId,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error(
        "Cannot build an index from zero items\nSuggestion: Populate embeddings in the record store first"
    )]
    EmptyIndex,

    #[error("Non-finite value at position {position} of {context}")]
    NonFinite {
        context: &'static str,
        position: usize,
    },
}
