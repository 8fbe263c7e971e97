//! In-memory vector index for reference embeddings.
//!
//! This module provides the exact nearest-neighbor index used by the
//! similarity service.
//!
//! # Architecture
//! Reference vectors live in one contiguous `Vec<f32>` with a parallel id
//! array. Queries are answered by a brute-force squared-L2 scan with partial
//! selection of the `k` smallest distances. There is no persistence and no
//! incremental insert or delete: an index is built once from a complete item
//! set and replaced wholesale when the reference set changes.

mod distance;
mod index;
mod types;

pub use distance::{first_non_finite, squared_l2};
pub use index::{DEFAULT_PARALLEL_SCAN_THRESHOLD, FlatIndex};
pub use types::{ItemId, QueryResult, ReferenceItem, VectorDimension, VectorError};
