//! Exact k-nearest-neighbor index over a flat in-memory vector array.
//!
//! The index stores every reference vector contiguously in row-major order
//! with a parallel id array (row `i` belongs to `ids[i]`). Queries compute the
//! squared Euclidean distance to every row and keep the `k` smallest, so the
//! cost is O(n * d) per query. That is fast enough for reference sets of a few
//! tens of thousands of items; an approximate structure can replace this type
//! behind the same `build`/`query` surface if the set grows far beyond that.
//!
//! A built `FlatIndex` is immutable. Rebuilding means constructing a new value
//! and swapping it in, which is what the lifecycle manager does.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::vector::distance::{first_non_finite, squared_l2};
use crate::vector::{ItemId, QueryResult, ReferenceItem, VectorDimension, VectorError};

/// Row count at which the distance scan switches to rayon.
pub const DEFAULT_PARALLEL_SCAN_THRESHOLD: usize = 16_384;

/// Flat, brute-force similarity index.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    /// Item ids, parallel to the rows of `vectors`
    ids: Vec<ItemId>,

    /// Row-major vector storage, `ids.len() * dimension` values
    vectors: Vec<f32>,

    dimension: VectorDimension,

    /// Scans over at least this many rows run in parallel
    parallel_threshold: usize,
}

impl FlatIndex {
    /// Builds an index from reference items, preserving their order.
    ///
    /// The dimension is taken from the first item and every other item must
    /// match it. Stored vectors must be finite.
    ///
    /// # Errors
    /// - [`VectorError::EmptyIndex`] when `items` is empty
    /// - [`VectorError::InvalidDimension`] when the first embedding is empty
    /// - [`VectorError::InconsistentItem`] when an item has another dimension
    /// - [`VectorError::NonFinite`] when an embedding holds NaN or infinity
    pub fn build(items: Vec<ReferenceItem>) -> Result<Self, VectorError> {
        let first = items.first().ok_or(VectorError::EmptyIndex)?;
        let dimension = VectorDimension::new(first.embedding.len())?;

        let mut ids = Vec::with_capacity(items.len());
        let mut vectors = Vec::with_capacity(items.len() * dimension.get());

        for item in items {
            if item.embedding.len() != dimension.get() {
                return Err(VectorError::InconsistentItem {
                    id: item.id,
                    expected: dimension.get(),
                    actual: item.embedding.len(),
                });
            }
            if let Some(position) = first_non_finite(&item.embedding) {
                return Err(VectorError::NonFinite {
                    context: "a reference embedding",
                    position,
                });
            }
            vectors.extend_from_slice(&item.embedding);
            ids.push(item.id);
        }

        Ok(Self {
            ids,
            vectors,
            dimension,
            parallel_threshold: DEFAULT_PARALLEL_SCAN_THRESHOLD,
        })
    }

    /// Overrides the row count at which scans run in parallel.
    #[must_use]
    pub fn with_parallel_threshold(mut self, rows: usize) -> Self {
        self.parallel_threshold = rows.max(1);
        self
    }

    /// Returns the `min(k, len)` nearest items to `query`, closest first.
    ///
    /// Equal distances keep insertion order, so results are fully
    /// deterministic for a given build.
    ///
    /// # Errors
    /// Returns [`VectorError::DimensionMismatch`] or [`VectorError::NonFinite`]
    /// for a malformed query vector.
    #[must_use = "Query results should be joined with metadata or inspected"]
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<QueryResult>, VectorError> {
        self.dimension.validate_vector(query)?;
        if let Some(position) = first_non_finite(query) {
            return Err(VectorError::NonFinite {
                context: "the query vector",
                position,
            });
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored = self.scan(query);
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, compare_scored);
            scored.truncate(k);
        }
        scored.sort_unstable_by(compare_scored);

        Ok(scored
            .into_iter()
            .map(|(distance, row)| QueryResult {
                id: self.ids[row].clone(),
                distance,
            })
            .collect())
    }

    /// Distance from `query` to every row, tagged with the row number.
    fn scan(&self, query: &[f32]) -> Vec<(f64, usize)> {
        let dim = self.dimension.get();
        if self.len() >= self.parallel_threshold {
            self.vectors
                .par_chunks_exact(dim)
                .enumerate()
                .map(|(row, vector)| (squared_l2(query, vector), row))
                .collect()
        } else {
            self.vectors
                .chunks_exact(dim)
                .enumerate()
                .map(|(row, vector)| (squared_l2(query, vector), row))
                .collect()
        }
    }

    /// Number of indexed items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Dimension shared by every indexed vector.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Indexed ids in insertion order.
    #[must_use]
    pub fn ids(&self) -> &[ItemId] {
        &self.ids
    }

    /// Returns the stored vector for `id`, if indexed.
    #[must_use]
    pub fn vector(&self, id: &ItemId) -> Option<&[f32]> {
        let dim = self.dimension.get();
        self.ids
            .iter()
            .position(|candidate| candidate == id)
            .map(|row| &self.vectors[row * dim..(row + 1) * dim])
    }
}

/// Orders by distance, then by insertion row.
fn compare_scored(a: &(f64, usize), b: &(f64, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}
