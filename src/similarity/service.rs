//! Query orchestration: load check, k-NN query, metadata join.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::SearchResult;
use crate::similarity::{AnalysisMatch, IndexLifecycle, MetadataJoiner, MetadataRecord};
use crate::store::RecordStore;
use crate::vector::{ItemId, QueryResult};

/// Entry point for similarity search over the reference set.
///
/// One instance is meant to be shared (behind an `Arc`) by every request in
/// the process. Similarity search is best-effort: an unavailable or empty
/// reference set yields zero matches, never an error.
#[derive(Debug)]
pub struct SimilarityService {
    lifecycle: IndexLifecycle,
    joiner: MetadataJoiner,
    default_k: usize,
}

impl SimilarityService {
    pub fn new(lifecycle: IndexLifecycle, joiner: MetadataJoiner, default_k: usize) -> Self {
        Self {
            lifecycle,
            joiner,
            default_k,
        }
    }

    /// Service wired to `store` using the search and storage settings.
    pub fn from_settings(store: Arc<dyn RecordStore>, settings: &Settings) -> Self {
        Self::new(
            IndexLifecycle::from_config(Arc::clone(&store), &settings.search),
            MetadataJoiner::from_config(store, &settings.storage),
            settings.search.default_k,
        )
    }

    pub fn lifecycle(&self) -> &IndexLifecycle {
        &self.lifecycle
    }

    /// Number of matches used when the caller has no preference.
    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// See [`IndexLifecycle::ensure_loaded`].
    pub fn ensure_loaded(&self) -> bool {
        self.lifecycle.ensure_loaded()
    }

    /// The `k` reference items closest to `embedding`, with metadata.
    ///
    /// Returns an empty list when the index cannot be loaded. Metadata misses
    /// are filled with defaults.
    ///
    /// # Errors
    /// Only [`SearchError::MalformedQuery`](crate::error::SearchError::MalformedQuery), for a query vector with the wrong
    /// dimension or non-finite values.
    pub fn find_similar(&self, embedding: &[f32], k: usize) -> SearchResult<Vec<AnalysisMatch>> {
        self.search(embedding, k, None)
    }

    /// Like [`find_similar`](Self::find_similar) but never returns `exclude`.
    ///
    /// Used for leave-one-out evaluation where the query item is itself part
    /// of the reference set: one extra neighbor is requested so that dropping
    /// the self match still leaves `k` results.
    pub fn find_similar_excluding(
        &self,
        embedding: &[f32],
        k: usize,
        exclude: &ItemId,
    ) -> SearchResult<Vec<AnalysisMatch>> {
        self.search(embedding, k, Some(exclude))
    }

    /// Metadata for `ids`, without touching the index.
    pub fn resolve_metadata(
        &self,
        ids: &[ItemId],
    ) -> SearchResult<HashMap<ItemId, MetadataRecord>> {
        Ok(self.joiner.resolve(ids)?)
    }

    /// Like [`find_similar_excluding`](Self::find_similar_excluding), but a
    /// metadata store failure is returned instead of filled with defaults.
    ///
    /// For callers that score the metadata, such as evaluation, where
    /// placeholder diagnoses would silently skew the result.
    ///
    /// # Errors
    /// `MalformedQuery` as for `find_similar`, or
    /// [`SearchError::Store`](crate::error::SearchError::Store) when the metadata lookup fails.
    pub fn find_similar_strict(
        &self,
        embedding: &[f32],
        k: usize,
        exclude: &ItemId,
    ) -> SearchResult<Vec<AnalysisMatch>> {
        let results = self.nearest(embedding, k, Some(exclude))?;
        let metadata = self.metadata_for(&results)?;
        Ok(join_all(results, &metadata))
    }

    fn search(
        &self,
        embedding: &[f32],
        k: usize,
        exclude: Option<&ItemId>,
    ) -> SearchResult<Vec<AnalysisMatch>> {
        let results = self.nearest(embedding, k, exclude)?;
        let metadata = self.metadata_for(&results).unwrap_or_else(|e| {
            warn!("Metadata lookup failed, returning matches without metadata: {e}");
            HashMap::new()
        });
        Ok(join_all(results, &metadata))
    }

    /// Up to `k` usable hits, empty when the index cannot be loaded.
    fn nearest(
        &self,
        embedding: &[f32],
        k: usize,
        exclude: Option<&ItemId>,
    ) -> SearchResult<Vec<QueryResult>> {
        // Query the snapshot that was verified, not whatever is current later
        let Some(snapshot) = self.lifecycle.ensure_snapshot() else {
            debug!("Similarity index unavailable, returning no matches");
            return Ok(Vec::new());
        };

        let fetch = if exclude.is_some() { k.saturating_add(1) } else { k };
        let results = snapshot.index().query(embedding, fetch)?;

        Ok(results
            .into_iter()
            .filter(|r| r.distance.is_finite())
            .filter(|r| exclude != Some(&r.id))
            .take(k)
            .collect())
    }

    fn metadata_for(
        &self,
        results: &[QueryResult],
    ) -> SearchResult<HashMap<ItemId, MetadataRecord>> {
        if results.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<ItemId> = results.iter().map(|r| r.id.clone()).collect();
        Ok(self.joiner.resolve(&ids)?)
    }
}

fn join_all(
    results: Vec<QueryResult>,
    metadata: &HashMap<ItemId, MetadataRecord>,
) -> Vec<AnalysisMatch> {
    results
        .into_iter()
        .map(|result| {
            let record = metadata.get(&result.id);
            AnalysisMatch::join(result, record)
        })
        .collect()
}
