//! Reads the reference embedding set out of the record store.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::LoadError;
use crate::store::RecordStore;
use crate::vector::ReferenceItem;

/// Fetches every reference item that currently has a usable embedding.
#[derive(Clone)]
pub struct EmbeddingReader {
    store: Arc<dyn RecordStore>,
}

impl EmbeddingReader {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Loads all `(id, embedding)` pairs with a present, non-empty embedding.
    ///
    /// Rows come back in store order so that rebuilding from an unchanged
    /// store yields an identical index.
    ///
    /// # Errors
    /// - [`LoadError::Unavailable`] when the store call fails
    /// - [`LoadError::NoEmbeddings`] when no row qualifies
    ///
    /// Both are expected, recoverable conditions.
    pub fn load_all(&self) -> Result<Vec<ReferenceItem>, LoadError> {
        let rows = self.store.select_embeddings().map_err(|e| {
            warn!("Embedding source unavailable: {e}");
            LoadError::Unavailable(e)
        })?;

        let fetched = rows.len();
        let items: Vec<ReferenceItem> = rows
            .into_iter()
            .filter_map(|row| match row.embedding {
                Some(embedding) if !embedding.is_empty() => Some(ReferenceItem {
                    id: row.id,
                    embedding,
                }),
                _ => None,
            })
            .collect();

        if items.is_empty() {
            warn!("No reference embeddings found ({fetched} rows fetched)");
            return Err(LoadError::NoEmbeddings);
        }

        debug!(
            "Loaded {} reference embeddings ({} rows skipped)",
            items.len(),
            fetched - items.len()
        );
        Ok(items)
    }
}

impl std::fmt::Debug for EmbeddingReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingReader")
            .field("store", &"<dyn RecordStore>")
            .finish()
    }
}
