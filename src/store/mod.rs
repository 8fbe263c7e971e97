//! Record store boundary.
//!
//! The similarity core never owns reference data. It reads embeddings and
//! descriptive metadata through the [`RecordStore`] trait and resolves public
//! display URLs through the same backend. [`MemoryRecordStore`] is the bundled
//! implementation, loadable from a JSON dump of the reference table.

mod memory;
mod reader;

pub use memory::{MemoryRecordStore, StoreDump, StoredRecord};
pub use reader::EmbeddingReader;

use crate::error::StoreResult;
use crate::vector::ItemId;
use serde::{Deserialize, Serialize};

/// A row returned by [`RecordStore::select_embeddings`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRow {
    pub id: ItemId,
    pub embedding: Option<Vec<f32>>,
}

/// Descriptive fields for one reference item, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRow {
    pub id: ItemId,
    pub diagnosis: Option<String>,
    pub age: Option<f32>,
    pub sex: Option<String>,
    pub localization: Option<String>,
}

/// Read-only access to the external reference record store.
///
/// Implementations must be safe to share across threads; the similarity
/// service calls them from whichever request triggers a load or a lookup.
pub trait RecordStore: Send + Sync {
    /// All reference rows whose embedding is present (non-null).
    fn select_embeddings(&self) -> StoreResult<Vec<EmbeddingRow>>;

    /// Metadata rows for the given ids in a single round trip.
    ///
    /// Ids with no stored record are simply absent from the result.
    fn select_metadata(&self, ids: &[ItemId]) -> StoreResult<Vec<MetadataRow>>;

    /// Public URL of `filename` inside the storage `namespace`.
    fn resolve_public_url(&self, namespace: &str, filename: &str) -> StoreResult<String>;
}
