//! Joins matched item ids with their descriptive metadata.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::StoreResult;
use crate::store::{MetadataRow, RecordStore};
use crate::vector::ItemId;

/// Metadata for one reference item with its display URL resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(rename = "image_id")]
    pub id: ItemId,
    pub diagnosis: Option<String>,
    pub age: Option<f32>,
    pub sex: Option<String>,
    pub localization: Option<String>,
    pub display_url: String,
}

impl MetadataRecord {
    fn from_row(row: MetadataRow, display_url: String) -> Self {
        Self {
            id: row.id,
            diagnosis: row.diagnosis,
            age: row.age,
            sex: row.sex,
            localization: row.localization,
            display_url,
        }
    }
}

/// File name of an item's display image: the trimmed id plus the extension.
pub fn display_file_name(id: &ItemId, extension: &str) -> String {
    format!("{}.{}", id.as_str().trim(), extension.trim_start_matches('.'))
}

/// Batch metadata lookup against the record store.
#[derive(Clone)]
pub struct MetadataJoiner {
    store: Arc<dyn RecordStore>,
    namespace: String,
    extension: String,
}

impl MetadataJoiner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        namespace: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            extension: extension.into(),
        }
    }

    pub fn from_config(store: Arc<dyn RecordStore>, config: &StorageConfig) -> Self {
        Self::new(store, &config.bucket, &config.image_extension)
    }

    /// Fetches metadata for `ids` with a single store query.
    ///
    /// Duplicate ids are collapsed. Ids without a stored record are absent
    /// from the returned map; an empty input never touches the store. A row
    /// whose display URL cannot be resolved keeps its metadata with an empty
    /// URL.
    pub fn resolve(&self, ids: &[ItemId]) -> StoreResult<HashMap<ItemId, MetadataRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<ItemId> = ids.iter().filter(|id| seen.insert(*id)).cloned().collect();

        let rows = self.store.select_metadata(&unique)?;
        let mut resolved = HashMap::with_capacity(rows.len());
        for row in rows {
            if !seen.contains(&row.id) {
                continue;
            }
            let file_name = display_file_name(&row.id, &self.extension);
            let url = match self.store.resolve_public_url(&self.namespace, &file_name) {
                Ok(url) => url,
                Err(e) => {
                    warn!("No display URL for {file_name}: {e}");
                    String::new()
                }
            };
            resolved.insert(row.id.clone(), MetadataRecord::from_row(row, url));
        }

        if resolved.len() < unique.len() {
            debug!(
                "Metadata missing for {} of {} requested items",
                unique.len() - resolved.len(),
                unique.len()
            );
        }
        Ok(resolved)
    }
}

impl std::fmt::Debug for MetadataJoiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataJoiner")
            .field("namespace", &self.namespace)
            .field("extension", &self.extension)
            .finish()
    }
}
