//! Similarity search over the reference set.
//!
//! [`SimilarityService`] is the surface used by request handlers. It owns an
//! [`IndexLifecycle`] (lazy single-flight build of the shared index) and a
//! [`MetadataJoiner`] (batch metadata lookup with display URL resolution).

mod lifecycle;
mod metadata;
mod service;

pub use lifecycle::{IndexLifecycle, IndexSnapshot, IndexState, IndexStats, RefreshPolicy};
pub use metadata::{MetadataJoiner, MetadataRecord, display_file_name};
pub use service::SimilarityService;

use serde::{Deserialize, Serialize};

use crate::vector::{ItemId, QueryResult};

/// Placeholder for descriptive fields the store has no value for.
pub const UNKNOWN: &str = "unknown";

/// A similar reference item as returned to clients.
///
/// Every field is always present; metadata the store does not have is
/// reported as [`UNKNOWN`] (or an empty URL / no age) rather than omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMatch {
    #[serde(rename = "image_id")]
    pub id: ItemId,
    pub distance: f64,
    pub diagnosis: String,
    pub age: Option<f32>,
    pub sex: String,
    pub localization: String,
    pub image_url: String,
}

impl AnalysisMatch {
    /// Joins a query hit with its metadata, if any was found.
    pub fn join(result: QueryResult, metadata: Option<&MetadataRecord>) -> Self {
        let field = |value: Option<&Option<String>>| {
            value
                .and_then(|v| v.clone())
                .unwrap_or_else(|| UNKNOWN.to_string())
        };

        Self {
            diagnosis: field(metadata.map(|m| &m.diagnosis)),
            sex: field(metadata.map(|m| &m.sex)),
            localization: field(metadata.map(|m| &m.localization)),
            age: metadata.and_then(|m| m.age),
            image_url: metadata.map(|m| m.display_url.clone()).unwrap_or_default(),
            id: result.id,
            distance: result.distance,
        }
    }
}
