use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::store::{EmbeddingRow, MetadataRow, RecordStore};
use crate::vector::ItemId;

/// One reference record, using the column names of the reference table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(rename = "image_id")]
    pub id: ItemId,

    #[serde(rename = "dx", default)]
    pub diagnosis: Option<String>,

    #[serde(default)]
    pub age: Option<f32>,

    #[serde(default)]
    pub sex: Option<String>,

    #[serde(default)]
    pub localization: Option<String>,

    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl StoredRecord {
    /// Record with an embedding and no descriptive fields.
    pub fn with_embedding(id: impl Into<ItemId>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            diagnosis: None,
            age: None,
            sex: None,
            localization: None,
            embedding: Some(embedding),
        }
    }

    fn metadata(&self) -> MetadataRow {
        MetadataRow {
            id: self.id.clone(),
            diagnosis: self.diagnosis.clone(),
            age: self.age,
            sex: self.sex.clone(),
            localization: self.localization.clone(),
        }
    }
}

/// On-disk JSON layout: `{"records": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreDump {
    pub records: Vec<StoredRecord>,
}

/// Thread-safe in-memory record store.
///
/// Records are keyed by id; a separate insertion-order list keeps
/// `select_embeddings` deterministic, which in turn keeps tie-breaking in the
/// index stable across rebuilds.
#[derive(Clone, Debug)]
pub struct MemoryRecordStore {
    records: Arc<DashMap<ItemId, StoredRecord>>,
    order: Arc<RwLock<Vec<ItemId>>>,
    public_base_url: String,
    online: Arc<AtomicBool>,
}

impl MemoryRecordStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            order: Arc::new(RwLock::new(Vec::new())),
            public_base_url: public_base_url.into(),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Loads a store from a JSON dump file.
    pub fn from_json_file(
        path: impl AsRef<Path>,
        public_base_url: impl Into<String>,
    ) -> StoreResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| StoreError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let dump: StoreDump = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            StoreError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let store = Self::new(public_base_url);
        store.insert_batch(dump.records);
        Ok(store)
    }

    /// Inserts or replaces a record. Replacing keeps the original position.
    pub fn insert(&self, record: StoredRecord) {
        let id = record.id.clone();
        if self.records.insert(id.clone(), record).is_none() {
            self.order.write().push(id);
        }
    }

    pub fn insert_batch(&self, records: impl IntoIterator<Item = StoredRecord>) {
        for record in records {
            self.insert(record);
        }
    }

    pub fn get(&self, id: &ItemId) -> Option<StoredRecord> {
        self.records.get(id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Simulates losing (or regaining) the connection to the backing store.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unreachable {
                reason: "store is offline".to_string(),
            })
        }
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl RecordStore for MemoryRecordStore {
    fn select_embeddings(&self) -> StoreResult<Vec<EmbeddingRow>> {
        self.check_online()?;
        let order = self.order.read();
        Ok(order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|record| record.embedding.is_some())
            .map(|record| EmbeddingRow {
                id: record.id.clone(),
                embedding: record.embedding.clone(),
            })
            .collect())
    }

    fn select_metadata(&self, ids: &[ItemId]) -> StoreResult<Vec<MetadataRow>> {
        self.check_online()?;
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|record| record.metadata()))
            .collect())
    }

    fn resolve_public_url(&self, namespace: &str, filename: &str) -> StoreResult<String> {
        self.check_online()?;
        Ok(format!(
            "{}/storage/v1/object/public/{namespace}/{filename}",
            self.public_base_url.trim_end_matches('/')
        ))
    }
}
