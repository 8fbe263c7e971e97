use dermasim::store::{EmbeddingRow, MetadataRow};
use dermasim::{ItemId, MemoryRecordStore, RecordStore, StoreError, StoreResult, StoredRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Wraps a store and counts embedding fetches.
///
/// The optional delay holds each fetch open so that concurrent callers pile
/// up behind the first one.
pub struct CountingStore {
    pub inner: MemoryRecordStore,
    pub embedding_fetches: AtomicUsize,
    pub metadata_fetches: AtomicUsize,
    pub delay: Duration,
}

impl CountingStore {
    pub fn new(inner: MemoryRecordStore) -> Self {
        Self {
            inner,
            embedding_fetches: AtomicUsize::new(0),
            metadata_fetches: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn embedding_fetches(&self) -> usize {
        self.embedding_fetches.load(Ordering::SeqCst)
    }

    pub fn metadata_fetches(&self) -> usize {
        self.metadata_fetches.load(Ordering::SeqCst)
    }
}

impl RecordStore for CountingStore {
    fn select_embeddings(&self) -> StoreResult<Vec<EmbeddingRow>> {
        self.embedding_fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.select_embeddings()
    }

    fn select_metadata(&self, ids: &[ItemId]) -> StoreResult<Vec<MetadataRow>> {
        self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.select_metadata(ids)
    }

    fn resolve_public_url(&self, namespace: &str, filename: &str) -> StoreResult<String> {
        self.inner.resolve_public_url(namespace, filename)
    }
}

/// Serves the first `healthy_calls` metadata lookups, then reports the
/// store as unreachable. Embedding fetches always succeed.
pub struct FlakyMetadataStore {
    pub inner: MemoryRecordStore,
    pub healthy_calls: usize,
    calls: AtomicUsize,
}

impl FlakyMetadataStore {
    pub fn new(inner: MemoryRecordStore, healthy_calls: usize) -> Self {
        Self {
            inner,
            healthy_calls,
            calls: AtomicUsize::new(0),
        }
    }
}

impl RecordStore for FlakyMetadataStore {
    fn select_embeddings(&self) -> StoreResult<Vec<EmbeddingRow>> {
        self.inner.select_embeddings()
    }

    fn select_metadata(&self, ids: &[ItemId]) -> StoreResult<Vec<MetadataRow>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy_calls {
            return Err(StoreError::Unreachable {
                reason: "connection reset".to_string(),
            });
        }
        self.inner.select_metadata(ids)
    }

    fn resolve_public_url(&self, namespace: &str, filename: &str) -> StoreResult<String> {
        self.inner.resolve_public_url(namespace, filename)
    }
}

pub fn record(id: &str, embedding: Vec<f32>, diagnosis: &str) -> StoredRecord {
    StoredRecord {
        diagnosis: Some(diagnosis.to_string()),
        age: Some(50.0),
        sex: Some("male".to_string()),
        localization: Some("trunk".to_string()),
        ..StoredRecord::with_embedding(id, embedding)
    }
}

/// Store with `count` random records of `dimension`, cycling through
/// `diagnoses`. Same seed, same store.
pub fn random_store(
    count: usize,
    dimension: usize,
    diagnoses: &[&str],
    seed: u64,
) -> MemoryRecordStore {
    let mut rng = StdRng::seed_from_u64(seed);
    let store = MemoryRecordStore::new("https://cdn.test");
    for i in 0..count {
        let embedding: Vec<f32> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
        let dx = diagnoses[i % diagnoses.len()];
        store.insert(record(&format!("ISIC_{i:07}"), embedding, dx));
    }
    store
}

pub fn random_vector(dimension: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect()
}
