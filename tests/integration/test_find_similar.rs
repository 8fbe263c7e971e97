//! End-to-end search through the service: ordering, metadata join, URLs.

use crate::common::{CountingStore, random_store, random_vector, record};
use dermasim::vector::squared_l2;
use dermasim::{ItemId, MemoryRecordStore, Settings, SimilarityService, StoredRecord};
use std::sync::Arc;

fn service_over(store: Arc<CountingStore>) -> SimilarityService {
    SimilarityService::from_settings(store, &Settings::default())
}

#[test]
fn test_two_point_example() {
    let store = MemoryRecordStore::default();
    store.insert(StoredRecord::with_embedding("A", vec![0.0, 0.0]));
    store.insert(StoredRecord::with_embedding("B", vec![3.0, 4.0]));
    let service = SimilarityService::from_settings(Arc::new(store), &Settings::default());

    let matches = service.find_similar(&[0.0, 0.0], 2).unwrap();

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].id.as_str(), "A");
    assert_eq!(matches[0].distance, 0.0);
    assert_eq!(matches[1].id.as_str(), "B");
    assert_eq!(matches[1].distance, 25.0);
}

#[test]
fn test_results_match_brute_force() {
    let inner = random_store(3_000, 32, &["nv", "mel", "bkl"], 11);
    let query = random_vector(32, 12);

    let mut expected: Vec<(f64, String)> = (0..3_000)
        .map(|i| {
            let id = ItemId::new(format!("ISIC_{i:07}"));
            let embedding = inner.get(&id).unwrap().embedding.unwrap();
            (squared_l2(&query, &embedding), id.as_str().to_string())
        })
        .collect();
    expected.sort_by(|a, b| a.0.total_cmp(&b.0));

    let service = service_over(Arc::new(CountingStore::new(inner)));
    let matches = service.find_similar(&query, 9).unwrap();

    assert_eq!(matches.len(), 9);
    for (found, (distance, id)) in matches.iter().zip(&expected) {
        assert_eq!(found.id.as_str(), id);
        assert!((found.distance - distance).abs() < 1e-9);
    }
    assert!(matches.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn test_k_bounds() {
    let store = Arc::new(CountingStore::new(random_store(5, 4, &["nv"], 13)));
    let service = service_over(store);
    let query = random_vector(4, 14);

    assert_eq!(service.find_similar(&query, 50).unwrap().len(), 5);
    assert!(service.find_similar(&query, 0).unwrap().is_empty());
}

#[test]
fn test_metadata_fetched_in_one_batch() {
    let store = Arc::new(CountingStore::new(random_store(100, 8, &["nv", "mel"], 15)));
    let service = service_over(store.clone());

    let matches = service.find_similar(&random_vector(8, 16), 9).unwrap();

    assert_eq!(matches.len(), 9);
    assert_eq!(store.metadata_fetches(), 1);
    for m in &matches {
        assert_eq!(m.sex, "male");
        assert_eq!(m.localization, "trunk");
        assert_eq!(m.age, Some(50.0));
        assert_eq!(
            m.image_url,
            format!(
                "https://cdn.test/storage/v1/object/public/HAM10000_for_comparison/{}.jpg",
                m.id
            )
        );
    }
}

#[test]
fn test_results_stable_across_reload() {
    let store = Arc::new(CountingStore::new(random_store(1_000, 16, &["nv"], 17)));
    let service = service_over(store.clone());
    let query = random_vector(16, 18);

    let before = service.find_similar(&query, 9).unwrap();
    assert!(service.lifecycle().reload());
    let after = service.find_similar(&query, 9).unwrap();

    assert_eq!(before, after);
    assert_eq!(store.embedding_fetches(), 2);
}

#[test]
fn test_equal_distances_keep_store_order() {
    let store = MemoryRecordStore::default();
    store.insert(record("first", vec![1.0, 0.0], "nv"));
    store.insert(record("second", vec![0.0, 1.0], "nv"));
    store.insert(record("third", vec![-1.0, 0.0], "nv"));
    let service = SimilarityService::from_settings(Arc::new(store), &Settings::default());

    let ids: Vec<String> = service
        .find_similar(&[0.0, 0.0], 3)
        .unwrap()
        .into_iter()
        .map(|m| m.id.as_str().to_string())
        .collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
}

#[test]
fn test_records_without_embeddings_are_not_indexed() {
    let store = MemoryRecordStore::default();
    store.insert(record("a", vec![0.0, 0.0], "nv"));
    store.insert(StoredRecord {
        embedding: None,
        ..record("no_vector", vec![], "mel")
    });
    let service = SimilarityService::from_settings(Arc::new(store), &Settings::default());

    let matches = service.find_similar(&[0.0, 0.0], 10).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id.as_str(), "a");

    // Metadata is still resolvable without an embedding
    let meta = service.resolve_metadata(&[ItemId::new("no_vector")]).unwrap();
    assert_eq!(meta[&ItemId::new("no_vector")].diagnosis.as_deref(), Some("mel"));
}
