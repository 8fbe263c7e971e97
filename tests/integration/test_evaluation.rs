//! Leave-one-out evaluation over clustered reference data.

use crate::common::{FlakyMetadataStore, record};
use dermasim::{
    EvalQuery, Evaluator, ItemId, MemoryRecordStore, SearchError, Settings, SimilarityService,
};
use std::sync::Arc;

/// Two tight clusters far apart: "nv" near the origin, "mel" near (100, 100).
fn clustered() -> (MemoryRecordStore, Vec<EvalQuery>) {
    let store = MemoryRecordStore::new("https://cdn.test");
    let mut queries = Vec::new();
    for i in 0..5 {
        let offset = i as f32 * 0.1;
        for (dx, base) in [("nv", 0.0), ("mel", 100.0)] {
            let id = format!("{dx}_{i}");
            let embedding = vec![base + offset, base - offset];
            store.insert(record(&id, embedding.clone(), dx));
            queries.push(EvalQuery {
                id: ItemId::new(id),
                embedding,
            });
        }
    }
    (store, queries)
}

fn service(store: MemoryRecordStore) -> SimilarityService {
    SimilarityService::from_settings(Arc::new(store), &Settings::default())
}

#[test]
fn test_perfect_clusters_score_full_precision() {
    let (store, queries) = clustered();
    let service = service(store);
    let settings = Settings::default();

    let report = Evaluator::new(&service, settings.evaluation.clone())
        .with_k(3)
        .evaluate(&queries)
        .unwrap();

    assert_eq!(report.k, 3);
    assert_eq!(report.processed, 10);
    assert!(report.skipped.is_empty());
    assert!(report.short_results.is_empty());
    assert_eq!(report.overall.mean_precision, 1.0);
    assert_eq!(report.overall.at_least_pct[&3], 100.0);
    assert_eq!(report.overall.at_least_pct[&5], 0.0);
    assert_eq!(report.overall.zero_matches_pct, 0.0);

    assert_eq!(report.by_diagnosis.len(), 2);
    assert_eq!(report.by_diagnosis["nv"].count, 5);
    assert_eq!(report.by_diagnosis["mel"].mean_precision, 1.0);

    let negative = report.negative_group.as_ref().unwrap();
    assert_eq!(negative.count, 5);
    assert_eq!(negative.mean_precision, 1.0);
}

#[test]
fn test_self_match_is_never_counted() {
    // A single item per diagnosis: only the other class remains as neighbor
    let store = MemoryRecordStore::default();
    store.insert(record("a", vec![0.0], "nv"));
    store.insert(record("b", vec![1.0], "mel"));
    let service = service(store);

    let queries = vec![EvalQuery {
        id: ItemId::new("a"),
        embedding: vec![0.0],
    }];
    let report = Evaluator::new(&service, Settings::default().evaluation)
        .with_k(1)
        .evaluate(&queries)
        .unwrap();

    assert_eq!(report.overall.mean_precision, 0.0);
    assert_eq!(report.overall.zero_matches_pct, 100.0);
    // "mel" is the positive label, so the binary view also scores zero
    assert_eq!(report.negative_group.unwrap().mean_precision, 0.0);
}

#[test]
fn test_unlabelled_queries_are_skipped() {
    let (store, mut queries) = clustered();
    queries.push(EvalQuery {
        id: ItemId::new("ghost"),
        embedding: vec![0.0, 0.0],
    });
    let service = service(store);

    let report = Evaluator::new(&service, Settings::default().evaluation)
        .with_k(3)
        .evaluate(&queries)
        .unwrap();

    assert_eq!(report.processed, 10);
    assert_eq!(report.skipped, vec![ItemId::new("ghost")]);
    assert!(report.render().contains("ghost"));
}

#[test]
fn test_short_results_are_reported() {
    let (store, queries) = clustered();
    let service = service(store);

    // Ten items, one excluded: nine neighbors at most
    let report = Evaluator::new(&service, Settings::default().evaluation)
        .with_k(12)
        .evaluate(&queries[..1])
        .unwrap();

    assert_eq!(report.short_results, vec![ItemId::new("nv_0")]);
}

#[test]
fn test_unavailable_index_is_an_error() {
    let (store, queries) = clustered();
    store.set_online(false);
    let service = service(store);

    let err = Evaluator::new(&service, Settings::default().evaluation)
        .evaluate(&queries)
        .unwrap_err();
    assert!(matches!(err, SearchError::IndexNotReady));
}

#[test]
fn test_render_summary() {
    let (store, queries) = clustered();
    let service = service(store);

    let text = Evaluator::new(&service, Settings::default().evaluation)
        .with_k(3)
        .evaluate(&queries)
        .unwrap()
        .render();

    assert!(text.contains("Processed 10 queries."));
    assert!(text.contains("Average Precision@3: 1.0000"));
    assert!(text.contains("Diagnosis: mel (5 queries)"));
    assert!(text.contains("Non-mel Group"));
}

#[test]
fn test_neighbor_metadata_outage_fails_the_evaluation() {
    let (store, queries) = clustered();
    // Ground truth resolves, every neighbor lookup after it fails
    let flaky = FlakyMetadataStore::new(store, 1);
    let service = SimilarityService::from_settings(Arc::new(flaky), &Settings::default());

    let err = Evaluator::new(&service, Settings::default().evaluation)
        .with_k(3)
        .evaluate(&queries)
        .unwrap_err();
    assert!(matches!(err, SearchError::Store(_)));
    assert_eq!(err.status_code(), "STORE_UNREACHABLE");
}
