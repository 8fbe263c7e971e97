//! Single-flight loading and the reset/reload/refresh transitions.

use crate::common::{CountingStore, random_store, random_vector};
use dermasim::{
    IndexLifecycle, IndexState, MemoryRecordStore, RefreshPolicy, Settings, SimilarityService,
};
use std::sync::{Arc, Barrier};
use std::time::Duration;

const CALLERS: usize = 16;

fn hammer(lifecycle: &IndexLifecycle) -> Vec<bool> {
    let barrier = Barrier::new(CALLERS);
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    lifecycle.ensure_loaded()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_cold_concurrent_callers_share_one_build() {
    let store = Arc::new(
        CountingStore::new(random_store(500, 16, &["nv", "mel"], 7))
            .with_delay(Duration::from_millis(150)),
    );
    let lifecycle = IndexLifecycle::new(store.clone());

    let outcomes = hammer(&lifecycle);

    assert!(outcomes.iter().all(|ready| *ready));
    assert_eq!(store.embedding_fetches(), 1);
    assert_eq!(lifecycle.build_attempts(), 1);
    assert_eq!(lifecycle.state(), IndexState::Ready);
    assert_eq!(lifecycle.stats().items, 500);
}

#[test]
fn test_cold_concurrent_callers_share_one_failure() {
    // Reachable but holds no embeddings
    let store = Arc::new(
        CountingStore::new(MemoryRecordStore::default()).with_delay(Duration::from_millis(150)),
    );
    let lifecycle = IndexLifecycle::new(store.clone());

    let outcomes = hammer(&lifecycle);

    assert!(outcomes.iter().all(|ready| !*ready));
    assert_eq!(store.embedding_fetches(), 1);
    assert_eq!(lifecycle.state(), IndexState::Empty);
    assert!(lifecycle.last_error().is_some());
}

#[test]
fn test_failed_load_is_retried_on_next_call() {
    let inner = random_store(20, 4, &["nv"], 1);
    inner.set_online(false);
    let store = Arc::new(CountingStore::new(inner.clone()));
    let lifecycle = IndexLifecycle::new(store.clone());

    assert!(!lifecycle.ensure_loaded());
    assert_eq!(lifecycle.state(), IndexState::Empty);

    inner.set_online(true);
    assert!(lifecycle.ensure_loaded());
    assert_eq!(store.embedding_fetches(), 2);
    assert!(lifecycle.last_error().is_none());

    // Ready: further checks do not touch the store
    assert!(lifecycle.ensure_loaded());
    assert_eq!(store.embedding_fetches(), 2);
}

#[test]
fn test_reset_forces_a_fresh_fetch() {
    let store = Arc::new(CountingStore::new(random_store(20, 4, &["nv"], 2)));
    let lifecycle = IndexLifecycle::new(store.clone());

    assert!(lifecycle.ensure_loaded());
    lifecycle.reset();
    assert_eq!(lifecycle.state(), IndexState::Empty);
    assert!(lifecycle.query(&[0.0; 4], 1).is_err());

    assert!(lifecycle.ensure_loaded());
    assert_eq!(store.embedding_fetches(), 2);
    assert_eq!(lifecycle.snapshot().unwrap().generation(), 2);
}

#[test]
fn test_reload_picks_up_new_records() {
    let inner = random_store(10, 4, &["nv"], 3);
    let lifecycle = IndexLifecycle::new(Arc::new(inner.clone()));
    assert!(lifecycle.ensure_loaded());
    assert_eq!(lifecycle.stats().items, 10);

    inner.insert(crate::common::record("late", vec![0.0; 4], "mel"));
    // Still serving the old snapshot
    assert_eq!(lifecycle.stats().items, 10);

    assert!(lifecycle.reload());
    assert_eq!(lifecycle.stats().items, 11);
}

#[test]
fn test_searches_during_reload_never_come_back_empty() {
    let store = CountingStore::new(random_store(2_000, 8, &["nv"], 4))
        .with_delay(Duration::from_millis(2));
    let service = SimilarityService::from_settings(Arc::new(store), &Settings::default());
    assert!(service.ensure_loaded());
    let query = random_vector(8, 99);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..100 {
                    // Either the old or the new snapshot, never a gap
                    let matches = service.find_similar(&query, 5).unwrap();
                    assert_eq!(matches.len(), 5);
                }
            });
        }
        s.spawn(|| {
            for _ in 0..50 {
                assert!(service.lifecycle().reload());
            }
        });
    });

    assert_eq!(service.lifecycle().snapshot().unwrap().generation(), 51);
}

#[test]
fn test_failed_refresh_keeps_serving_previous_index() {
    let inner = random_store(10, 4, &["nv"], 5);
    let lifecycle = IndexLifecycle::new(Arc::new(inner.clone()))
        .with_refresh_policy(RefreshPolicy::MaxAge(Duration::ZERO));

    assert!(lifecycle.ensure_loaded());
    assert_eq!(lifecycle.snapshot().unwrap().generation(), 1);

    inner.set_online(false);
    assert!(lifecycle.ensure_loaded());
    assert_eq!(lifecycle.snapshot().unwrap().generation(), 1);
    assert!(lifecycle.last_error().is_some());
    assert_eq!(lifecycle.query(&[0.0; 4], 3).unwrap().len(), 3);

    inner.set_online(true);
    assert!(lifecycle.ensure_loaded());
    assert_eq!(lifecycle.snapshot().unwrap().generation(), 2);
}
