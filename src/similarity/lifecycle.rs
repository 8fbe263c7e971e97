//! Lazy, single-flight lifecycle of the shared similarity index.
//!
//! The index moves between two states. It starts `Empty`, becomes `Ready`
//! after a successful fetch+build, and only returns to `Empty` through an
//! explicit [`IndexLifecycle::reset`] or [`IndexLifecycle::reload`].
//!
//! Every fetch+build runs under one mutex. Callers that queue on that mutex
//! while another caller is building do not fetch again; they observe the
//! outcome of the build they waited for. Queries against a `Ready` index only
//! take a read lock to clone the current snapshot, so they never block each
//! other.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SearchConfig;
use crate::error::{LoadError, SearchError, SearchResult};
use crate::store::{EmbeddingReader, RecordStore};
use crate::vector::{DEFAULT_PARALLEL_SCAN_THRESHOLD, FlatIndex, QueryResult};

/// When a `Ready` index should be rebuilt without an explicit reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Keep the index until an explicit reset or reload.
    #[default]
    Never,

    /// Rebuild on the first load check after the index reaches this age.
    /// A failed rebuild keeps serving the previous index.
    MaxAge(Duration),
}

/// Observable state of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexState {
    Empty,
    Ready,
}

/// An immutable, fully built index plus build bookkeeping.
#[derive(Debug)]
pub struct IndexSnapshot {
    index: FlatIndex,
    built_at: Instant,
    generation: u64,
}

impl IndexSnapshot {
    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    /// 1 for the first successful build, incremented on every rebuild.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Summary of the current index for status output.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub state: IndexState,
    pub items: usize,
    pub dimension: Option<usize>,
    pub generation: u64,
    pub age_secs: Option<u64>,
    pub build_attempts: u64,
    pub last_error: Option<String>,
}

/// Owns the reader and the shared index; mediates every access to it.
pub struct IndexLifecycle {
    reader: EmbeddingReader,

    /// `Some` in the `Ready` state
    current: RwLock<Option<Arc<IndexSnapshot>>>,

    /// Serializes every fetch+build
    build_lock: Mutex<()>,

    /// Completed fetch+build attempts, successful or not
    attempts: AtomicU64,

    /// Successful builds; the generation of the newest snapshot
    builds: AtomicU64,

    last_error: Mutex<Option<String>>,

    refresh: RefreshPolicy,
    parallel_threshold: usize,
}

impl IndexLifecycle {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            reader: EmbeddingReader::new(store),
            current: RwLock::new(None),
            build_lock: Mutex::new(()),
            attempts: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            last_error: Mutex::new(None),
            refresh: RefreshPolicy::Never,
            parallel_threshold: DEFAULT_PARALLEL_SCAN_THRESHOLD,
        }
    }

    /// Lifecycle configured from the `[search]` settings.
    pub fn from_config(store: Arc<dyn RecordStore>, config: &SearchConfig) -> Self {
        Self::new(store)
            .with_refresh_policy(config.refresh_policy())
            .with_parallel_threshold(config.parallel_scan_threshold)
    }

    #[must_use]
    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh = policy;
        self
    }

    #[must_use]
    pub fn with_parallel_threshold(mut self, rows: usize) -> Self {
        self.parallel_threshold = rows;
        self
    }

    pub fn state(&self) -> IndexState {
        if self.current.read().is_some() {
            IndexState::Ready
        } else {
            IndexState::Empty
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == IndexState::Ready
    }

    /// The current index, if `Ready`.
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.current.read().clone()
    }

    /// Makes sure the index is built, building it on first use.
    ///
    /// Returns `true` when the index is ready. Returns `false` when the
    /// reference set is unavailable or empty; that is an expected condition,
    /// logged and left for a later call to retry.
    pub fn ensure_loaded(&self) -> bool {
        self.ensure_snapshot().is_some()
    }

    /// Like [`ensure_loaded`](Self::ensure_loaded), but hands back the
    /// snapshot that was verified ready.
    ///
    /// Querying the returned snapshot cannot race a concurrent reset or
    /// reload: it stays valid for as long as the caller holds it. A caller
    /// that finds the index mid-rebuild waits for the rebuild and gets its
    /// result.
    pub fn ensure_snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        let observed = self.attempts.load(Ordering::Acquire);
        if let Some(snapshot) = self.snapshot()
            && !self.is_stale(&snapshot)
        {
            return Some(snapshot);
        }

        let _guard = self.build_lock.lock();
        if self.attempts.load(Ordering::Acquire) != observed {
            // A build finished while we waited for the lock; share its outcome
            return self.snapshot();
        }

        match self.snapshot() {
            Some(snapshot) if !self.is_stale(&snapshot) => Some(snapshot),
            Some(stale) => {
                self.refresh_locked(&stale);
                self.snapshot()
            }
            None if self.build_locked() => self.snapshot(),
            None => None,
        }
    }

    /// Drops the index: `Ready` -> `Empty`.
    ///
    /// The next [`ensure_loaded`](Self::ensure_loaded) fetches and builds again.
    pub fn reset(&self) {
        let _guard = self.build_lock.lock();
        if self.current.write().take().is_some() {
            info!("Similarity index reset");
        }
    }

    /// Explicit rebuild from the store: `Ready` -> `Empty` -> fetch+build.
    ///
    /// Queries arriving during the rebuild wait for it and then observe its
    /// outcome. Returns whether the index is ready afterwards.
    pub fn reload(&self) -> bool {
        let _guard = self.build_lock.lock();
        *self.current.write() = None;
        self.build_locked()
    }

    /// Runs a k-nearest-neighbor query against the current index.
    ///
    /// # Errors
    /// [`SearchError::IndexNotReady`] in the `Empty` state, or
    /// [`SearchError::MalformedQuery`] for a vector the index rejects.
    pub fn query(&self, vector: &[f32], k: usize) -> SearchResult<Vec<QueryResult>> {
        let snapshot = self.snapshot().ok_or(SearchError::IndexNotReady)?;
        Ok(snapshot.index().query(vector, k)?)
    }

    /// Fetch+build cycles run so far, successful or not.
    pub fn build_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Reason the most recent fetch+build failed, cleared by a success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn stats(&self) -> IndexStats {
        let snapshot = self.snapshot();
        IndexStats {
            state: self.state(),
            items: snapshot.as_ref().map_or(0, |s| s.index().len()),
            dimension: snapshot.as_ref().map(|s| s.index().dimension().get()),
            generation: snapshot.as_ref().map_or(0, |s| s.generation()),
            age_secs: snapshot.as_ref().map(|s| s.age().as_secs()),
            build_attempts: self.build_attempts(),
            last_error: self.last_error(),
        }
    }

    fn is_stale(&self, snapshot: &IndexSnapshot) -> bool {
        match self.refresh {
            RefreshPolicy::Never => false,
            RefreshPolicy::MaxAge(max_age) => snapshot.age() >= max_age,
        }
    }

    /// Builds into the empty slot. Caller holds `build_lock`.
    fn build_locked(&self) -> bool {
        let outcome = self.fetch_and_build();
        let ready = match outcome {
            Ok(snapshot) => {
                *self.current.write() = Some(Arc::new(snapshot));
                true
            }
            Err(e) => {
                self.record_failure(&e);
                false
            }
        };
        self.attempts.fetch_add(1, Ordering::AcqRel);
        ready
    }

    /// Replaces a stale snapshot, keeping it when the rebuild fails.
    /// Caller holds `build_lock`.
    fn refresh_locked(&self, stale: &IndexSnapshot) {
        debug!(
            "Similarity index generation {} is {}s old, refreshing",
            stale.generation(),
            stale.age().as_secs()
        );
        match self.fetch_and_build() {
            Ok(snapshot) => *self.current.write() = Some(Arc::new(snapshot)),
            Err(e) => {
                warn!("Index refresh failed, keeping generation {}", stale.generation());
                self.record_failure(&e);
            }
        }
        self.attempts.fetch_add(1, Ordering::AcqRel);
    }

    fn fetch_and_build(&self) -> Result<IndexSnapshot, LoadError> {
        let started = Instant::now();
        let items = self.reader.load_all()?;
        let index = FlatIndex::build(items)?.with_parallel_threshold(self.parallel_threshold);
        let generation = self.builds.fetch_add(1, Ordering::AcqRel) + 1;

        info!(
            "Similarity index built with {} embeddings of dimension {} in {:?}",
            index.len(),
            index.dimension(),
            started.elapsed()
        );
        self.last_error.lock().take();

        Ok(IndexSnapshot {
            index,
            built_at: Instant::now(),
            generation,
        })
    }

    fn record_failure(&self, e: &LoadError) {
        match e {
            LoadError::Build(_) => error!("Similarity index build failed: {e}"),
            LoadError::NoEmbeddings | LoadError::Unavailable(_) => {
                warn!("Similarity index not loaded: {e}")
            }
        }
        *self.last_error.lock() = Some(e.to_string());
    }
}

impl std::fmt::Debug for IndexLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexLifecycle")
            .field("state", &self.state())
            .field("build_attempts", &self.build_attempts())
            .field("refresh", &self.refresh)
            .finish()
    }
}
