//! Per-kind artifact bundles with load-once semantics.
//!
//! ## Guarantees
//!
//! - Once a kind loads successfully, the bundle is kept for the life of the
//!   cache (i.e. the process) and the loader never runs for it again.
//! - Concurrent callers for the same kind share the one in-flight attempt and
//!   all see its result; nobody observes a half-built bundle.
//! - A failed attempt is not kept: the next `get` for that kind runs the
//!   loader once more. `get` itself never retries.

mod fs;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};

use thiserror::Error;
use tracing::{info, warn};

use crate::model::Model;
use crate::scaler::Scaler;

pub use fs::{ArtifactSpec, FsArtifactLoader};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("no artifacts configured for analysis type '{0}'")]
    UnknownKind(String),

    #[error("artifact not found: {path}")]
    Missing { path: String },

    #[error("cannot read artifact {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid artifact {path}: {reason}")]
    Invalid { path: String, reason: String },
}

/// Everything a strategy needs besides its input file.
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub model: Arc<dyn Model>,
    pub scaler: Option<Scaler>,
    pub threshold: Option<f64>,
}

impl ArtifactBundle {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self {
            model,
            scaler: None,
            threshold: None,
        }
    }

    pub fn with_scaler(mut self, scaler: Scaler) -> Self {
        self.scaler = Some(scaler);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// Builds the bundle for one kind.
pub trait ArtifactLoader: Send + Sync {
    fn load(&self, kind: &str) -> Result<ArtifactBundle, LoadError>;
}

impl<F> ArtifactLoader for F
where
    F: Fn(&str) -> Result<ArtifactBundle, LoadError> + Send + Sync,
{
    fn load(&self, kind: &str) -> Result<ArtifactBundle, LoadError> {
        self(kind)
    }
}

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Empty,
    Loading,
    Ready(Arc<ArtifactBundle>),
}

#[derive(Debug, Default)]
struct SlotState {
    phase: Phase,
    /// Number of load attempts started so far.
    attempts: u64,
    /// Outcome of the most recent failed attempt.
    last_failure: Option<(u64, LoadError)>,
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    settled: Condvar,
}

/// Kind → bundle cache. Created once at startup and shared by reference.
///
/// The set of kinds is fixed at construction, so the slot map itself is never
/// mutated; each slot has its own lock.
pub struct ArtifactCache {
    loader: Box<dyn ArtifactLoader>,
    slots: HashMap<String, Slot>,
}

impl ArtifactCache {
    pub fn new<L, I, K>(loader: L, kinds: I) -> Self
    where
        L: ArtifactLoader + 'static,
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            loader: Box::new(loader),
            slots: kinds
                .into_iter()
                .map(|kind| (kind.into(), Slot::default()))
                .collect(),
        }
    }

    /// Bundle for `kind`, loading it if no successful load has happened yet.
    pub fn get(&self, kind: &str) -> Result<Arc<ArtifactBundle>, LoadError> {
        let slot = self
            .slots
            .get(kind)
            .ok_or_else(|| LoadError::UnknownKind(kind.to_string()))?;

        let mut state = slot.state.lock().unwrap();
        loop {
            match &state.phase {
                Phase::Ready(bundle) => return Ok(bundle.clone()),
                Phase::Loading => {
                    // Join the attempt in flight and take its outcome.
                    let joined = state.attempts;
                    while matches!(state.phase, Phase::Loading) && state.attempts == joined {
                        state = slot.settled.wait(state).unwrap();
                    }
                    if let Some((attempt, err)) = &state.last_failure {
                        if *attempt == joined {
                            return Err(err.clone());
                        }
                    }
                }
                Phase::Empty => break,
            }
        }

        state.phase = Phase::Loading;
        state.attempts += 1;
        let attempt = state.attempts;
        drop(state);

        let loaded = panic::catch_unwind(AssertUnwindSafe(|| self.loader.load(kind)))
            .unwrap_or_else(|_| {
                Err(LoadError::Invalid {
                    path: kind.to_string(),
                    reason: "artifact loader panicked".to_string(),
                })
            });

        let mut state = slot.state.lock().unwrap();
        let result = match loaded {
            Ok(bundle) => {
                info!(kind, "artifacts loaded");
                let bundle = Arc::new(bundle);
                state.phase = Phase::Ready(bundle.clone());
                state.last_failure = None;
                Ok(bundle)
            }
            Err(e) => {
                warn!(kind, attempt, error = %e, "artifact load failed");
                state.phase = Phase::Empty;
                state.last_failure = Some((attempt, e.clone()));
                Err(e)
            }
        };
        slot.settled.notify_all();
        result
    }

    /// Whether `kind` has been loaded successfully.
    pub fn is_loaded(&self, kind: &str) -> bool {
        self.slots
            .get(kind)
            .is_some_and(|slot| matches!(slot.state.lock().unwrap().phase, Phase::Ready(_)))
    }

    /// Known kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.slots.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Load every known kind, logging failures. Never aborts.
    ///
    /// Returns the kinds that failed. A failed kind is tried again on its
    /// next [`get`](Self::get).
    pub fn prewarm(&self) -> Vec<(String, LoadError)> {
        let mut failed = Vec::new();
        for kind in self.kinds() {
            if let Err(e) = self.get(kind) {
                warn!(kind, error = %e, "artifact pre-warm failed");
                failed.push((kind.to_string(), e));
            }
        }
        failed
    }
}

impl core::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let loaded: Vec<&str> = self
            .kinds()
            .into_iter()
            .filter(|kind| self.is_loaded(kind))
            .collect();
        f.debug_struct("ArtifactCache")
            .field("kinds", &self.kinds())
            .field("loaded", &loaded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::model::DenseNetwork;

    fn identity() -> Arc<dyn Model> {
        Arc::new(
            DenseNetwork::from_json(r#"{"layers": [{"weights": [[1.0]], "bias": [0.0]}]}"#)
                .unwrap(),
        )
    }

    fn counting_loader(calls: Arc<AtomicUsize>) -> impl ArtifactLoader {
        move |kind: &str| -> Result<ArtifactBundle, LoadError> {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            match kind {
                "K" => Err(LoadError::Missing {
                    path: "models/k.json".to_string(),
                }),
                _ => Ok(ArtifactBundle::new(identity()).with_threshold(0.5)),
            }
        }
    }

    #[test]
    fn concurrent_first_callers_share_one_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(ArtifactCache::new(counting_loader(calls.clone()), ["A"]));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.get("A").unwrap()
                })
            })
            .collect();

        let bundles: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(bundles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(bundles[0].threshold, Some(0.5));
    }

    #[test]
    fn failed_load_is_attempted_again_on_next_get() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ArtifactCache::new(counting_loader(calls.clone()), ["A", "K"]);

        let first = cache.get("K").unwrap_err();
        let second = cache.get("K").unwrap_err();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.is_loaded("K"));
    }

    #[test]
    fn concurrent_callers_share_a_failing_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let release_rx = Mutex::new(release_rx);
        let counter = calls.clone();
        let cache = Arc::new(ArtifactCache::new(
            move |_: &str| -> Result<ArtifactBundle, LoadError> {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = started_tx.lock().unwrap().send(());
                let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
                Err(LoadError::Missing {
                    path: "models/k.json".to_string(),
                })
            },
            ["K"],
        ));

        let first = {
            let cache = cache.clone();
            thread::spawn(move || cache.get("K"))
        };
        started_rx.recv().unwrap();
        let second = {
            let cache = cache.clone();
            thread::spawn(move || cache.get("K"))
        };
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        let first = first.join().unwrap().unwrap_err();
        let second = second.join().unwrap().unwrap_err();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prewarm_reports_failures_and_keeps_going() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ArtifactCache::new(counting_loader(calls.clone()), ["K", "A"]);

        let failed = cache.prewarm();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "K");
        assert!(cache.is_loaded("A"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Real use after a failed pre-warm loads again and fails the same way.
        assert_eq!(cache.get("K").unwrap_err(), failed[0].1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // A loaded kind is not loaded again.
        cache.get("A").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unknown_kind_never_reaches_the_loader() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ArtifactCache::new(counting_loader(calls.clone()), ["A"]);

        assert_eq!(
            cache.get("Z").unwrap_err(),
            LoadError::UnknownKind("Z".to_string())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
