//! Per-key registry of in-flight analyses.
//!
//! The first caller for a `(symbol, url)` key registers a shared future;
//! later callers clone it and await the same outcome. The registry holds
//! only a weak handle, so the computation lives exactly as long as someone
//! is awaiting it: when every caller is dropped (deadline, cancellation) the
//! future is dropped too and its temporary artifact goes with it.
//!
//! The entry is removed by a guard owned by the computation, which drops
//! when the computation settles or is cancelled. A generation number keeps
//! a late guard from removing a newer registration for the same key.

use crate::error::PipelineError;
use crate::output::AnalysisResult;
use crate::progress::StageTracker;
use futures::future::{BoxFuture, Shared, WeakShared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub(crate) type AnalysisOutcome = Result<Arc<AnalysisResult>, PipelineError>;
pub(crate) type SharedAnalysis = Shared<BoxFuture<'static, AnalysisOutcome>>;

type Key = (String, String);

struct Registration {
    generation: u64,
    future: WeakShared<BoxFuture<'static, AnalysisOutcome>>,
    progress: Arc<StageTracker>,
}

/// A running computation: its shared outcome and the stage it is in.
pub(crate) struct InFlightHandle {
    pub(crate) future: SharedAnalysis,
    pub(crate) progress: Arc<StageTracker>,
}

type Registry = Arc<Mutex<HashMap<Key, Registration>>>;

/// How a caller got its result.
pub(crate) enum Claim {
    /// Completed result found while holding the registry lock.
    Cached(Arc<AnalysisResult>),
    /// Attached to a computation another caller started.
    Joined(InFlightHandle),
    /// Registered a new computation.
    Started(InFlightHandle),
}

#[derive(Default)]
pub(crate) struct InFlight {
    registry: Registry,
    next_generation: AtomicU64,
}

impl InFlight {
    /// Join the computation registered for `(symbol, url)` or start one.
    ///
    /// `cached` is consulted under the registry lock: the computation writes
    /// its result to the cache before its guard unregisters it, so a caller
    /// that finds neither a live entry nor a cached result can start a fresh
    /// computation without duplicating one that just finished.
    pub(crate) fn claim<C, S>(&self, symbol: &str, url: &str, cached: C, start: S) -> Claim
    where
        C: FnOnce() -> Option<Arc<AnalysisResult>>,
        S: FnOnce(InFlightGuard) -> BoxFuture<'static, AnalysisOutcome>,
    {
        let key = (symbol.to_string(), url.to_string());
        let mut registry = lock(&self.registry);

        if let Some(registration) = registry.get(&key) {
            if let Some(future) = registration.future.upgrade() {
                return Claim::Joined(InFlightHandle {
                    future,
                    progress: Arc::clone(&registration.progress),
                });
            }
        }
        if let Some(result) = cached() {
            return Claim::Cached(result);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let progress = Arc::new(StageTracker::default());
        let guard = InFlightGuard {
            registry: Arc::clone(&self.registry),
            key: key.clone(),
            generation,
            progress: Arc::clone(&progress),
        };
        let future = start(guard).shared();
        if let Some(weak) = future.downgrade() {
            registry.insert(
                key,
                Registration {
                    generation,
                    future: weak,
                    progress: Arc::clone(&progress),
                },
            );
        }
        debug!("{}: analysis of {} registered (generation {})", symbol, url, generation);
        Claim::Started(InFlightHandle { future, progress })
    }

    /// Number of registered computations still alive.
    pub(crate) fn active(&self) -> usize {
        // Upgraded handles are dropped after the lock is released: dropping
        // the last one runs the guard, which takes the lock.
        let alive: Vec<SharedAnalysis> = lock(&self.registry)
            .values()
            .filter_map(|r| r.future.upgrade())
            .collect();
        alive.len()
    }
}

/// Owned by the computation. Unregisters its key when dropped, unless a
/// newer registration replaced it.
pub(crate) struct InFlightGuard {
    registry: Registry,
    key: Key,
    generation: u64,
    progress: Arc<StageTracker>,
}

impl InFlightGuard {
    /// Where the computation reports the stage it has entered.
    pub(crate) fn progress(&self) -> &StageTracker {
        &self.progress
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut registry = lock(&self.registry);
        if registry
            .get(&self.key)
            .is_some_and(|r| r.generation == self.generation)
        {
            registry.remove(&self.key);
        }
    }
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<Key, Registration>> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Stage;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn result() -> Arc<AnalysisResult> {
        Arc::new(AnalysisResult {
            guidance: vec![],
            achievements: vec!["Record revenue.".into()],
            risks: vec![],
            strategic_focus: vec![],
            source_label: "Q2".into(),
            generated_at: Utc::now(),
        })
    }

    fn slow_start(
        runs: Arc<AtomicUsize>,
        out: Arc<AnalysisResult>,
    ) -> impl FnOnce(InFlightGuard) -> BoxFuture<'static, AnalysisOutcome> {
        move |guard| {
            async move {
                guard.progress().enter(Stage::Analyze);
                let _guard = guard;
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(out)
            }
            .boxed()
        }
    }

    fn into_future(claim: Claim) -> SharedAnalysis {
        match claim {
            Claim::Joined(h) | Claim::Started(h) => h.future,
            Claim::Cached(_) => panic!("unexpected cache hit"),
        }
    }

    #[tokio::test]
    async fn second_claim_joins_first() {
        let in_flight = InFlight::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let out = result();

        let first = in_flight.claim("TCS", "u", || None, slow_start(Arc::clone(&runs), Arc::clone(&out)));
        assert!(matches!(first, Claim::Started(_)));
        let second = in_flight.claim("TCS", "u", || None, slow_start(Arc::clone(&runs), Arc::clone(&out)));
        let Claim::Joined(joined) = second else {
            panic!("second claim should join");
        };
        let first = into_future(first);
        let _ = futures::poll!(first.clone());
        assert_eq!(joined.progress.current(), Stage::Analyze);
        let second = Claim::Joined(joined);

        let (a, b) = futures::join!(first, into_future(second));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(in_flight.active(), 0);
    }

    #[tokio::test]
    async fn different_urls_do_not_coalesce() {
        let in_flight = InFlight::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let a = in_flight.claim("TCS", "u1", || None, slow_start(Arc::clone(&runs), result()));
        let b = in_flight.claim("TCS", "u2", || None, slow_start(Arc::clone(&runs), result()));
        assert!(matches!(b, Claim::Started(_)));
        let _ = futures::join!(into_future(a), into_future(b));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cached_result_wins_when_nothing_in_flight() {
        let in_flight = InFlight::default();
        let out = result();
        let claim = in_flight.claim(
            "TCS",
            "u",
            || Some(Arc::clone(&out)),
            |_| futures::future::pending().boxed(),
        );
        assert!(matches!(claim, Claim::Cached(r) if Arc::ptr_eq(&r, &out)));
    }

    #[tokio::test]
    async fn dropping_every_waiter_unregisters() {
        let in_flight = InFlight::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let claim = in_flight.claim("TCS", "u", || None, slow_start(Arc::clone(&runs), result()));
        let fut = into_future(claim);
        assert_eq!(in_flight.active(), 1);

        let _ = tokio::time::timeout(Duration::from_millis(5), fut).await;
        assert_eq!(in_flight.active(), 0);

        let again = in_flight.claim("TCS", "u", || None, slow_start(Arc::clone(&runs), result()));
        assert!(matches!(again, Claim::Started(_)));
    }
}
