//! Observer trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::PipelineConfigBuilder::observer`] to receive events as
//! each company moves through resolve → fetch → analyze → normalize.
//!
//! # Example
//!
//! ```rust
//! use concall_digest::{PipelineConfig, PipelineObserver, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     finished: AtomicUsize,
//! }
//!
//! impl PipelineObserver for CountingObserver {
//!     fn on_stage_complete(&self, symbol: &str, stage: Stage, elapsed_ms: u64) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{symbol}: {stage} done in {elapsed_ms}ms");
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { finished: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .api_key("test-key")
//!     .observer(observer as Arc<dyn PipelineObserver>)
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// The pipeline stage a failure or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Identifier parsing and credential check; no network.
    Validate,
    /// Listing page fetch and link extraction.
    Resolve,
    /// Artifact download.
    Fetch,
    /// Upload + prompted completion against the analysis service.
    Analyze,
    /// Section parsing of the raw response.
    Normalize,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Validate,
        Stage::Resolve,
        Stage::Fetch,
        Stage::Analyze,
        Stage::Normalize,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Analyze => "analyze",
            Stage::Normalize => "normalize",
        };
        f.write_str(name)
    }
}

/// Called by the pipeline as it processes each company.
///
/// Implementations must be `Send + Sync`: `get_analysis` may run for many
/// companies at once. All methods default to no-ops.
pub trait PipelineObserver: Send + Sync {
    /// A stage is about to start.
    fn on_stage_start(&self, symbol: &str, stage: Stage) {
        let _ = (symbol, stage);
    }

    /// A stage finished successfully.
    fn on_stage_complete(&self, symbol: &str, stage: Stage, elapsed_ms: u64) {
        let _ = (symbol, stage, elapsed_ms);
    }

    /// The result was served from the cache; no download or analysis ran.
    fn on_cache_hit(&self, symbol: &str, url: &str) {
        let _ = (symbol, url);
    }

    /// The call attached to an analysis already in flight for the same link.
    fn on_coalesced(&self, symbol: &str, url: &str) {
        let _ = (symbol, url);
    }

    /// A stage failed; the error is about to be returned.
    fn on_failure(&self, symbol: &str, stage: Stage, error: &str) {
        let _ = (symbol, stage, error);
    }
}

/// Used when no observer is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type SharedObserver = Arc<dyn PipelineObserver>;

/// The stage a running analysis last entered, readable from any task.
///
/// Lets a caller whose deadline fires while waiting on a shared
/// computation report where that computation was.
#[derive(Debug, Default)]
pub(crate) struct StageTracker(AtomicU8);

impl StageTracker {
    pub(crate) fn enter(&self, stage: Stage) {
        self.0.store(stage as u8, Ordering::Release);
    }

    pub(crate) fn current(&self) -> Stage {
        Stage::ALL
            .get(self.0.load(Ordering::Acquire) as usize)
            .copied()
            .unwrap_or(Stage::Validate)
    }
}
