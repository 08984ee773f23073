//! Pipeline orchestrator: the single entry point.
//!
//! ```text
//! symbol ─▶ validate ─▶ resolve ─▶ cache? ──hit──▶ Arc<AnalysisResult>
//!                                    │
//!                                   miss ─▶ join or start (symbol, url)
//!                                             │
//!                                             └─▶ fetch ─▶ analyze ─▶ normalize ─▶ cache
//! ```
//!
//! The listing is resolved on every call so a newer presentation is noticed;
//! everything after that is served from the cache or from a single shared
//! computation per `(symbol, url)`.

use crate::cache::AnalysisCache;
use crate::coalesce::{AnalysisOutcome, Claim, InFlight, InFlightHandle};
use crate::config::PipelineConfig;
use crate::error::{ConcallError, PipelineError};
use crate::output::AnalysisResult;
use crate::pipeline::analyze::AnalysisClient;
use crate::pipeline::fetch::ArtifactFetcher;
use crate::pipeline::normalize::normalize;
use crate::pipeline::resolve::LinkResolver;
use crate::progress::{NoopObserver, SharedObserver, Stage, StageTracker};
use crate::types::{CompanyIdentifier, PresentationLink};
use futures::FutureExt;
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Resolves, downloads, analyses and caches concall presentations.
///
/// Cheap to clone; clones share the cache and the in-flight registry.
///
/// ```rust,no_run
/// use concall_digest::{ConcallPipeline, PipelineConfig};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::builder()
///     .api_key(std::env::var("GEMINI_API_KEY")?)
///     .build()?;
/// let pipeline = ConcallPipeline::new(config)?;
/// let summary = pipeline.get_analysis("BALKRISIND").await?;
/// println!("{}", summary.to_markdown());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConcallPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    resolver: LinkResolver,
    fetcher: ArtifactFetcher,
    /// A missing credential is reported on first use, before any request.
    analysis: Result<AnalysisClient, ConcallError>,
    cache: Arc<AnalysisCache>,
    in_flight: InFlight,
    observer: SharedObserver,
}

impl ConcallPipeline {
    /// Build a pipeline with its own empty cache.
    pub fn new(config: PipelineConfig) -> Result<Self, ConcallError> {
        Self::with_cache(config, Arc::new(AnalysisCache::new()))
    }

    /// Build a pipeline that reads and writes `cache`.
    pub fn with_cache(config: PipelineConfig, cache: Arc<AnalysisCache>) -> Result<Self, ConcallError> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConcallError::Configuration {
                reason: format!("HTTP client could not be built: {e}"),
            })?;

        let analysis = AnalysisClient::from_config(&config, http.clone());
        match &analysis {
            Ok(client) => debug!("Analysis via {}", client.service_name()),
            Err(e) => warn!("Pipeline built without a usable analysis service: {}", e),
        }

        let inner = PipelineInner {
            resolver: LinkResolver::new(
                http.clone(),
                config.listing_base_url.clone(),
                config.listing_timeout_secs,
                config.listing_retry,
            ),
            fetcher: ArtifactFetcher::new(
                http,
                config.download_timeout_secs,
                config.max_artifact_bytes,
                config.download_retry,
            )
            .with_spool_dir(config.spool_dir.clone()),
            analysis,
            cache,
            in_flight: InFlight::default(),
            observer: config.observer.clone().unwrap_or_else(|| Arc::new(NoopObserver)),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// The four-section summary of the most recent presentation for `symbol`.
    ///
    /// Served from the cache when the listing still points at the analysed
    /// presentation. Concurrent calls for the same presentation share one
    /// download and one analysis.
    ///
    /// # Errors
    /// The first failing stage's error, unchanged, wrapped with the stage
    /// and the symbol. See [`PipelineError::kind`].
    pub async fn get_analysis(&self, symbol: &str) -> Result<Arc<AnalysisResult>, PipelineError> {
        self.run(symbol, None).await
    }

    /// As [`get_analysis`](Self::get_analysis), abandoned after `deadline`.
    ///
    /// On expiry the call fails with [`ConcallError::DeadlineExceeded`]
    /// tagged with the stage that was running. If no other caller is waiting
    /// on the same presentation the work is cancelled, its temporary file is
    /// removed and nothing is cached.
    pub async fn get_analysis_with_deadline(
        &self,
        symbol: &str,
        deadline: Duration,
    ) -> Result<Arc<AnalysisResult>, PipelineError> {
        self.run(symbol, Some(Deadline::after(deadline))).await
    }

    /// Remove the cached summary for `symbol`. Returns `true` if one existed.
    pub fn evict(&self, symbol: &str) -> bool {
        match CompanyIdentifier::parse(symbol) {
            Ok(id) => {
                let removed = self.inner.cache.evict(id.as_str());
                if removed {
                    info!("{}: cache entry evicted", id);
                }
                removed
            }
            Err(_) => false,
        }
    }

    pub fn cache(&self) -> &Arc<AnalysisCache> {
        &self.inner.cache
    }

    /// Name of the configured analysis service, if any.
    pub fn analysis_service(&self) -> Option<&str> {
        self.inner.analysis.as_ref().ok().map(AnalysisClient::service_name)
    }

    /// Analyses currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.active()
    }

    async fn run(&self, symbol: &str, deadline: Option<Deadline>) -> Result<Arc<AnalysisResult>, PipelineError> {
        let inner = &self.inner;
        let tracker = StageTracker::default();

        // ── Step 1: Validate (no network) ────────────────────────────────────
        inner.observer.on_stage_start(symbol, Stage::Validate);
        let id = CompanyIdentifier::parse(symbol).map_err(|e| inner.fail(symbol, Stage::Validate, e))?;
        let symbol = id.as_str();
        let analysis = inner
            .analysis
            .clone()
            .map_err(|e| inner.fail(symbol, Stage::Validate, e))?;
        inner.observer.on_stage_complete(symbol, Stage::Validate, 0);

        // ── Step 2: Resolve the most recent presentation ─────────────────────
        let resolve = inner.stage(symbol, Stage::Resolve, &tracker, inner.resolver.resolve(&id));
        let link = within(deadline, resolve, || inner.deadline_error(symbol, tracker.current(), deadline)).await?;

        // ── Step 3: Cache ────────────────────────────────────────────────────
        if inner.cache.record_resolved(symbol, &link.url) {
            info!("{}: newer presentation listed, previous summary dropped", symbol);
        }
        if let Some(hit) = inner.cache.lookup(symbol, &link.url) {
            info!("{}: cache hit for {}", symbol, link.url);
            inner.observer.on_cache_hit(symbol, &link.url);
            return Ok(hit);
        }

        // ── Step 4: Join or start the analysis for (symbol, url) ─────────────
        let claim = inner.in_flight.claim(
            symbol,
            &link.url,
            || inner.cache.lookup(symbol, &link.url),
            |guard| {
                let inner = Arc::clone(&self.inner);
                let id = id.clone();
                let link = link.clone();
                async move {
                    let outcome = inner.analyse(&id, &link, &analysis, guard.progress()).await;
                    // Unregister only after the cache write.
                    drop(guard);
                    outcome
                }
                .boxed()
            },
        );

        let InFlightHandle { future, progress } = match claim {
            Claim::Cached(hit) => {
                inner.observer.on_cache_hit(symbol, &link.url);
                return Ok(hit);
            }
            Claim::Joined(handle) => {
                info!("{}: joining analysis already running for {}", symbol, link.url);
                inner.observer.on_coalesced(symbol, &link.url);
                handle
            }
            Claim::Started(handle) => {
                info!("{}: analysing {} ({})", symbol, link.url, link.display_label());
                handle
            }
        };

        within(deadline, future, || inner.deadline_error(symbol, progress.current(), deadline)).await
    }
}

impl PipelineInner {
    /// Fetch → analyze → normalize → cache. Runs once per in-flight key.
    async fn analyse(
        &self,
        id: &CompanyIdentifier,
        link: &PresentationLink,
        analysis: &AnalysisClient,
        tracker: &StageTracker,
    ) -> AnalysisOutcome {
        let symbol = id.as_str();
        let start = Instant::now();

        let artifact = self
            .stage(symbol, Stage::Fetch, tracker, self.fetcher.fetch(link))
            .await?;
        info!(
            "{}: downloaded {} bytes ({})",
            symbol, artifact.size_bytes, artifact.content_type
        );

        let raw = self
            .stage(symbol, Stage::Analyze, tracker, analysis.analyze(&artifact, symbol))
            .await;
        // The spool is deleted here whether or not the analysis succeeded.
        drop(artifact);
        let raw = raw?;

        tracker.enter(Stage::Normalize);
        self.observer.on_stage_start(symbol, Stage::Normalize);
        let normalize_start = Instant::now();
        let result = normalize(&raw, link.display_label()).map_err(|e| self.fail(symbol, Stage::Normalize, e))?;
        self.observer
            .on_stage_complete(symbol, Stage::Normalize, elapsed_ms(normalize_start));

        let empty = result.empty_sections();
        if !empty.is_empty() {
            warn!(
                "{}: response had empty sections: {}",
                symbol,
                empty.iter().map(|s| s.title()).collect::<Vec<_>>().join(", ")
            );
        }

        let result = Arc::new(result);
        if !self.cache.insert_if_current(symbol, &link.url, Arc::clone(&result)) {
            info!("{}: {} superseded while analysing, result not cached", symbol, link.url);
        }
        info!("{}: analysis complete in {}ms", symbol, elapsed_ms(start));
        Ok(result)
    }

    /// Run one stage, reporting it to the observer and tagging its error.
    async fn stage<T, F>(&self, symbol: &str, stage: Stage, tracker: &StageTracker, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, ConcallError>>,
    {
        tracker.enter(stage);
        self.observer.on_stage_start(symbol, stage);
        let start = Instant::now();
        match fut.await {
            Ok(value) => {
                self.observer.on_stage_complete(symbol, stage, elapsed_ms(start));
                Ok(value)
            }
            Err(e) => Err(self.fail(symbol, stage, e)),
        }
    }

    fn fail(&self, symbol: &str, stage: Stage, error: ConcallError) -> PipelineError {
        warn!("{}: {} failed: {}", symbol, stage, error);
        self.observer.on_failure(symbol, stage, &error.to_string());
        PipelineError::new(stage, symbol, error)
    }

    fn deadline_error(&self, symbol: &str, stage: Stage, deadline: Option<Deadline>) -> PipelineError {
        let millis = deadline.map(|d| d.budget_ms).unwrap_or_default();
        self.fail(symbol, stage, ConcallError::DeadlineExceeded { millis })
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: tokio::time::Instant,
    budget_ms: u64,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            at: tokio::time::Instant::now() + budget,
            budget_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Await `fut`, giving up at the deadline if there is one.
async fn within<T, F, E>(deadline: Option<Deadline>, fut: F, on_expiry: E) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
    E: FnOnce() -> PipelineError,
{
    match deadline {
        None => fut.await,
        Some(d) => match tokio::time::timeout_at(d.at, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(on_expiry()),
        },
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
