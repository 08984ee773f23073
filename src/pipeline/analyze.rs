//! Analysis client: hand the artifact to a document-analysis service.
//!
//! [`AnalysisService`] is the seam: one implementation talks to Gemini's
//! REST API directly ([`crate::pipeline::gemini`]), another wraps any
//! `edgequake-llm` provider ([`crate::pipeline::provider`]), and tests plug
//! in fakes. [`AnalysisClient`] adds what every service needs around the
//! call: the prompt, a bounded wait per attempt, and a single bounded retry.
//!
//! ## Why only one retry?
//!
//! The expected failure is a free-tier quota. Retrying a rate-limited call
//! several times mostly fails the same way while the caller waits, so the
//! default policy allows one retry and then surfaces the error.

use crate::config::PipelineConfig;
use crate::error::ConcallError;
use crate::pipeline::gemini::GeminiService;
use crate::pipeline::provider::{self, LlmProviderService};
use crate::pipeline::retry::{retry_with_backoff, RetryPolicy};
use crate::prompts::analysis_prompt;
use crate::types::Artifact;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// An external service that reads a document and answers a prompt.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Submit `artifact` with `prompt` and return the raw response text.
    ///
    /// Failures must be [`ConcallError::AnalysisService`] with `transient`
    /// set for rate limits and server-side errors.
    async fn analyze_document(&self, artifact: &Artifact, prompt: &str) -> Result<String, ConcallError>;
}

/// Drives an [`AnalysisService`] with timeout and retry policy.
#[derive(Clone)]
pub struct AnalysisClient {
    service: Arc<dyn AnalysisService>,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl std::fmt::Debug for AnalysisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisClient")
            .field("service", &self.service.name())
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

impl AnalysisClient {
    pub fn new(service: Arc<dyn AnalysisService>, timeout_secs: u64, retry: RetryPolicy) -> Self {
        Self {
            service,
            timeout_secs,
            retry,
        }
    }

    /// Pick the analysis service, from most-specific to least-specific:
    ///
    /// 1. a pre-built service in `config.service`
    /// 2. Gemini, when `config.api_key` is set
    /// 3. the alternate `edgequake-llm` provider, when
    ///    `config.alternate_api_key` is set
    ///
    /// Fails with [`ConcallError::Configuration`] when none applies. No
    /// network call is made here.
    pub fn from_config(config: &PipelineConfig, http: Client) -> Result<Self, ConcallError> {
        let service: Arc<dyn AnalysisService> = if let Some(ref service) = config.service {
            Arc::clone(service)
        } else if let Some(ref key) = config.api_key {
            Arc::new(GeminiService::new(http, key.clone(), config))
        } else if let Some(ref key) = config.alternate_api_key {
            let model = config
                .alternate_model
                .as_deref()
                .or_else(|| provider::default_model(&config.alternate_provider))
                .unwrap_or_default();
            Arc::new(LlmProviderService::with_api_key(
                &config.alternate_provider,
                key,
                model,
                config,
            )?)
        } else {
            return Err(ConcallError::Configuration {
                reason: "no analysis credential configured (GEMINI_API_KEY or alternate provider key)"
                    .into(),
            });
        };

        debug!("Analysis service: {}", service.name());
        Ok(Self::new(service, config.analysis_timeout_secs, config.analysis_retry))
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Analyse `artifact` for `symbol` and return the raw response verbatim.
    ///
    /// # Errors
    /// - [`ConcallError::AnalysisService`] — rejected or failed by the service.
    /// - [`ConcallError::AnalysisTimeout`] — an attempt exceeded the wait window.
    pub async fn analyze(&self, artifact: &Artifact, symbol: &str) -> Result<String, ConcallError> {
        let prompt = analysis_prompt(symbol);
        let provider = self.service.name().to_string();
        let timeout = Duration::from_secs(self.timeout_secs);

        retry_with_backoff(&self.retry, "analysis", || {
            let prompt = prompt.as_str();
            let provider = provider.as_str();
            async move {
                let start = Instant::now();
                let text = tokio::time::timeout(timeout, self.service.analyze_document(artifact, prompt))
                    .await
                    .map_err(|_| ConcallError::AnalysisTimeout {
                        provider: provider.to_string(),
                        secs: self.timeout_secs,
                    })??;
                info!(
                    "{}: analysis by {} took {}ms ({} chars)",
                    symbol,
                    provider,
                    start.elapsed().as_millis(),
                    text.len()
                );
                Ok(text)
            }
        })
        .await
    }
}

/// Classify a provider error message the way the HTTP status would.
///
/// Used where only the rendered error is available.
pub(crate) fn classify_failure(provider: &str, detail: String) -> ConcallError {
    let lower = detail.to_ascii_lowercase();
    let transient = [
        "429",
        "rate limit",
        "ratelimit",
        "resource exhausted",
        "resource_exhausted",
        "overloaded",
        "529",
        "500",
        "502",
        "503",
        "504",
        "timed out",
        "timeout",
        "connection",
    ]
    .iter()
    .any(|needle| lower.contains(needle));

    ConcallError::AnalysisService {
        provider: provider.to_string(),
        detail,
        transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PresentationLink;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedService {
        calls: AtomicUsize,
        outcomes: Vec<Result<String, ConcallError>>,
        delay: Duration,
    }

    #[async_trait]
    impl AnalysisService for ScriptedService {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn analyze_document(&self, _artifact: &Artifact, prompt: &str) -> Result<String, ConcallError> {
            assert!(prompt.contains("Risks & Challenges"));
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.outcomes[n.min(self.outcomes.len() - 1)].clone()
        }
    }

    fn artifact() -> Artifact {
        let mut spool = tempfile::NamedTempFile::new().unwrap();
        spool.write_all(b"%PDF-1.7").unwrap();
        Artifact::new(
            spool,
            "application/pdf".into(),
            8,
            PresentationLink::new("https://site/pres/q2fy24.pdf", None),
        )
    }

    fn rate_limited() -> ConcallError {
        ConcallError::AnalysisService {
            provider: "scripted".into(),
            detail: "429".into(),
            transient: true,
        }
    }

    fn client(service: Arc<ScriptedService>, timeout_secs: u64) -> AnalysisClient {
        AnalysisClient::new(service, timeout_secs, RetryPolicy::new(1, 0))
    }

    #[tokio::test]
    async fn single_retry_on_rate_limit() {
        let service = Arc::new(ScriptedService {
            calls: AtomicUsize::new(0),
            outcomes: vec![Err(rate_limited()), Ok("text".into())],
            delay: Duration::ZERO,
        });
        let out = client(Arc::clone(&service), 5).analyze(&artifact(), "TCS").await;
        assert_eq!(out.unwrap(), "text");
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rate_limit_surfaces_after_one_retry() {
        let service = Arc::new(ScriptedService {
            calls: AtomicUsize::new(0),
            outcomes: vec![Err(rate_limited())],
            delay: Duration::ZERO,
        });
        let out = client(Arc::clone(&service), 5).analyze(&artifact(), "TCS").await;
        assert!(matches!(out, Err(ConcallError::AnalysisService { transient: true, .. })));
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn auth_failure_not_retried() {
        let service = Arc::new(ScriptedService {
            calls: AtomicUsize::new(0),
            outcomes: vec![Err(ConcallError::AnalysisService {
                provider: "scripted".into(),
                detail: "401 API key invalid".into(),
                transient: false,
            })],
            delay: Duration::ZERO,
        });
        let out = client(Arc::clone(&service), 5).analyze(&artifact(), "TCS").await;
        assert!(out.is_err());
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_service_times_out() {
        let service = Arc::new(ScriptedService {
            calls: AtomicUsize::new(0),
            outcomes: vec![Ok("late".into())],
            delay: Duration::from_secs(120),
        });
        let out = AnalysisClient::new(service, 90, RetryPolicy::none())
            .analyze(&artifact(), "TCS")
            .await;
        assert!(matches!(out, Err(ConcallError::AnalysisTimeout { secs: 90, .. })));
    }

    #[test]
    fn missing_credential_is_configuration_error() {
        let config = PipelineConfig::default();
        let err = AnalysisClient::from_config(&config, Client::new()).unwrap_err();
        assert!(matches!(err, ConcallError::Configuration { .. }));
    }

    #[test]
    fn gemini_selected_when_key_present() {
        let config = PipelineConfig::builder().api_key("k").build().unwrap();
        let client = AnalysisClient::from_config(&config, Client::new()).unwrap();
        assert_eq!(client.service_name(), "gemini");
    }

    #[test]
    fn alternate_key_used_without_environment() {
        let config = PipelineConfig::builder()
            .alternate_api_key("sk-ant-explicit")
            .build()
            .unwrap();
        let client = AnalysisClient::from_config(&config, Client::new()).unwrap();
        assert_eq!(client.service_name(), "anthropic");

        let config = PipelineConfig::builder()
            .alternate_api_key("sk-explicit")
            .alternate_provider("openai")
            .alternate_model("gpt-4.1-mini")
            .build()
            .unwrap();
        let client = AnalysisClient::from_config(&config, Client::new()).unwrap();
        assert_eq!(client.service_name(), "openai");
    }

    #[test]
    fn gemini_key_wins_over_alternate() {
        let config = PipelineConfig::builder()
            .api_key("k")
            .alternate_api_key("sk-ant-explicit")
            .build()
            .unwrap();
        let client = AnalysisClient::from_config(&config, Client::new()).unwrap();
        assert_eq!(client.service_name(), "gemini");
    }

    #[test]
    fn classify_failure_by_message() {
        assert!(classify_failure("p", "HTTP 429 Too Many Requests".into()).is_transient());
        assert!(classify_failure("p", "Resource exhausted".into()).is_transient());
        assert!(!classify_failure("p", "invalid x-api-key".into()).is_transient());
    }
}
