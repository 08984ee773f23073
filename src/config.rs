//! Configuration types for the concall pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Timeouts, size ceilings, retry policies
//! and credentials all live here so each stage stays a pure function of its
//! inputs and its slice of the config.

use crate::error::ConcallError;
use crate::pipeline::analyze::AnalysisService;
use crate::pipeline::retry::RetryPolicy;
use crate::progress::SharedObserver;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default listing site.
pub const DEFAULT_LISTING_BASE_URL: &str = "https://www.screener.in";

/// Default Gemini REST endpoint.
pub const DEFAULT_ANALYSIS_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default primary model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default model for the `anthropic` alternate provider.
pub const DEFAULT_ALTERNATE_MODEL: &str = "claude-sonnet-4-20250514";

/// The listing site serves a stripped page to non-browser agents.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const MIB: u64 = 1024 * 1024;

/// Configuration for a [`crate::ConcallPipeline`].
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use concall_digest::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .api_key("AIza...")
///     .max_artifact_mb(25)
///     .analysis_timeout_secs(90)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Origin of the listing site. Default: `https://www.screener.in`.
    pub listing_base_url: String,

    /// `User-Agent` sent to the listing site and the artifact host.
    pub user_agent: String,

    /// Listing page request timeout in seconds. Default: 10.
    pub listing_timeout_secs: u64,

    /// Artifact download timeout in seconds. Default: 30.
    pub download_timeout_secs: u64,

    /// Bounded wait for one analysis attempt in seconds. Default: 90.
    ///
    /// Analyses normally finish in 10–30 s.
    pub analysis_timeout_secs: u64,

    /// Size ceiling for downloaded artifacts. Default: 25 MiB.
    pub max_artifact_bytes: u64,

    /// Directory for downloaded artifacts. Default: the system temp dir.
    pub spool_dir: Option<PathBuf>,

    /// Retries for the listing page. Default: 2 retries, 500 ms base.
    pub listing_retry: RetryPolicy,

    /// Retries for artifact downloads (transient failures only). Default: 2 retries, 500 ms base.
    pub download_retry: RetryPolicy,

    /// Retries for the analysis call. Default: 1 retry, 2 s base.
    ///
    /// A rate-limited free tier usually fails the same way again, so the
    /// failure should reach the caller quickly.
    pub analysis_retry: RetryPolicy,

    /// Gemini API key. Without it (and without an alternate key or an
    /// injected service) every call fails with a configuration error.
    pub api_key: Option<String>,

    /// Credential for the alternate provider.
    pub alternate_api_key: Option<String>,

    /// `edgequake-llm` provider name used with `alternate_api_key`. Default: "anthropic".
    pub alternate_provider: String,

    /// Gemini model. Default: "gemini-2.0-flash".
    pub model: String,

    /// Alternate provider model. Default: the provider's own default,
    /// "claude-sonnet-4-20250514" for `anthropic`.
    pub alternate_model: Option<String>,

    /// Gemini REST origin; overridden in tests.
    pub analysis_base_url: String,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Output token cap for the analysis. Default: 4096.
    ///
    /// 30–40 sentences fit comfortably.
    pub max_output_tokens: usize,

    /// Interval between upload state polls in milliseconds. Default: 1000.
    pub upload_poll_interval_ms: u64,

    /// Pre-constructed analysis service. Takes precedence over the keys.
    pub service: Option<Arc<dyn AnalysisService>>,

    /// Stage event observer.
    pub observer: Option<SharedObserver>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            listing_base_url: DEFAULT_LISTING_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            listing_timeout_secs: 10,
            download_timeout_secs: 30,
            analysis_timeout_secs: 90,
            max_artifact_bytes: 25 * MIB,
            spool_dir: None,
            listing_retry: RetryPolicy::new(2, 500),
            download_retry: RetryPolicy::new(2, 500),
            analysis_retry: RetryPolicy::new(1, 2_000),
            api_key: None,
            alternate_api_key: None,
            alternate_provider: "anthropic".to_string(),
            model: DEFAULT_MODEL.to_string(),
            alternate_model: None,
            analysis_base_url: DEFAULT_ANALYSIS_BASE_URL.to_string(),
            temperature: 0.2,
            max_output_tokens: 4096,
            upload_poll_interval_ms: 1_000,
            service: None,
            observer: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("listing_base_url", &self.listing_base_url)
            .field("listing_timeout_secs", &self.listing_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("analysis_timeout_secs", &self.analysis_timeout_secs)
            .field("max_artifact_bytes", &self.max_artifact_bytes)
            .field("spool_dir", &self.spool_dir)
            .field("listing_retry", &self.listing_retry)
            .field("download_retry", &self.download_retry)
            .field("analysis_retry", &self.analysis_retry)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "alternate_api_key",
                &self.alternate_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("alternate_provider", &self.alternate_provider)
            .field("model", &self.model)
            .field("alternate_model", &self.alternate_model)
            .field("analysis_base_url", &self.analysis_base_url)
            .field("service", &self.service.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

/// Blank strings count as "not configured".
fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl PipelineConfigBuilder {
    pub fn listing_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.listing_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn listing_timeout_secs(mut self, secs: u64) -> Self {
        self.config.listing_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn analysis_timeout_secs(mut self, secs: u64) -> Self {
        self.config.analysis_timeout_secs = secs;
        self
    }

    pub fn max_artifact_bytes(mut self, bytes: u64) -> Self {
        self.config.max_artifact_bytes = bytes;
        self
    }

    pub fn max_artifact_mb(mut self, mb: u64) -> Self {
        self.config.max_artifact_bytes = mb.saturating_mul(MIB);
        self
    }

    pub fn spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.spool_dir = Some(dir.into());
        self
    }

    pub fn listing_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.listing_retry = policy;
        self
    }

    pub fn download_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.download_retry = policy;
        self
    }

    pub fn analysis_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.analysis_retry = policy;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = non_blank(key.into());
        self
    }

    pub fn alternate_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.alternate_api_key = non_blank(key.into());
        self
    }

    pub fn alternate_provider(mut self, name: impl Into<String>) -> Self {
        self.config.alternate_provider = name.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn alternate_model(mut self, model: impl Into<String>) -> Self {
        self.config.alternate_model = non_blank(model.into());
        self
    }

    pub fn analysis_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.analysis_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn upload_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.upload_poll_interval_ms = ms;
        self
    }

    pub fn service(mut self, service: Arc<dyn AnalysisService>) -> Self {
        self.config.service = Some(service);
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// A missing credential is not a build error: it is reported by
    /// [`crate::ConcallPipeline::get_analysis`] before any network call.
    pub fn build(self) -> Result<PipelineConfig, ConcallError> {
        let c = &self.config;
        let invalid = |reason: String| Err(ConcallError::Configuration { reason });

        for (name, secs) in [
            ("listing timeout", c.listing_timeout_secs),
            ("download timeout", c.download_timeout_secs),
            ("analysis timeout", c.analysis_timeout_secs),
        ] {
            if secs == 0 {
                return invalid(format!("{name} must be ≥ 1s"));
            }
        }
        if c.max_artifact_bytes == 0 {
            return invalid("artifact size ceiling must be > 0".into());
        }
        for (name, url) in [
            ("listing base URL", &c.listing_base_url),
            ("analysis base URL", &c.analysis_base_url),
        ] {
            if reqwest::Url::parse(url).is_err() {
                return invalid(format!("{name} '{url}' is not a valid URL"));
            }
        }
        if c.model.trim().is_empty() {
            return invalid("model must not be empty".into());
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_artifact_bytes, 25 * 1024 * 1024);
        assert_eq!(c.analysis_timeout_secs, 90);
        assert!(c.download_timeout_secs < c.analysis_timeout_secs);
        assert_eq!(c.download_retry.max_retries, 2);
        assert_eq!(c.analysis_retry.max_retries, 1);
        assert!(c.api_key.is_none());
    }

    #[test]
    fn blank_key_is_not_a_credential() {
        let c = PipelineConfig::builder().api_key("   ").build().unwrap();
        assert!(c.api_key.is_none());
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = PipelineConfig::builder()
            .download_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConcallError::Configuration { .. }));
    }

    #[test]
    fn bad_base_url_rejected() {
        let err = PipelineConfig::builder()
            .listing_base_url("not a url")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("listing base URL"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let c = PipelineConfig::builder()
            .listing_base_url("http://127.0.0.1:8080/")
            .build()
            .unwrap();
        assert_eq!(c.listing_base_url, "http://127.0.0.1:8080");
    }

    #[test]
    fn debug_redacts_keys() {
        let c = PipelineConfig::builder().api_key("secret-123").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-123"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn max_artifact_mb_converts() {
        let c = PipelineConfig::builder().max_artifact_mb(3).build().unwrap();
        assert_eq!(c.max_artifact_bytes, 3 * 1024 * 1024);
    }
}
