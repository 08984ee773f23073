//! Error types for the concall-digest library.
//!
//! Two layers reflect two questions a caller asks about a failure:
//!
//! * [`ConcallError`] — **what** went wrong. One variant per failure kind
//!   (missing credential, no presentation, upstream down, download
//!   rejected, analysis failed, malformed response). Each pipeline stage
//!   returns exactly one of these.
//!
//! * [`PipelineError`] — **where** it went wrong. The orchestrator wraps the
//!   stage error with the stage name and the company symbol. It never
//!   rewrites the inner kind, so `err.kind()` is always what the stage
//!   reported.
//!
//! Both types are `Clone`: when concurrent callers coalesce onto a single
//! analysis, every one of them receives the same failure.

use crate::progress::Stage;
use thiserror::Error;

/// Transport-level detail for listing and artifact fetches.
///
/// Owns the transient/terminal classification used by the retry helper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// Connection refused/reset, DNS failure, truncated body.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The server answered with a non-2xx status.
    #[error("HTTP {0}")]
    Status(u16),

    /// The body (declared or streamed) exceeded the size ceiling.
    #[error("body exceeds {limit_bytes} byte limit ({observed_bytes} bytes seen)")]
    TooLarge {
        limit_bytes: u64,
        observed_bytes: u64,
    },

    /// The page was fetched but its structure no longer matches what the
    /// scraper expects.
    #[error("page layout changed: {0}")]
    LayoutChanged(String),
}

impl FetchFailure {
    /// Network errors, timeouts, 5xx and 429 are worth another attempt.
    /// Other 4xx responses, oversize bodies and layout drift are not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchFailure::Network(_) | FetchFailure::Timeout { .. } => true,
            FetchFailure::Status(code) => *code >= 500 || *code == 429,
            FetchFailure::TooLarge { .. } | FetchFailure::LayoutChanged(_) => false,
        }
    }

    /// Classify a `reqwest` transport error.
    pub(crate) fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            FetchFailure::Timeout { secs: timeout_secs }
        } else if let Some(status) = err.status() {
            FetchFailure::Status(status.as_u16())
        } else {
            FetchFailure::Network(err.to_string())
        }
    }
}

/// Every failure kind a pipeline stage can report.
#[derive(Debug, Clone, Error)]
pub enum ConcallError {
    // ── Setup ─────────────────────────────────────────────────────────────
    /// No analysis credential, or an invalid configuration value.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// The company symbol is empty or not alphanumeric.
    #[error("Invalid company identifier '{input}': expected an alphanumeric exchange ticker")]
    InvalidIdentifier { input: String },

    // ── Link resolution ───────────────────────────────────────────────────
    /// The listing page exists but carries no presentation entry.
    #[error("No concall presentation listed for {symbol} at {url}")]
    NotFound { symbol: String, url: String },

    /// The listing page could not be fetched or parsed.
    #[error("Listing page '{url}' unavailable: {failure}")]
    UpstreamUnavailable { url: String, failure: FetchFailure },

    // ── Artifact fetch ────────────────────────────────────────────────────
    /// The presentation could not be downloaded.
    #[error("Failed to download '{url}': {failure}")]
    Download { url: String, failure: FetchFailure },

    /// The artifact host returned something that is not a document.
    #[error("Unsupported artifact format '{content_type}' from '{url}'")]
    UnsupportedFormat { url: String, content_type: String },

    // ── Analysis ──────────────────────────────────────────────────────────
    /// The analysis service rejected or failed the request.
    #[error("Analysis service '{provider}' failed: {detail}")]
    AnalysisService {
        provider: String,
        detail: String,
        /// Rate limits and 5xx responses; auth/quota-exhausted-for-good are not.
        transient: bool,
    },

    /// The analysis did not complete within the bounded wait window.
    #[error("Analysis by '{provider}' did not complete within {secs}s")]
    AnalysisTimeout { provider: String, secs: u64 },

    /// None of the expected section headers appear in the AI response.
    #[error("Malformed analysis response: {detail}")]
    MalformedResponse { detail: String },

    // ── Caller ────────────────────────────────────────────────────────────
    /// The caller-supplied overall deadline elapsed.
    #[error("Deadline of {millis}ms exceeded")]
    DeadlineExceeded { millis: u64 },

    /// Temp-file I/O or another unexpected local failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConcallError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ConcallError::UpstreamUnavailable { failure, .. }
            | ConcallError::Download { failure, .. } => failure.is_transient(),
            ConcallError::AnalysisService { transient, .. } => *transient,
            ConcallError::AnalysisTimeout { .. } => true,
            _ => false,
        }
    }

    /// Short, actionable advice for the person running the tool.
    pub fn hint(&self) -> &'static str {
        match self {
            ConcallError::Configuration { .. } => {
                "Set GEMINI_API_KEY, or an alternate provider key with a supported --alternate-provider."
            }
            ConcallError::InvalidIdentifier { .. } => {
                "Use the NSE/BSE ticker, e.g. BALKRISIND or TATASTEEL.NS."
            }
            ConcallError::NotFound { .. } => {
                "The company has not published a concall presentation yet."
            }
            ConcallError::UpstreamUnavailable { .. } => {
                "The listing site is unreachable or changed its layout; try again later."
            }
            ConcallError::Download { .. } => {
                "The presentation host failed or the file is too large; try again later."
            }
            ConcallError::UnsupportedFormat { .. } => {
                "The presentation link does not point to a PDF or PowerPoint document."
            }
            ConcallError::AnalysisService { .. } => {
                "Check the API key and quota of the analysis provider."
            }
            ConcallError::AnalysisTimeout { .. } => {
                "The analysis service is slow; retry or raise --analysis-timeout."
            }
            ConcallError::MalformedResponse { .. } => {
                "The model ignored the requested section layout; retry later."
            }
            ConcallError::DeadlineExceeded { .. } => "Raise --deadline or retry later.",
            ConcallError::Internal(_) => "Unexpected local failure; see logs.",
        }
    }
}

/// A stage failure with the context the orchestrator adds.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed for {symbol}: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    pub symbol: String,
    #[source]
    pub source: ConcallError,
}

impl PipelineError {
    pub fn new(stage: Stage, symbol: impl Into<String>, source: ConcallError) -> Self {
        Self {
            stage,
            symbol: symbol.into(),
            source,
        }
    }

    /// The unmodified stage error.
    pub fn kind(&self) -> &ConcallError {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failure_transience() {
        assert!(FetchFailure::Network("reset".into()).is_transient());
        assert!(FetchFailure::Timeout { secs: 30 }.is_transient());
        assert!(FetchFailure::Status(503).is_transient());
        assert!(FetchFailure::Status(429).is_transient());
        assert!(!FetchFailure::Status(404).is_transient());
        assert!(!FetchFailure::Status(403).is_transient());
        assert!(!FetchFailure::LayoutChanged("no heading".into()).is_transient());
        assert!(!FetchFailure::TooLarge {
            limit_bytes: 10,
            observed_bytes: 20
        }
        .is_transient());
    }

    #[test]
    fn too_large_display() {
        let e = ConcallError::Download {
            url: "https://site/pres/q2.pdf".into(),
            failure: FetchFailure::TooLarge {
                limit_bytes: 25 * 1024 * 1024,
                observed_bytes: 60 * 1024 * 1024,
            },
        };
        let msg = e.to_string();
        assert!(msg.contains("q2.pdf"), "got: {msg}");
        assert!(msg.contains("26214400"), "got: {msg}");
    }

    #[test]
    fn pipeline_error_keeps_kind() {
        let e = PipelineError::new(
            Stage::Resolve,
            "BALKRISIND",
            ConcallError::NotFound {
                symbol: "BALKRISIND".into(),
                url: "https://site/company/BALKRISIND/".into(),
            },
        );
        assert!(matches!(e.kind(), ConcallError::NotFound { .. }));
        let msg = e.to_string();
        assert!(msg.contains("BALKRISIND"), "got: {msg}");
        assert!(msg.starts_with("resolve"), "got: {msg}");
    }

    #[test]
    fn analysis_errors_transience() {
        let limited = ConcallError::AnalysisService {
            provider: "gemini".into(),
            detail: "429".into(),
            transient: true,
        };
        let auth = ConcallError::AnalysisService {
            provider: "gemini".into(),
            detail: "401".into(),
            transient: false,
        };
        assert!(limited.is_transient());
        assert!(!auth.is_transient());
        assert!(ConcallError::AnalysisTimeout {
            provider: "gemini".into(),
            secs: 90
        }
        .is_transient());
        assert!(!ConcallError::MalformedResponse { detail: "x".into() }.is_transient());
    }

    #[test]
    fn hints_are_distinct_per_kind() {
        let config = ConcallError::Configuration { reason: "x".into() }.hint();
        let missing = ConcallError::NotFound {
            symbol: "A".into(),
            url: "u".into(),
        }
        .hint();
        let upstream = ConcallError::UpstreamUnavailable {
            url: "u".into(),
            failure: FetchFailure::Status(502),
        }
        .hint();
        assert_ne!(config, missing);
        assert_ne!(missing, upstream);
        assert_ne!(config, upstream);
    }
}
