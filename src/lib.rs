//! # concall-digest
//!
//! Summarise the latest earnings-call (concall) presentation of an Indian
//! listed company with a document-analysis LLM.
//!
//! ## Why this crate?
//!
//! Quarterly presentations are long slide decks. Reading one to learn what
//! management expects, what went well, what could go wrong and where the
//! company is heading takes time. This crate finds the most recent deck on
//! the company's listing page, hands the document to an LLM with a fixed
//! four-section prompt, and returns the answer as structured data.
//!
//! ## Pipeline Overview
//!
//! ```text
//! symbol
//!  │
//!  ├─ 1. Validate   normalise identifier, check credentials (no network)
//!  ├─ 2. Resolve    listing page → first presentation link
//!  ├─ 3. Cache      (symbol, link) already analysed? return it
//!  ├─ 4. Fetch      stream the deck into a temp file (size/format checks)
//!  ├─ 5. Analyze    Gemini Files API or any edgequake-llm provider
//!  └─ 6. Normalize  raw text → guidance / achievements / risks / focus
//! ```
//!
//! Concurrent requests for the same presentation share one download and one
//! analysis.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use concall_digest::{ConcallPipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .api_key(std::env::var("GEMINI_API_KEY")?)
//!         .build()?;
//!     let pipeline = ConcallPipeline::new(config)?;
//!
//!     let summary = pipeline.get_analysis("BALKRISIND").await?;
//!     for sentence in &summary.guidance {
//!         println!("- {sentence}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `concall` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! concall-digest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
mod coalesce;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::AnalysisCache;
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{ConcallError, FetchFailure, PipelineError};
pub use orchestrator::ConcallPipeline;
pub use output::{AnalysisResult, Section};
pub use pipeline::analyze::AnalysisService;
pub use pipeline::retry::RetryPolicy;
pub use progress::{NoopObserver, PipelineObserver, SharedObserver, Stage};
pub use types::{Artifact, CompanyIdentifier, PresentationLink};
