//! Pipeline stages for concall presentation analysis.
//!
//! Each submodule implements one step and is independently testable; the
//! orchestrator in [`crate::orchestrator`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! resolve ──▶ fetch ──▶ analyze ──▶ normalize
//! (listing)   (spool)   (LLM)       (sections)
//! ```
//!
//! 1. [`resolve`]   — find the most recent presentation link on the listing page
//! 2. [`fetch`]     — stream the artifact into a temporary file with size and
//!    format checks
//! 3. [`analyze`]   — prompt a document-analysis service about the artifact;
//!    [`gemini`] and [`provider`] are the two service implementations
//! 4. [`normalize`] — parse the raw response into the four-section summary
//!
//! [`retry`] holds the backoff policy shared by the network stages.

pub mod analyze;
pub mod fetch;
pub mod gemini;
pub mod normalize;
pub mod provider;
pub mod resolve;
pub mod retry;
