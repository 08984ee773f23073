//! End-to-end tests against the live listing site and a real analysis API.
//!
//! Gated behind the `E2E_ENABLED` environment variable so they do not run in
//! CI unless explicitly requested. A Gemini key (`GEMINI_API_KEY`) or an
//! Anthropic key (`ANTHROPIC_API_KEY`) must also be present.
//!
//! Run with:
//!   E2E_ENABLED=1 GEMINI_API_KEY=... cargo test --test e2e -- --nocapture
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_resolve -- --nocapture

use concall_digest::pipeline::resolve::LinkResolver;
use concall_digest::{
    CompanyIdentifier, ConcallError, ConcallPipeline, PipelineConfig, RetryPolicy, Section, Stage,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_enabled {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
}

/// Skip unless E2E_ENABLED is set *and* an analysis credential is present.
macro_rules! e2e_skip_unless_ready {
    () => {{
        e2e_skip_unless_enabled!();
        match live_config() {
            Some(config) => config,
            None => {
                println!("SKIP — set GEMINI_API_KEY or ANTHROPIC_API_KEY");
                return;
            }
        }
    }};
}

fn live_config() -> Option<PipelineConfig> {
    let gemini = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
    let anthropic = std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty());
    if gemini.is_none() && anthropic.is_none() {
        return None;
    }

    let mut builder = PipelineConfig::builder().analysis_timeout_secs(180);
    if let Some(key) = gemini {
        builder = builder.api_key(key);
    }
    if let Some(key) = anthropic {
        builder = builder.alternate_api_key(key);
    }
    Some(builder.build().expect("live config should build"))
}

/// Assert the summary looks like a real model answer.
fn assert_summary_quality(pipeline_result: &concall_digest::AnalysisResult, context: &str) {
    let populated = Section::ALL
        .iter()
        .filter(|s| !pipeline_result.section(**s).is_empty())
        .count();
    assert!(
        populated >= 3,
        "[{context}] expected at least three populated sections, got {populated}"
    );

    for section in Section::ALL {
        for sentence in pipeline_result.section(section) {
            assert!(
                !sentence.trim().is_empty(),
                "[{context}] blank sentence in {}",
                section.title()
            );
            assert!(
                !sentence.starts_with('-') && !sentence.starts_with('*'),
                "[{context}] bullet marker left in {:?}",
                sentence
            );
        }
    }

    let md = pipeline_result.to_markdown();
    assert!(md.ends_with('\n'), "[{context}] markdown must end with a newline");
    println!(
        "[{context}] ✓  {} guidance, {} achievements, {} risks, {} focus",
        pipeline_result.guidance.len(),
        pipeline_result.achievements.len(),
        pipeline_result.risks.len(),
        pipeline_result.strategic_focus.len()
    );
}

// ── Resolve tests (no LLM) ───────────────────────────────────────────────────

#[tokio::test]
async fn test_resolve_large_cap() {
    e2e_skip_unless_enabled!();

    let resolver = LinkResolver::new(
        reqwest::Client::new(),
        concall_digest::config::DEFAULT_LISTING_BASE_URL,
        15,
        RetryPolicy::default(),
    );
    let id = CompanyIdentifier::parse("TCS").unwrap();
    let link = resolver.resolve(&id).await.expect("TCS should list presentations");

    assert!(link.url.starts_with("http"), "absolute URL expected: {}", link.url);
    println!("TCS latest presentation: {} ({})", link.url, link.display_label());
}

#[tokio::test]
async fn test_resolve_unknown_symbol() {
    e2e_skip_unless_enabled!();

    let resolver = LinkResolver::new(
        reqwest::Client::new(),
        concall_digest::config::DEFAULT_LISTING_BASE_URL,
        15,
        RetryPolicy::none(),
    );
    let id = CompanyIdentifier::parse("ZZZNOTAREALCO").unwrap();
    let err = resolver.resolve(&id).await.unwrap_err();
    assert!(
        matches!(
            err,
            ConcallError::UpstreamUnavailable { .. } | ConcallError::NotFound { .. }
        ),
        "unexpected error: {err}"
    );
}

// ── Full pipeline (live LLM) ─────────────────────────────────────────────────

#[tokio::test]
async fn test_analyse_balkrisind() {
    let config = e2e_skip_unless_ready!();
    let pipeline = ConcallPipeline::new(config).unwrap();

    let start = Instant::now();
    let result = pipeline
        .get_analysis("BALKRISIND")
        .await
        .expect("analysis should succeed");
    println!("First call took {:.1}s", start.elapsed().as_secs_f64());
    assert_summary_quality(&result, "BALKRISIND");

    // Second call for the same presentation must come from the cache.
    let start = Instant::now();
    let again = pipeline.get_analysis("balkrisind.ns").await.unwrap();
    assert!(Arc::ptr_eq(&result, &again));
    println!("Cached call took {:.1}s", start.elapsed().as_secs_f64());
}

#[tokio::test]
async fn test_concurrent_symbols() {
    let config = e2e_skip_unless_ready!();
    let pipeline = ConcallPipeline::new(config).unwrap();

    let symbols = ["INFY", "INFY", "HDFCBANK"];
    let results = futures::future::join_all(symbols.iter().map(|s| {
        let pipeline = pipeline.clone();
        async move { pipeline.get_analysis(s).await }
    }))
    .await;

    let infy_a = results[0].as_ref().expect("INFY should succeed");
    let infy_b = results[1].as_ref().expect("INFY should succeed");
    assert!(Arc::ptr_eq(infy_a, infy_b), "duplicate requests must coalesce");
    assert_summary_quality(infy_a, "INFY");

    match &results[2] {
        Ok(r) => assert_summary_quality(r, "HDFCBANK"),
        Err(e) => println!("HDFCBANK failed at {}: {}", e.stage, e.kind()),
    }
}

#[tokio::test]
async fn test_tight_deadline() {
    let config = e2e_skip_unless_ready!();
    let pipeline = ConcallPipeline::new(config).unwrap();

    let err = pipeline
        .get_analysis_with_deadline("RELIANCE", Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ConcallError::DeadlineExceeded { millis: 50 }));
    assert_ne!(err.stage, Stage::Validate);
    assert!(pipeline.cache().is_empty());
}
