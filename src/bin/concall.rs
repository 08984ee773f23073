//! CLI binary for concall-digest.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs every requested symbol through one shared
//! pipeline and prints the summaries.

use anyhow::{Context, Result};
use clap::Parser;
use concall_digest::{
    AnalysisResult, ConcallPipeline, PipelineConfig, PipelineError, PipelineObserver, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Stage spinner using indicatif ────────────────────────────────────────────

/// Renders one spinner for the whole run and a log line per finished stage.
/// Stage events from concurrent symbols interleave freely.
struct CliObserver {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliObserver {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Analysing");
        bar.set_message("starting…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failures: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_stage_start(&self, symbol: &str, stage: Stage) {
        let doing = match stage {
            Stage::Validate => "checking",
            Stage::Resolve => "finding latest presentation",
            Stage::Fetch => "downloading",
            Stage::Analyze => "analysing (10–30s)",
            Stage::Normalize => "parsing response",
        };
        self.bar.set_message(format!("{symbol}: {doing}"));
    }

    fn on_stage_complete(&self, symbol: &str, stage: Stage, elapsed_ms: u64) {
        if stage == Stage::Validate {
            return;
        }
        self.bar.println(format!(
            "  {} {:<12} {:<10} {}",
            green("✓"),
            symbol,
            stage.to_string(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_cache_hit(&self, symbol: &str, _url: &str) {
        self.bar
            .println(format!("  {} {:<12} {}", cyan("◆"), symbol, dim("cached")));
    }

    fn on_coalesced(&self, symbol: &str, _url: &str) {
        self.bar.println(format!(
            "  {} {:<12} {}",
            cyan("◆"),
            symbol,
            dim("joined running analysis")
        ));
    }

    fn on_failure(&self, symbol: &str, stage: Stage, error: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<12} {:<10} {}",
            red("✗"),
            symbol,
            stage.to_string(),
            red(&msg)
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Summarise the latest presentation (Markdown on stdout)
  concall BALKRISIND

  # Several companies at once; Yahoo-style suffixes are accepted
  concall TATASTEEL.NS INFY HDFCBANK

  # JSON output, give up after two minutes
  concall --json --deadline 120 BALKRISIND > summary.json

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY              Google Gemini API key (primary analysis service)
  CONCALL_ALTERNATE_API_KEY   Alternate provider key, used when no Gemini key is set
  ANTHROPIC_API_KEY           Fallback alternate key for --alternate-provider anthropic
  OPENAI_API_KEY              Fallback alternate key for --alternate-provider openai
  OPENROUTER_API_KEY          Fallback alternate key for --alternate-provider openrouter
  RUST_LOG                    Log filter, overrides --verbose/--quiet
"#;

#[derive(Parser, Debug)]
#[command(
    name = "concall",
    version,
    about = "Summarise the latest concall presentation of Indian listed companies",
    long_about = "Finds the most recent earnings-call presentation on the company's listing page, \
has a document-analysis LLM read it, and prints four sections: future guidance, key achievements, \
risks, and strategic focus.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// NSE/BSE ticker symbols, e.g. BALKRISIND or TATASTEEL.NS.
    #[arg(required = true)]
    symbols: Vec<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Key for the alternate provider. Falls back to the provider's own
    /// variable, e.g. ANTHROPIC_API_KEY.
    #[arg(long, env = "CONCALL_ALTERNATE_API_KEY", hide_env_values = true)]
    alternate_api_key: Option<String>,

    /// Gemini model.
    #[arg(long, env = "CONCALL_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider used with the alternate key.
    #[arg(
        long,
        env = "CONCALL_ALTERNATE_PROVIDER",
        default_value = "anthropic",
        value_parser = ["anthropic", "openai", "openrouter"]
    )]
    alternate_provider: String,

    #[arg(long, env = "CONCALL_ALTERNATE_MODEL")]
    alternate_model: Option<String>,

    #[arg(long, env = "CONCALL_LISTING_URL")]
    listing_base_url: Option<String>,

    #[arg(long, env = "CONCALL_MAX_ARTIFACT_MB", default_value_t = 25,
          value_parser = clap::value_parser!(u64).range(1..=500))]
    max_artifact_mb: u64,

    #[arg(long, env = "CONCALL_LISTING_TIMEOUT", default_value_t = 10)]
    listing_timeout: u64,

    #[arg(long, env = "CONCALL_DOWNLOAD_TIMEOUT", default_value_t = 30)]
    download_timeout: u64,

    #[arg(long, env = "CONCALL_ANALYSIS_TIMEOUT", default_value_t = 90)]
    analysis_timeout: u64,

    /// Overall deadline per symbol in seconds.
    #[arg(long, env = "CONCALL_DEADLINE")]
    deadline: Option<u64>,

    #[arg(long, env = "CONCALL_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    #[arg(long, env = "CONCALL_JSON")]
    json: bool,

    #[arg(long, env = "CONCALL_NO_PROGRESS")]
    no_progress: bool,

    #[arg(short, long, env = "CONCALL_VERBOSE")]
    verbose: bool,

    #[arg(short, long, env = "CONCALL_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs; --verbose brings everything back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build pipeline ───────────────────────────────────────────────────
    let observer = show_progress.then(|| CliObserver::new(cli.symbols.len()));
    let config = build_config(&cli, observer.clone())?;
    let pipeline = ConcallPipeline::new(config).context("Failed to set up the pipeline")?;

    // ── Run every symbol concurrently ────────────────────────────────────
    // Duplicates share one analysis through the pipeline's coalescing.
    let deadline = cli.deadline.map(Duration::from_secs);
    let runs = cli.symbols.iter().map(|symbol| {
        let pipeline = pipeline.clone();
        async move {
            let outcome = match deadline {
                Some(d) => pipeline.get_analysis_with_deadline(symbol, d).await,
                None => pipeline.get_analysis(symbol).await,
            };
            (symbol.as_str(), outcome)
        }
    });
    let outcomes = futures::future::join_all(runs).await;

    if let Some(ref obs) = observer {
        obs.finish();
    }

    // ── Report ───────────────────────────────────────────────────────────
    let failed = outcomes.iter().filter(|(_, o)| o.is_err()).count();
    if cli.json {
        print_json(&outcomes)?;
    } else {
        print_markdown(&outcomes)?;
    }

    for (symbol, outcome) in &outcomes {
        if let Err(e) = outcome {
            report_failure(symbol, e);
        }
    }

    if !cli.quiet {
        let ok = outcomes.len() - failed;
        eprintln!(
            "{} {}/{} companies summarised",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&ok.to_string()),
            outcomes.len()
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} companies failed", outcomes.len());
    }
    Ok(())
}

fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .max_artifact_mb(cli.max_artifact_mb)
        .listing_timeout_secs(cli.listing_timeout)
        .download_timeout_secs(cli.download_timeout)
        .analysis_timeout_secs(cli.analysis_timeout)
        .temperature(cli.temperature)
        .alternate_provider(cli.alternate_provider.clone());

    if let Some(ref key) = cli.gemini_api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(key) = alternate_key(cli) {
        builder = builder.alternate_api_key(key);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref model) = cli.alternate_model {
        builder = builder.alternate_model(model.clone());
    }
    if let Some(ref url) = cli.listing_base_url {
        builder = builder.listing_base_url(url.clone());
    }
    if let Some(obs) = observer {
        builder = builder.observer(obs as Arc<dyn PipelineObserver>);
    }

    builder.build().context("Invalid configuration")
}

/// The explicit alternate key, else the selected provider's own variable.
fn alternate_key(cli: &Cli) -> Option<String> {
    cli.alternate_api_key.clone().or_else(|| {
        let var = match cli.alternate_provider.as_str() {
            "openai" => "OPENAI_API_KEY",
            "openrouter" => "OPENROUTER_API_KEY",
            _ => "ANTHROPIC_API_KEY",
        };
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    })
}

fn print_markdown(outcomes: &[(&str, Result<Arc<AnalysisResult>, PipelineError>)]) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for (symbol, outcome) in outcomes {
        if let Ok(result) = outcome {
            writeln!(handle, "<!-- {symbol} -->").context("Failed to write to stdout")?;
            handle
                .write_all(result.to_markdown().as_bytes())
                .context("Failed to write to stdout")?;
            writeln!(handle).context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

fn print_json(outcomes: &[(&str, Result<Arc<AnalysisResult>, PipelineError>)]) -> Result<()> {
    let items: Vec<serde_json::Value> = outcomes
        .iter()
        .map(|(symbol, outcome)| match outcome {
            Ok(result) => serde_json::json!({ "symbol": symbol, "summary": result.as_ref() }),
            Err(e) => serde_json::json!({
                "symbol": symbol,
                "error": {
                    "stage": e.stage,
                    "message": e.to_string(),
                    "hint": e.kind().hint(),
                    "transient": e.kind().is_transient(),
                }
            }),
        })
        .collect();
    let json = serde_json::to_string_pretty(&items).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

fn report_failure(symbol: &str, error: &PipelineError) {
    eprintln!("{} {}: {}", red("✗"), bold(symbol), error);
    eprintln!("  {} {}", dim("hint:"), error.kind().hint());
}
