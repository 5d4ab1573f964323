//! CLI binary for edgequake-doc2json.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doc2json::{
    resolve_client, BatchOrchestrator, ConversionConfig, ConversionProgressCallback,
    ConversionResult, Document, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the batch, one log line per finished file.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.reset_eta();
    }

    fn on_file_start(&self, index: usize, _total: usize, filename: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(filename.to_string());
    }

    fn on_file_retry(&self, index: usize, attempt: u32, error: &str) {
        self.bar.println(format!(
            "  {} File {:>3}  attempt {} failed: {}",
            yellow("↻"),
            index,
            attempt,
            dim(&shorten(error, 80)),
        ));
    }

    fn on_file_complete(&self, index: usize, total: usize, filename: &str) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} File {:>3}/{:<3}  {}  {}",
            green("✓"),
            index,
            total,
            filename,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, index: usize, total: usize, filename: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} File {:>3}/{:<3}  {}  {}  {}",
            red("✗"),
            index,
            total,
            filename,
            red(&shorten(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_files: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = total_files.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!(
                "{} {} files converted successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files converted  ({} failed)",
                if succeeded == 0 { red("✘") } else { yellow("⚠") },
                bold(&succeeded.to_string()),
                total_files,
                red(&failed.to_string()),
            );
        }
    }
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One file, subject JSON on stdout
  doc2json biology_unit_3.pptx

  # Write to a file
  doc2json lecture.pdf -o lecture.json

  # Several files: batch result with per-file status and a summary
  doc2json week1.docx week2.pdf week3.ppt -o course.json

  # Use a specific model and a bigger output budget
  doc2json --provider anthropic --model claude-sonnet-4-20250514 \
           --max-output-tokens 12000 textbook.pdf

SUPPORTED FORMATS:
  .pdf  .doc  .docx  .ppt  .pptx

OUTPUT:
  Single input    {"<Subject>": {"title", "description", "chapters": [...]}}
  Several inputs  {"results": [...], "summary": {"total_files", "successful", "failed"}}

EXIT STATUS:
  0  every file converted
  1  at least one file failed (its error is in the output)
  2  invalid arguments or configuration

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter (overrides --verbose / --quiet)
"#;

/// Convert educational documents into structured subject/chapter/topic JSON.
#[derive(Parser, Debug)]
#[command(
    name = "doc2json",
    version,
    about = "Convert educational documents into structured subject/chapter/topic JSON",
    long_about = "Extract the text of PDF, DOC, DOCX, PPT and PPTX files and ask an LLM to \
organise it as one subject with chapters and topics. Supports OpenAI, Anthropic, Google \
Gemini, Azure OpenAI, and any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input documents (.pdf, .doc, .docx, .ppt, .pptx).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "DOC2JSON_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4o-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOC2JSON_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Path to a text file with extra guidance for the model.
    #[arg(long, env = "DOC2JSON_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Model context window in tokens.
    #[arg(long, env = "DOC2JSON_CONTEXT_WINDOW", default_value_t = 128_000)]
    context_window: usize,

    /// Fixed output budget in tokens (skips size-based tiers).
    #[arg(long, env = "MAX_OUTPUT_TOKENS")]
    max_output_tokens: Option<usize>,

    /// Output budget range in tokens; size tiers pick within it.
    #[arg(long, env = "DOC2JSON_OUTPUT_TOKENS", value_name = "FLOOR:CEILING",
          value_parser = parse_pair)]
    output_tokens_range: Option<(usize, usize)>,

    /// Extracted-text lengths (chars) above which a document is medium / large.
    /// Lower these together with --context-window for small models.
    #[arg(long, env = "DOC2JSON_SIZE_TIERS", value_name = "MEDIUM:LARGE",
          value_parser = parse_pair)]
    size_tiers: Option<(usize, usize)>,

    /// Files with less extracted text than this are rejected.
    #[arg(long, env = "DOC2JSON_MIN_TEXT_CHARS", default_value_t = 50)]
    min_text_chars: usize,

    /// Model calls per file, including the first.
    #[arg(long, env = "DOC2JSON_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..=10))]
    max_attempts: u32,

    /// Base delay between attempts in milliseconds (doubles each retry).
    #[arg(long, env = "DOC2JSON_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Longest wait between attempts in milliseconds, retry-after hints included.
    #[arg(long, env = "DOC2JSON_MAX_RETRY_DELAY_MS", default_value_t = 60_000)]
    max_retry_delay_ms: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "DOC2JSON_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Combined input size limit in MiB.
    #[arg(long, env = "MAX_FILE_SIZE_MB", default_value_t = 200)]
    max_upload_mb: u64,

    /// Maximum number of files per run (0 = unlimited).
    #[arg(long, env = "MAX_FILES_PER_REQUEST", default_value_t = 0)]
    max_files: usize,

    /// Emit compact JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOC2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOC2JSON_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {e:#}", red("error:"));
            std::process::exit(2);
        }
    }
}

fn init_logging(cli: &Cli) {
    // The progress bar is the feedback channel; keep library logs out of its way.
    let show_progress = !cli.quiet && !cli.no_progress;
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
}

/// Returns `Ok(true)` when every file converted.
async fn run(cli: Cli) -> Result<bool> {
    let progress: Option<ProgressCallback> = if !cli.quiet && !cli.no_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress).await?;
    let client = resolve_client(&config).context("No LLM provider available")?;

    let mut documents = Vec::with_capacity(cli.inputs.len());
    for path in &cli.inputs {
        documents.push(read_document(path).await?);
    }

    let cancel = CancellationToken::new();
    let orchestrator = BatchOrchestrator::new(config, client).with_cancellation(cancel.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", yellow("Interrupted: finishing the current file, skipping the rest"));
            cancel.cancel();
        }
    });

    // ── Single file: subject JSON or the error record ────────────────────
    if documents.len() == 1 {
        let result = orchestrator
            .run(documents)
            .await
            .context("Conversion failed")?
            .results
            .into_iter()
            .next()
            .map(|o| o.result)
            .context("Batch returned no result")?;
        let ok = result.is_success();
        let json = match &result {
            ConversionResult::Success { data, .. } => to_json(data, cli.compact)?,
            ConversionResult::Failure { .. } => to_json(&result, cli.compact)?,
        };
        if let Some(err) = result.error() {
            eprintln!("{} {}", red("✘"), err);
        }
        emit(&json, cli.output.as_deref()).await?;
        return Ok(ok);
    }

    // ── Several files: full batch result ────────────────────────────────
    let batch = orchestrator.run(documents).await.context("Conversion failed")?;
    emit(&to_json(&batch, cli.compact)?, cli.output.as_deref()).await?;
    Ok(batch.summary.failed == 0)
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .context_window_tokens(cli.context_window)
        .min_text_chars(cli.min_text_chars)
        .max_attempts(cli.max_attempts)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .max_retry_delay_ms(cli.max_retry_delay_ms)
        .max_combined_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024))
        .max_files_per_batch(cli.max_files);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(n) = cli.max_output_tokens {
        builder = builder.output_tokens_override(n);
    }
    if let Some((floor, ceiling)) = cli.output_tokens_range {
        builder = builder.output_tokens_range(floor, ceiling);
    }
    if let Some((medium, large)) = cli.size_tiers {
        builder = builder.document_size_tiers(medium, large);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `A:B` into two numbers.
fn parse_pair(s: &str) -> std::result::Result<(usize, usize), String> {
    let (a, b) = s
        .split_once(':')
        .ok_or_else(|| format!("expected two numbers as A:B, got {s:?}"))?;
    let number = |v: &str| v.trim().parse::<usize>().map_err(|e| format!("{v:?}: {e}"));
    Ok((number(a)?, number(b)?))
}

async fn read_document(path: &Path) -> Result<Document> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Document::new(filename, bytes))
}

fn to_json<T: serde::Serialize>(value: &T, compact: bool) -> Result<String> {
    let json = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    json.context("Failed to serialise output")
}

async fn emit(json: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            tokio::fs::write(path, format!("{json}\n"))
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("→  {}", bold(&path.display().to_string()));
        }
        None => println!("{json}"),
    }
    Ok(())
}
