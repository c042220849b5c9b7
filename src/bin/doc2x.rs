//! CLI binary for edgequake-doc2x.
//!
//! A thin shim over the library crate: resolves the API key and rate limit
//! (flags, environment, stored settings), discovers inputs, streams them
//! through the batch executor and writes each converted file as it lands.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_doc2x::settings::{default_rpm, mask_key};
use edgequake_doc2x::{
    discover, write_output, BatchConfig, BatchExecutor, BatchProgressCallback, BatchStats,
    CallError, ClientConfig, ConversionClient, FileKind, InputFile, ItemFailure, ItemOutcome,
    ItemSuccess, OutputFormat, ProgressCallback, ResultAggregate, Settings,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders a live progress bar plus one log line per finished file. Files
/// complete out of order, so lines are keyed by input index.
struct CliProgressCallback {
    bar: ProgressBar,
    names: Vec<String>,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new(names: Vec<String>) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = ProgressBar::new(names.len() as u64);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            names,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn name(&self, index: usize) -> &str {
        self.names.get(index).map(String::as_str).unwrap_or("?")
    }

    fn elapsed(&self, index: usize) -> String {
        let secs = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }

    /// Finish the bar and print the closing line.
    fn finish(&self, total: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(success_count);
        if failed == 0 {
            eprintln!(
                "{} {} files converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files converted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting conversion of {total} files…"))
        ));
    }

    fn on_item_start(&self, index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(self.name(index).to_string());
    }

    fn on_retry(&self, index: usize, attempt: u32, wait: Duration) {
        self.bar.println(format!(
            "  {} {}  attempt {} failed, retrying in {}",
            yellow("↻"),
            self.name(index),
            attempt,
            dim(&format!("{}s", wait.as_secs_f64())),
        ));
    }

    fn on_item_complete(&self, index: usize, _total: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            self.name(index),
            self.elapsed(index),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, index: usize, _total: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            let mut s: String = error.chars().take(79).collect();
            s.push('\u{2026}');
            s
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            self.name(index),
            red(&msg),
            self.elapsed(index),
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every PDF in a folder (key remembered from a previous --save)
  doc2x -p ./papers

  # Convert images with equation recognition, LaTeX output
  doc2x -i ./scans --equation -f latex -o ./tex

  # Store a key and its rate limit for later runs
  doc2x -k sk-xxxxxxxx -r 10 --save

  # Forget stored settings
  doc2x -c

  # Machine-readable report
  doc2x -p paper.pdf --json > report.json

RATE LIMITS:
  Every attempt, retries included, counts against the per-minute limit.
  Keys starting with sk- default to 10 requests/min, others to 4.

ENVIRONMENT VARIABLES:
  DOC2X_API_KEY         API key (overrides the stored one)
  DOC2X_ENDPOINT        Conversion endpoint URL
  DOC2X_SETTINGS_PATH   Settings file location
  RUST_LOG              Log filter (overrides -v / -q)
"#;

/// Batch-convert PDFs and images through a rate-limited conversion API.
#[derive(Parser, Debug)]
#[command(
    name = "doc2x",
    version,
    about = "Batch-convert PDFs and images through a rate-limited conversion API",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF/image file or folder to convert.
    input: Option<PathBuf>,

    /// API key. Falls back to the stored key.
    #[arg(short = 'k', long, env = "DOC2X_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Requests per minute. Falls back to the stored value, then 10 for sk- keys, else 4.
    #[arg(short, long, env = "DOC2X_RPM")]
    rpm: Option<u32>,

    /// Output folder.
    #[arg(short, long, env = "DOC2X_OUTPUT", default_value = "./Output")]
    output: PathBuf,

    /// Output format: md, md_dollar, latex, docx.
    #[arg(short, long, env = "DOC2X_FORMAT", default_value = "md_dollar")]
    format: OutputFormat,

    /// Treat input as images.
    #[arg(short, long, conflicts_with = "pdf")]
    image: bool,

    /// Treat input as PDFs.
    #[arg(short, long)]
    pdf: bool,

    /// Recognise images as equations (images only).
    #[arg(long)]
    equation: bool,

    /// Clear stored settings.
    #[arg(short, long)]
    clear: bool,

    /// Store the resolved key and rate limit after verifying the key.
    #[arg(long)]
    save: bool,

    /// Conversion endpoint URL.
    #[arg(long, env = "DOC2X_ENDPOINT")]
    endpoint: Option<String>,

    /// Attempts per file, first attempt included.
    #[arg(long, env = "DOC2X_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Backoff base (≥ 1, fractions allowed): wait base^k seconds after failed attempt k.
    #[arg(long, env = "DOC2X_BACKOFF_BASE", default_value_t = 2.0)]
    backoff_base: f64,

    /// Maximum files in flight (further capped by --rpm).
    #[arg(long, env = "DOC2X_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// HTTP request timeout in seconds.
    #[arg(long, env = "DOC2X_REQUEST_TIMEOUT", default_value_t = 120)]
    request_timeout: u64,

    /// Print a JSON report instead of the human summary.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOC2X_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

/// One written output, as reported by `--json`.
#[derive(Debug, Serialize)]
struct Written {
    input: String,
    output: PathBuf,
    bytes: usize,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    stats: BatchStats,
    outputs: Vec<&'a Written>,
    failures: &'a [ItemFailure],
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives all the feedback that matters, so library logs
    // drop to errors while it is shown.
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

    // ── Settings ─────────────────────────────────────────────────────────
    let settings_path = Settings::default_path().context("Failed to locate settings file")?;
    if cli.clear {
        Settings::clear(&settings_path).context("Failed to clear settings")?;
        if !cli.quiet {
            eprintln!("{} Cleared settings at {}", green("✔"), settings_path.display());
        }
        if cli.input.is_none() {
            return Ok(());
        }
    }
    let stored = Settings::load(&settings_path).context("Failed to load settings")?;

    let api_key = match cli.api_key.clone().or_else(|| stored.api_key.clone()) {
        Some(k) if !k.trim().is_empty() => k.trim().to_string(),
        _ => bail!("No API key: pass -k/--api-key, set DOC2X_API_KEY, or store one with --save"),
    };
    let rpm = cli
        .rpm
        .or(stored.rpm)
        .unwrap_or_else(|| default_rpm(&api_key));

    let Some(endpoint) = cli.endpoint.clone() else {
        bail!("No endpoint: pass --endpoint or set DOC2X_ENDPOINT");
    };

    let client = ConversionClient::new(ClientConfig {
        api_key: api_key.clone(),
        endpoint,
        request_timeout_secs: cli.request_timeout,
        output_format: cli.format,
        equation: cli.equation,
    })
    .context("Invalid client configuration")?;

    if cli.save {
        client
            .verify()
            .await
            .context("API key check failed; settings not saved")?;
        Settings {
            api_key: Some(api_key.clone()),
            rpm: Some(rpm),
        }
        .save(&settings_path)
        .context("Failed to save settings")?;
        if !cli.quiet {
            eprintln!(
                "{} Saved key {} ({} req/min) to {}",
                green("✔"),
                mask_key(&api_key),
                rpm,
                settings_path.display()
            );
        }
    }

    let Some(input) = cli.input.clone() else {
        if cli.save {
            return Ok(());
        }
        bail!("No input given");
    };

    // ── Inputs ───────────────────────────────────────────────────────────
    let kind = input_kind(cli.image, cli.pdf)?;
    if cli.equation && kind != FileKind::Image {
        tracing::warn!("--equation only applies to image input; ignoring");
    }
    let files = discover(&input, kind).context("Failed to collect input files")?;

    let config = BatchConfig::builder()
        .max_retries(cli.max_retries)
        .backoff_base(cli.backoff_base)
        .rate_limit_per_minute(rpm)
        .concurrency(cli.concurrency)
        .build()
        .context("Invalid configuration")?;

    if !cli.quiet && !cli.json {
        eprintln!(
            "{} {} {} file(s) → {}  {}",
            cyan("◆"),
            files.len(),
            kind,
            bold(&cli.output.display().to_string()),
            dim(&format!("key {} · {} req/min", mask_key(&api_key), rpm)),
        );
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let progress = show_progress
        .then(|| CliProgressCallback::new(files.iter().map(|f| f.to_string()).collect()));
    let mut executor = BatchExecutor::new(config);
    if let Some(ref cb) = progress {
        executor = executor.with_progress(Arc::clone(cb) as ProgressCallback);
    }

    let token = executor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} Interrupted; finishing in-flight requests…", yellow("⚠"));
            token.cancel();
        }
    });

    let client = Arc::new(client);
    let total = files.len();
    let mut outcomes = executor
        .run_stream(files, move |file: &InputFile| {
            let client = Arc::clone(&client);
            let file = file.clone();
            async move {
                let doc = client.convert(&file).await?;
                Ok::<_, CallError>((file, doc))
            }
        })
        .context("Failed to start batch")?;

    let mut collected = Vec::with_capacity(total);
    while let Some(outcome) = outcomes.next().await {
        let out_dir = cli.output.clone();
        let format = cli.format;
        let written = tokio::task::spawn_blocking(move || persist(outcome, &out_dir, format))
            .await
            .context("Output writer task failed")?;
        collected.push(written);
    }
    let aggregate = ResultAggregate::from_outcomes(collected);

    if let Some(ref cb) = progress {
        cb.finish(total, aggregate.successes().len());
    }

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        let report = Report {
            stats: aggregate.stats(),
            outputs: aggregate.successes().iter().map(|s| &s.value).collect(),
            failures: aggregate.failures(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_summary(&aggregate, show_progress);
    }

    if aggregate.had_failure() {
        std::process::exit(1);
    }
    Ok(())
}

/// `-i` or `-p`, exactly one.
fn input_kind(image: bool, pdf: bool) -> Result<FileKind> {
    match (image, pdf) {
        (true, false) => Ok(FileKind::Image),
        (false, true) => Ok(FileKind::Pdf),
        _ => bail!("Pass exactly one of -i/--image or -p/--pdf"),
    }
}

/// Write a successful conversion to disk. Blocking; run it off the runtime. A write failure turns the item into
/// a failure record so it shows up in the report.
fn persist(
    outcome: ItemOutcome<(InputFile, edgequake_doc2x::ConvertedDocument)>,
    out_dir: &Path,
    format: OutputFormat,
) -> ItemOutcome<Written> {
    match outcome {
        ItemOutcome::Success(ok) => {
            let (file, doc) = ok.value;
            let path = file.output_path(out_dir, format);
            match write_output(&path, &doc.content) {
                Ok(()) => ItemOutcome::Success(ItemSuccess {
                    index: ok.index,
                    id: ok.id,
                    value: Written {
                        input: file.to_string(),
                        output: path,
                        bytes: doc.size,
                    },
                    attempts: ok.attempts,
                }),
                Err(e) => {
                    tracing::error!("{}", e);
                    ItemOutcome::Failure(ItemFailure {
                        index: ok.index,
                        id: ok.id,
                        error: CallError::Io(e.to_string()),
                        attempts: ok.attempts,
                    })
                }
            }
        }
        ItemOutcome::Failure(f) => ItemOutcome::Failure(f),
    }
}

fn print_summary(aggregate: &ResultAggregate<Written>, progress_shown: bool) {
    let stats = aggregate.stats();
    if !progress_shown {
        eprintln!(
            "Converted {}/{} files ({} attempts)",
            stats.succeeded, stats.total_items, stats.total_attempts
        );
    }
    for ok in aggregate.successes() {
        eprintln!(
            "  {} {} → {}  {}",
            green("✓"),
            ok.value.input,
            ok.value.output.display(),
            dim(&format!("{} bytes", ok.value.bytes)),
        );
    }
    if aggregate.had_failure() {
        eprintln!("{}", bold("Failed:"));
        for failed in aggregate.failures() {
            eprintln!(
                "  {} {}  {}  {}",
                red("✗"),
                failed.id,
                failed.description(),
                dim(&format!("after {} attempt(s)", failed.attempts)),
            );
        }
        if stats.rate_limited > 0 {
            eprintln!(
                "  {}",
                dim(&format!(
                    "{} file(s) were still rate limited; try a lower --rpm",
                    stats.rate_limited
                ))
            );
        }
    }
}
