//! CLI binary for ocrbatch.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`,
//! loads service credentials from the environment and prints results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use ocrbatch::config::resolve_max_workers;
use ocrbatch::pipeline::chat::resolve_image_ref;
use ocrbatch::{
    chat_batch, extract_to_file, invoke_stream, BatchConfig, BatchInvoker, BatchProgressCallback,
    ChatClient, ChatConfig, ChatPrompt, OcrClient, OcrConfig, ProgressCallback, Request,
    RequestResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
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

/// Terminal progress callback: a live progress bar plus one log line per
/// finished request. Requests complete out of order when `--workers > 1`,
/// so start times are tracked per batch index.
struct CliProgressCallback {
    bar: ProgressBar,
    /// "pages" or "prompts", shown next to the counter.
    unit: &'static str,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner-only until `on_batch_start` tells us the total.
    fn new_dynamic(unit: &'static str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            unit,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    /// Switch to the full bar style for a batch of `total` requests.
    fn activate_bar(&self, total: usize) {
        let template = format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  \
             [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {}  \
             ⏱ {{elapsed_precise}}  ETA {{eta_precise}}",
            self.unit
        );
        let progress_style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Running");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting batch of {total} {}…", self.unit))
        ));
    }

    fn on_request_start(&self, index: usize, id: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(id.to_string());
    }

    fn on_retry(&self, _index: usize, id: &str, attempt: u32, delay: Duration) {
        self.bar.println(format!(
            "  {} {}  attempt {} failed, retrying in {}",
            yellow("↻"),
            id,
            attempt,
            dim(&format!("{:.1}s", delay.as_secs_f64())),
        ));
    }

    fn on_request_complete(&self, index: usize, id: &str) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:<24}  {}",
            green("✓"),
            id,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_request_error(&self, index: usize, id: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<24}  {}  {}",
            red("✗"),
            id,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let failed = total.saturating_sub(succeeded);
        if failed == 0 {
            self.bar.println(format!(
                "{} {} {} succeeded",
                green("✔"),
                bold(&succeeded.to_string()),
                self.unit
            ));
        } else {
            self.bar.println(format!(
                "{} {}/{} {} succeeded  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total,
                self.unit,
                red(&failed.to_string()),
            ));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR every document folder under ./pages, 4 pages at a time
  ocrbatch ocr ./pages -o ./out --workers 4

  # Exponential backoff, up to 5 attempts per page
  ocrbatch ocr ./pages -o ./out --max-attempts 5 --backoff-secs 2 --exponential

  # Run a prompt file, results in prompt order
  ocrbatch chat prompts.jsonl -o results.jsonl

  # Results as soon as each prompt finishes
  ocrbatch chat prompts.jsonl --unordered

  # Stream the reply to a single prompt
  ocrbatch chat one.jsonl --stream

INPUT LAYOUT (ocr):
  INPUT_DIR/<document>/page_1.png, page_2.png, …   (PNG or JPEG)

PROMPT FILE (chat):
  One JSON object per line: {"id": "q1", "text": "…", "image_url": "…"}
  `id` and `image_url` are optional. `image_url` may be an http(s)/data URL
  or a local PNG/JPEG path.

ENVIRONMENT VARIABLES:
  VOLC_ACCESS_KEY / VOLC_SECRET_KEY   OCR credentials (required for `ocr`)
  VOLC_SESSION_TOKEN                  Optional STS token
  OCR_ENDPOINT, OCR_REGION, OCR_SERVICE  OCR endpoint overrides
  OCR_IMAGE_MODE                      base64 (default) or image_url
  OCR_IMAGE_URL_PREFIX                Prefix for image_url mode
  OCR_MAX_WORKERS                     Default for --workers (2)
  ARK_API_KEY                         Chat API key (required for `chat`)
  ARK_BASE_URL, ARK_MODEL             Chat endpoint overrides
  ARK_REASONING_EFFORT                minimal, low, medium (default), high
  RUST_LOG                            Log filter (overrides --verbose/--quiet)

  Variables are also read from ./.env and from --env-file.
"#;

/// Run OCR and chat requests in bounded, retrying batches.
#[derive(Parser, Debug)]
#[command(
    name = "ocrbatch",
    version,
    about = "Run OCR and chat requests in bounded, retrying batches",
    long_about = "Send many independent OCR or chat requests with at most N in flight, \
retry failures with fixed or exponential backoff, and collect results in input order.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Concurrent requests (default: OCR_MAX_WORKERS or 2).
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Attempts per request, including the first.
    #[arg(long, global = true, default_value_t = 3)]
    max_attempts: u32,

    /// Delay after a failed attempt, in seconds.
    #[arg(long, global = true, default_value_t = 1.0)]
    backoff_secs: f64,

    /// Double the delay after each failed attempt.
    #[arg(long, global = true)]
    exponential: bool,

    /// Upper bound for exponential delays, in seconds.
    #[arg(long, global = true, default_value_t = 60)]
    max_backoff_secs: u64,

    /// Extra dotenv file to load before reading credentials.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, global = true)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// OCR every document folder under INPUT_DIR.
    Ocr {
        /// Directory holding one folder of page images per document.
        input_dir: PathBuf,

        /// Directory for per-document page texts.
        #[arg(short, long)]
        output: PathBuf,

        /// Combined text file (default: OUTPUT/combined.txt).
        #[arg(long)]
        combined: Option<PathBuf>,

        /// Print a JSON summary of every document to stdout.
        #[arg(long)]
        json: bool,
    },
    /// Send every prompt in a JSONL file to the chat endpoint.
    Chat {
        /// Prompt file, one JSON object per line.
        prompts: PathBuf,

        /// Write JSONL results here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit results as they complete instead of in prompt order.
        #[arg(long, conflicts_with = "stream")]
        unordered: bool,

        /// Stream the reply to a single prompt as it is generated.
        #[arg(long)]
        stream: bool,
    },
}

/// One line of the prompt file.
#[derive(Debug, Deserialize)]
struct PromptLine {
    #[serde(default)]
    id: Option<String>,
    #[serde(flatten)]
    prompt: ChatPrompt,
}

/// One line of chat output.
#[derive(Debug, Serialize)]
struct ResultLine<'a> {
    id: &'a str,
    index: usize,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    attempts: u32,
    duration_ms: u64,
}

impl<'a> From<&'a RequestResult<String>> for ResultLine<'a> {
    fn from(r: &'a RequestResult<String>) -> Self {
        Self {
            id: &r.id,
            index: r.index,
            ok: r.is_success(),
            response: r.response().map(String::as_str),
            error: r.error().map(|e| e.to_string()),
            attempts: r.attempts,
            duration_ms: r.duration_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ./.env first; explicit --env-file values override it below.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let common = &cli.common;

    if let Some(ref path) = common.env_file {
        dotenvy::from_path_override(path)
            .with_context(|| format!("Failed to load env file {}", path.display()))?;
    }

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let json_out = matches!(cli.command, Command::Ocr { json: true, .. });
    let show_progress = !common.quiet && !common.no_progress && !json_out;
    let filter = if common.verbose {
        "debug"
    } else if common.quiet || show_progress {
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

    let unit = match cli.command {
        Command::Ocr { .. } => "pages",
        Command::Chat { .. } => "prompts",
    };
    let progress = if show_progress {
        Some(CliProgressCallback::new_dynamic(unit))
    } else {
        None
    };
    let config = build_config(
        common,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn BatchProgressCallback>),
    )?;

    let result = match &cli.command {
        Command::Ocr {
            input_dir,
            output,
            combined,
            json,
        } => {
            let combined = combined
                .clone()
                .unwrap_or_else(|| output.join("combined.txt"));
            run_ocr(input_dir, output, &combined, *json, common.quiet, config).await
        }
        Command::Chat {
            prompts,
            output,
            unordered,
            stream,
        } => run_chat(prompts, output.as_deref(), *unordered, *stream, config).await,
    };

    if let Some(cb) = progress {
        cb.finish();
    }
    result
}

/// Map CLI args to `BatchConfig`.
fn build_config(common: &CommonArgs, progress: Option<ProgressCallback>) -> Result<BatchConfig> {
    let workers = common.workers.unwrap_or_else(resolve_max_workers);
    let mut builder = BatchConfig::builder()
        .max_workers(workers)
        .max_attempts(common.max_attempts)
        .backoff_secs(common.backoff_secs)
        .exponential(common.exponential)
        .max_backoff(Duration::from_secs(common.max_backoff_secs));

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn run_ocr(
    input_dir: &Path,
    out_dir: &Path,
    combined: &Path,
    json: bool,
    quiet: bool,
    config: BatchConfig,
) -> Result<()> {
    let ocr_config = OcrConfig::from_env().context("OCR is not configured")?;
    let client = OcrClient::new(ocr_config)?;
    let invoker = BatchInvoker::new(config);

    let output = extract_to_file(input_dir, out_dir, combined, &client, &invoker)
        .await
        .context("OCR batch failed")?;

    if json {
        let summary =
            serde_json::to_string_pretty(&output.documents).context("Failed to serialise output")?;
        println!("{summary}");
    }

    if !quiet {
        let failed = output.failed_pages();
        eprintln!(
            "{}  {}/{} pages  {} documents  {}ms  →  {}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            output.total_pages() - failed,
            output.total_pages(),
            output.documents.len(),
            output.total_duration_ms,
            bold(&combined.display().to_string()),
        );
        for doc in &output.documents {
            eprintln!(
                "   {}  {}  {}",
                doc.name,
                dim(doc.language.code()),
                dim(&format!("{} pages, {} failed", doc.pages.len(), doc.failures.len())),
            );
        }
    }
    Ok(())
}

async fn run_chat(
    prompts_path: &Path,
    output: Option<&Path>,
    unordered: bool,
    stream: bool,
    config: BatchConfig,
) -> Result<()> {
    let prompts = read_prompts(prompts_path).await?;
    let client = ChatClient::new(ChatConfig::from_env().context("Chat is not configured")?)?;

    if stream {
        if prompts.len() != 1 {
            bail!("--stream takes exactly one prompt, got {}", prompts.len());
        }
        return stream_one(prompts, client, config).await;
    }

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(io::BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    if unordered {
        let client = Arc::new(client);
        let mut results = invoke_stream(
            prompts,
            move |request: &Request<ChatPrompt>| {
                let client = Arc::clone(&client);
                let messages = request.payload.messages();
                async move { client.complete(&messages).await }
            },
            &config,
        );
        while let Some(result) = results.next().await {
            write_result(&mut out, &result)?;
        }
    } else {
        let invoker = BatchInvoker::new(config);
        let batch = chat_batch(prompts, &client, &invoker).await;
        for result in &batch.results {
            write_result(&mut out, result)?;
        }
    }

    out.flush().context("Failed to flush output")?;
    Ok(())
}

/// Open the stream (with retries) and print deltas as they arrive.
async fn stream_one(
    prompts: Vec<Request<ChatPrompt>>,
    client: ChatClient,
    config: BatchConfig,
) -> Result<()> {
    let invoker = BatchInvoker::new(config);
    let client = &client;
    let mut batch = invoker
        .invoke_all(prompts, |request| {
            let messages = request.payload.messages();
            async move { client.complete_stream(&messages).await }
        })
        .await;

    let Some(result) = batch.results.pop() else {
        bail!("no prompt to stream");
    };
    let mut deltas = result.outcome.context("Failed to open chat stream")?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    while let Some(delta) = deltas.next().await {
        let text = delta.context("Chat stream failed")?;
        handle
            .write_all(text.as_bytes())
            .context("Failed to write to stdout")?;
        handle.flush().ok();
    }
    handle.write_all(b"\n").ok();
    Ok(())
}

/// Parse the prompt file. Blank lines are skipped; missing ids become the
/// 1-based line number.
async fn read_prompts(path: &Path) -> Result<Vec<Request<ChatPrompt>>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read prompts from {}", path.display()))?;

    let mut prompts = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: PromptLine = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid prompt line", path.display(), i + 1))?;
        let mut prompt = parsed.prompt;
        if let Some(ref image) = prompt.image_url {
            prompt.image_url = Some(
                resolve_image_ref(image)
                    .with_context(|| format!("{}:{}: bad image", path.display(), i + 1))?,
            );
        }
        let id = parsed.id.unwrap_or_else(|| (i + 1).to_string());
        prompts.push(Request::new(id, prompt));
    }

    if prompts.is_empty() {
        bail!("{} contains no prompts", path.display());
    }
    Ok(prompts)
}

fn write_result(out: &mut dyn Write, result: &RequestResult<String>) -> Result<()> {
    let line = serde_json::to_string(&ResultLine::from(result)).context("Failed to serialise result")?;
    writeln!(out, "{line}").context("Failed to write result")
}
