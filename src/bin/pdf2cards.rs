//! CLI binary for edgequake-pdf2cards.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `StudySetConfig`, renders progress and prints a run summary.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2cards::{
    BatchStatus, PollPolicy, ProcessingMode, ProgressCallback, RunSummary, StudySetConfig, StudySetCreator,
    StudySetProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
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

/// Terminal progress: a chunk bar in direct mode, a status spinner while a
/// batch job is polled.
struct CliProgressCallback {
    bar: ProgressBar,
    chunk_started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(spinner_style());
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            chunk_started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.chunk_started
            .lock()
            .unwrap()
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed_precise:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  \
         [{bar:42.green/238}] {pos:>3}/{len} chunks  \
         ⏱ {elapsed_precise}  ETA {eta_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS)
}

impl StudySetProgressCallback for CliProgressCallback {
    fn on_document_start(&self, input: &Path, total_pages: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{} ({total_pages} pages)", input.display()))
        ));
    }

    fn on_chunks_start(&self, total_chunks: usize, resumed_chunks: usize) {
        self.bar.set_style(bar_style());
        self.bar.set_length(total_chunks as u64);
        self.bar.set_position(resumed_chunks as u64);
        self.bar.set_prefix("Generating");
        self.bar.reset_eta();
        if resumed_chunks > 0 {
            self.bar.println(format!(
                "  {} resuming after {resumed_chunks}/{total_chunks} chunks",
                dim("↻")
            ));
        }
    }

    fn on_chunk_start(&self, chunk_num: usize, _total: usize) {
        *self.chunk_started.lock().unwrap() = Some(Instant::now());
        self.bar.set_message(format!("chunk {chunk_num}"));
    }

    fn on_chunk_complete(&self, chunk_num: usize, total: usize, card_count: usize) {
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            chunk_num,
            total,
            dim(&format!("{card_count:>4} cards")),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, chunk_num: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            red("✗"),
            chunk_num,
            total,
            red(&msg),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_batch_submitted(&self, job_id: &str, request_count: usize) {
        self.bar.set_style(spinner_style());
        self.bar.set_prefix("Batch");
        self.bar.set_message("submitted");
        self.bar.println(format!(
            "{} batch job {} ({request_count} requests)",
            cyan("◆"),
            bold(job_id)
        ));
    }

    fn on_batch_status(&self, job_id: &str, status: &BatchStatus, poll: u32) {
        self.bar.set_style(spinner_style());
        self.bar.set_prefix("Batch");
        self.bar.set_message(format!("{job_id}: {status} {}", dim(&format!("(check #{poll})"))));
    }

    fn on_document_complete(&self, output: &Path, card_count: usize) {
        self.bar.println(format!(
            "  {} {} cards → {}",
            green("✔"),
            bold(&card_count.to_string()),
            output.display()
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One PDF, one chat completion per 10 pages
  pdf2cards --input lecture.pdf --output lecture.csv

  # German cards, smaller chunks
  pdf2cards --input skript.pdf --output skript.csv --language german --chunk-size 5

  # Every PDF in a directory through the Batch API (about half the price)
  pdf2cards --in-dir lectures/ --out-dir cards/ --use-batch

  # Never render pages; send only the text layer
  pdf2cards --input book.pdf --output book.csv --text-only

  # Ignore an earlier interrupted run
  pdf2cards --input lecture.pdf --output lecture.csv --no-resume

RESUMING:
  Direct mode checkpoints after every chunk to <output>.progress.json.
  Batch mode checkpoints the submitted job id; re-running the same command
  attaches to that job instead of submitting a new one. Delete the
  checkpoint or pass --no-resume to start over.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (required for --use-batch)
  ANTHROPIC_API_KEY       Anthropic API key (direct mode)
  GEMINI_API_KEY          Google Gemini API key (direct mode)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  PDFIUM_LIB_PATH         Path to libpdfium, or the directory containing it
  RUST_LOG                Log filter, e.g. edgequake_pdf2cards=debug

  A .env file in the working directory is loaded automatically.
"#;

/// Turn PDF documents into question/answer study cards with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2cards",
    version,
    about = "Turn PDF documents into question/answer study cards with an LLM",
    long_about = "Generate flashcard-style study sets (CSV: Question,Answer) from PDF documents. \
Pages with images are sent as pictures, all other pages as text. Works with direct chat \
completions (any edgequake-llm provider) or the OpenAI Batch API, and resumes interrupted runs.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input PDF file (single-document mode).
    #[arg(long, alias = "input_file", env = "PDF2CARDS_INPUT", conflicts_with = "in_dir")]
    input: Option<PathBuf>,

    /// Output CSV file (single-document mode).
    #[arg(long, alias = "output_file", env = "PDF2CARDS_OUTPUT", conflicts_with = "out_dir")]
    output: Option<PathBuf>,

    /// Directory of PDFs to process (directory mode).
    #[arg(long, alias = "in_dir", env = "PDF2CARDS_IN_DIR")]
    in_dir: Option<PathBuf>,

    /// Directory receiving one CSV per PDF (directory mode).
    #[arg(long, alias = "out_dir", env = "PDF2CARDS_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// LLM model ID.
    #[arg(long, env = "PDF2CARDS_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// LLM provider for direct mode: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider for direct mode. Auto-detected from API key env vars if not set.\n\
          Batch mode always uses the OpenAI Batch API."
    )]
    provider: Option<String>,

    /// Pages per request.
    #[arg(long, alias = "chunk_size", env = "PDF2CARDS_CHUNK_SIZE", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: u64,

    /// Use the OpenAI Batch API instead of direct chat completions.
    #[arg(long, alias = "use_batch", env = "PDF2CARDS_USE_BATCH")]
    use_batch: bool,

    /// Never render pages; send only their text layer.
    #[arg(long, alias = "text_only", env = "PDF2CARDS_TEXT_ONLY")]
    text_only: bool,

    /// Language the cards are written in.
    #[arg(long, env = "PDF2CARDS_LANGUAGE", default_value = "english")]
    language: String,

    /// Discard any existing checkpoint and start over.
    #[arg(long, alias = "no_resume", env = "PDF2CARDS_NO_RESUME")]
    no_resume: bool,

    /// Text file with the system prompt; `[LANGUAGE]` is substituted.
    #[arg(long, alias = "prompt_file", env = "PDF2CARDS_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// JSON file with the `response_format` schema.
    #[arg(long, alias = "schema_file", env = "PDF2CARDS_SCHEMA_FILE")]
    schema_file: Option<PathBuf>,

    /// Checkpoint file (default: <output>.progress.json).
    #[arg(long, env = "PDF2CARDS_CHECKPOINT")]
    checkpoint: Option<PathBuf>,

    /// Directory for batch request/result files (default: next to the output).
    #[arg(long, alias = "work_dir", env = "PDF2CARDS_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Seconds before the first batch status re-check; doubles up to 5 minutes.
    #[arg(long, alias = "poll_interval", env = "PDF2CARDS_POLL_INTERVAL", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..=3600))]
    poll_interval: u64,

    /// Batch status checks before giving up (the job keeps running remotely).
    #[arg(long, alias = "max_polls", env = "PDF2CARDS_MAX_POLLS", default_value_t = 320,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_polls: u32,

    /// Retries per chunk on LLM failure (direct mode).
    #[arg(long, alias = "max_retries", env = "PDF2CARDS_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2CARDS_PASSWORD")]
    password: Option<String>,

    /// Disable progress bar.
    #[arg(long, alias = "no_progress", env = "PDF2CARDS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2CARDS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2CARDS_QUIET")]
    quiet: bool,
}

/// What the invocation asks for.
enum Target {
    Single { input: PathBuf, output: PathBuf },
    Directory { in_dir: PathBuf, out_dir: PathBuf },
}

impl Cli {
    fn target(&self) -> Result<Target> {
        match (&self.input, &self.output, &self.in_dir, &self.out_dir) {
            (Some(input), Some(output), None, None) => Ok(Target::Single {
                input: input.clone(),
                output: output.clone(),
            }),
            (None, None, Some(in_dir), Some(out_dir)) => Ok(Target::Directory {
                in_dir: in_dir.clone(),
                out_dir: out_dir.clone(),
            }),
            _ => anyhow::bail!(
                "Specify either --input and --output, or --in-dir and --out-dir"
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let target = cli.target()?;

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb = if show_progress {
        Some(CliProgressCallback::new())
    } else {
        None
    };

    let config = build_config(
        &cli,
        progress_cb
            .clone()
            .map(|cb| cb as Arc<dyn StudySetProgressCallback>),
    )?;
    let creator = StudySetCreator::new(config);

    // ── Run ──────────────────────────────────────────────────────────────
    let started = Instant::now();
    let run = async {
        match target {
            Target::Single { input, output } => {
                let doc = creator
                    .create_study_set(&input, &output)
                    .await
                    .with_context(|| format!("Failed to create a study set from {}", input.display()))?;
                Ok::<_, anyhow::Error>(RunSummary {
                    documents: vec![doc],
                    ..Default::default()
                })
            }
            Target::Directory { in_dir, out_dir } => creator
                .process_directory(&in_dir, &out_dir)
                .await
                .with_context(|| format!("Failed to process directory {}", in_dir.display())),
        }
    };

    // Dropping the run on Ctrl-C releases its checkpoint locks; the
    // checkpoints themselves stay for the next invocation.
    let summary: RunSummary = tokio::select! {
        result = run => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            if let Some(ref cb) = progress_cb {
                cb.bar.abandon();
            }
            anyhow::bail!("Interrupted; re-run the same command to resume");
        }
    };

    if let Some(cb) = progress_cb {
        cb.bar.finish_and_clear();
    }

    if !cli.quiet {
        print_summary(&summary, started.elapsed());
    }

    if !summary.failures.is_empty() {
        anyhow::bail!(
            "{} of {} documents could not be processed",
            summary.failures.len(),
            summary.failures.len() + summary.documents.len()
        );
    }

    Ok(())
}

/// Map CLI args to `StudySetConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<StudySetConfig> {
    let initial = Duration::from_secs(cli.poll_interval);
    let poll = PollPolicy {
        initial_interval: initial,
        max_interval: initial.max(PollPolicy::default().max_interval),
        max_polls: cli.max_polls,
        ..PollPolicy::default()
    };

    let mut builder = StudySetConfig::builder()
        .model(&cli.model)
        .chunk_size(cli.chunk_size as usize)
        .mode(if cli.use_batch {
            ProcessingMode::Batch
        } else {
            ProcessingMode::Direct
        })
        .text_only(cli.text_only)
        .language(&cli.language)
        .no_resume(cli.no_resume)
        .max_retries(cli.max_retries)
        .poll(poll);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = cli.prompt_file {
        builder = builder.prompt_file(path);
    }
    if let Some(ref path) = cli.schema_file {
        builder = builder.schema_file(path);
    }
    if let Some(ref path) = cli.checkpoint {
        builder = builder.checkpoint_path(path);
    }
    if let Some(ref path) = cli.work_dir {
        builder = builder.work_dir(path);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(summary: &RunSummary, elapsed: Duration) {
    for doc in &summary.documents {
        let pages = doc
            .total_pages
            .map(|p| format!("{p} pages"))
            .unwrap_or_else(|| "resumed batch".to_string());
        eprintln!(
            "{}  {} cards  {}  →  {}",
            if doc.unit_errors.is_empty() {
                green("✔")
            } else {
                cyan("⚠")
            },
            bold(&doc.cards_written.to_string()),
            dim(&pages),
            bold(&doc.output.display().to_string()),
        );
        for err in &doc.unit_errors {
            eprintln!("   {} {}", red("✗"), dim(&err.to_string()));
        }
    }
    for err in &summary.unrouted {
        eprintln!("   {} {}", red("✗"), dim(&err.to_string()));
    }
    for failure in &summary.failures {
        eprintln!(
            "{}  {}  {}",
            red("✘"),
            bold(&failure.input.display().to_string()),
            red(&failure.error)
        );
    }
    eprintln!(
        "   {} cards total  ·  {:.1}s",
        dim(&summary.total_cards().to_string()),
        elapsed.as_secs_f64()
    );
}
