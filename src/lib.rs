//! # edgequake-pdf2cards
//!
//! Turn PDF documents into question/answer study cards with an LLM.
//!
//! Pages are extracted with pdfium: a page with embedded images is rendered
//! to PNG (shorter edge 500 px) so the model can see its figures, while every
//! other page contributes its text layer. Pages are grouped into chunks and
//! each chunk is turned into cards, either with one chat completion per chunk
//! (direct mode) or through the OpenAI Batch API (batch mode, about half the
//! price but asynchronous). The result is one `Question,Answer` CSV per PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Extract   text layer or rendered PNG per page (pdfium, spawn_blocking)
//!  ├─ 2. Chunk     fixed-size groups of pages
//!  ├─ 3. Generate  direct: chat completion per chunk, checkpoint after each
//!  │               batch:  one JSONL job, checkpoint the job id, poll, fetch
//!  ├─ 4. Route     batch results → the document they came from
//!  └─ 5. Output    Question,Answer CSV; checkpoint cleared
//! ```
//!
//! Interrupted runs resume from their checkpoint: direct mode continues at
//! the first unfinished chunk, batch mode re-attaches to the submitted job
//! instead of paying for a second one.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2cards::{ProcessingMode, StudySetConfig, StudySetCreator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = StudySetConfig::builder()
//!         .language("german")
//!         .mode(ProcessingMode::Batch)
//!         .build()?;
//!     let summary = StudySetCreator::new(config)
//!         .process_directory("lectures/", "cards/")
//!         .await?;
//!     eprintln!("{} cards in {} files", summary.total_cards(), summary.documents.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2cards` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2cards = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod study_set;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PollPolicy, ProcessingMode, StudySetConfig, StudySetConfigBuilder};
pub use error::{ChannelError, Pdf2CardsError, UnitError};
pub use output::{Card, DocumentFailure, DocumentSummary, RunSummary};
pub use pipeline::batch::{BatchChannel, BatchStatus, JobHandle, RemoteBatch};
pub use pipeline::checkpoint::{Checkpoint, ProgressTracker};
pub use pipeline::completion::CompletionClient;
pub use pipeline::extract::{PageExtractor, PagePayload, PageRecord};
pub use progress::{NoopProgressCallback, ProgressCallback, StudySetProgressCallback};
pub use study_set::{DocumentContext, StudySetCreator};
