//! Error types for the edgequake-pdf2cards library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Pdf2CardsError`] is **fatal**: the run cannot proceed (bad input file,
//!   missing credentials, batch submission failed, checkpoint unreadable).
//!   Returned as `Err(Pdf2CardsError)` from the orchestrator entry points.
//!
//! * [`UnitError`] is **non-fatal**: a single chunk (direct mode) or a single
//!   batch result record (batch mode) failed. The unit contributes no cards,
//!   the failure is logged, and the rest of the run continues.
//!
//! Fatal errors raised after a checkpoint was written leave that checkpoint in
//! place so a later invocation can resume.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2cards library.
#[derive(Debug, Error)]
pub enum Pdf2CardsError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A credential required by the selected mode is absent.
    #[error("Missing credentials: {var} is not set.\nExport it or add it to a .env file.")]
    MissingCredentials { var: String },

    /// The prompt file could not be read.
    #[error("Prompt file not found: '{path}'")]
    PromptNotFound { path: PathBuf },

    /// The response schema file is missing or not valid JSON.
    #[error("Invalid response schema '{path}': {detail}")]
    SchemaInvalid { path: PathBuf, detail: String },

    /// Directory mode found nothing to process.
    #[error("No PDF files found in directory '{dir}'")]
    NoDocuments { dir: PathBuf },

    // ── Extraction errors (fatal for one document only) ───────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt, or the document is encrypted.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page} of '{path}': {detail}")]
    RasterisationFailed {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or the directory containing it),\n\
or install pdfium in a system library location.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Batch errors ──────────────────────────────────────────────────────
    /// The request file could not be uploaded or the batch job not created.
    #[error("Batch submission failed: {detail}")]
    SubmissionFailed { detail: String },

    /// Querying the remote job status failed.
    #[error("Polling batch job '{job_id}' failed: {detail}\nRe-run to resume from the checkpoint.")]
    PollFailed { job_id: String, detail: String },

    /// The remote job entered a terminal failure state.
    #[error("Batch job '{job_id}' ended with status '{status}'.\nUse --no-resume to submit a new job.")]
    BatchFailed { job_id: String, status: String },

    /// The poll budget was exhausted before the job completed.
    #[error("Batch job '{job_id}' did not complete after {polls} status checks.\nRe-run later to resume.")]
    PollTimeout { job_id: String, polls: u32 },

    /// The job completed but its output could not be downloaded or stored.
    #[error("Retrieving results of batch job '{job_id}' failed: {detail}")]
    RetrieveFailed { job_id: String, detail: String },

    // ── Checkpoint errors ─────────────────────────────────────────────────
    /// Reading, writing or removing the checkpoint file failed.
    #[error("Checkpoint I/O failed for '{path}': {source}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint file exists but cannot be parsed.
    #[error("Checkpoint '{path}' is corrupt: {detail}\nUse --no-resume to discard it.")]
    CheckpointCorrupt { path: PathBuf, detail: String },

    /// Another run holds the checkpoint lock.
    #[error(
        "Checkpoint '{path}' is in use by another run ({holder}).\n\
Wait for that run to finish, or use a different --checkpoint."
    )]
    CheckpointLocked { path: PathBuf, holder: String },

    /// The checkpoint does not fit the current run (mode or chunk size changed).
    #[error("Checkpoint '{path}' does not match this run: {detail}\nUse --no-resume to start over.")]
    CheckpointMismatch { path: PathBuf, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the output CSV file.
    #[error("Failed to write output file '{path}': {detail}")]
    OutputWriteFailed { path: PathBuf, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2CardsError {
    /// `true` for failures scoped to a single input document.
    ///
    /// In multi-document runs these exclude the document and the run
    /// continues with the others.
    pub fn is_extraction_error(&self) -> bool {
        matches!(
            self,
            Pdf2CardsError::FileNotFound { .. }
                | Pdf2CardsError::PermissionDenied { .. }
                | Pdf2CardsError::NotAPdf { .. }
                | Pdf2CardsError::CorruptPdf { .. }
                | Pdf2CardsError::RasterisationFailed { .. }
        )
    }
}

/// A non-fatal error for one unit of work.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// The completion call failed after retries.
    #[error("Chunk starting at page {start}: completion failed after {retries} retries: {detail}")]
    CompletionFailed {
        start: usize,
        retries: u32,
        detail: String,
    },

    /// The model answered, but not with a parsable card list.
    #[error("Chunk starting at page {start}: invalid response: {detail}")]
    InvalidResponse { start: usize, detail: String },

    /// A batch result line could not be parsed into cards.
    #[error("Batch record '{custom_id}': {detail}")]
    RecordParseFailed { custom_id: String, detail: String },

    /// A batch result carried an identifier that is not in the mapping.
    #[error("Batch record '{custom_id}' does not belong to this run")]
    UnknownIdentifier { custom_id: String },
}

/// Transport-level failure reported by a batch channel.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The request never produced a response (connect, timeout, TLS).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The API answered with a non-success status.
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),
}
