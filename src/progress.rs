//! Progress-callback trait for study-set runs.
//!
//! Inject an [`Arc<dyn StudySetProgressCallback>`] via
//! [`crate::config::StudySetConfigBuilder::progress_callback`] to receive
//! events as chunks are completed (direct mode) or as the batch job moves
//! through its remote states (batch mode).
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2cards::{StudySetConfig, StudySetProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CardCounter {
//!     cards: AtomicUsize,
//! }
//!
//! impl StudySetProgressCallback for CardCounter {
//!     fn on_chunk_complete(&self, _chunk: usize, _total: usize, card_count: usize) {
//!         self.cards.fetch_add(card_count, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CardCounter { cards: AtomicUsize::new(0) });
//! let config = StudySetConfig::builder()
//!     .progress_callback(counter as Arc<dyn StudySetProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::batch::BatchStatus;
use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as a run advances.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Chunk numbers are 1-indexed.
pub trait StudySetProgressCallback: Send + Sync {
    /// Called once per document after its pages were extracted.
    fn on_document_start(&self, input: &Path, total_pages: usize) {
        let _ = (input, total_pages);
    }

    /// Called before the first chunk of a direct-mode document.
    ///
    /// `resumed_chunks` chunks were already completed by an earlier run.
    fn on_chunks_start(&self, total_chunks: usize, resumed_chunks: usize) {
        let _ = (total_chunks, resumed_chunks);
    }

    /// Called just before a chunk is sent to the model.
    fn on_chunk_start(&self, chunk_num: usize, total_chunks: usize) {
        let _ = (chunk_num, total_chunks);
    }

    /// Called when a chunk produced cards.
    fn on_chunk_complete(&self, chunk_num: usize, total_chunks: usize, card_count: usize) {
        let _ = (chunk_num, total_chunks, card_count);
    }

    /// Called when a chunk failed and contributes no cards.
    fn on_chunk_error(&self, chunk_num: usize, total_chunks: usize, error: &str) {
        let _ = (chunk_num, total_chunks, error);
    }

    /// Called once a batch job was created.
    fn on_batch_submitted(&self, job_id: &str, request_count: usize) {
        let _ = (job_id, request_count);
    }

    /// Called after every status check of a batch job.
    fn on_batch_status(&self, job_id: &str, status: &BatchStatus, poll: u32) {
        let _ = (job_id, status, poll);
    }

    /// Called after a CSV was written.
    fn on_document_complete(&self, output: &Path, card_count: usize) {
        let _ = (output, card_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl StudySetProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::StudySetConfig`].
pub type ProgressCallback = Arc<dyn StudySetProgressCallback>;
