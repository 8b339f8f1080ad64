//! Pipeline stages for PDF-to-flashcard generation.
//!
//! Each submodule implements one step, so stages can be tested alone and
//! swapped (a different page source, a fake model) without touching others.
//!
//! ## Data Flow
//!
//! ```text
//!                      ┌──▶ completion ─────────────────────┐   (direct)
//! extract ──▶ batcher ─┤                                     ├──▶ writer
//! (pdfium)   (chunks)  └──▶ batch ──▶ openai ──▶ demultiplex ┘   (batch)
//!                      checkpoint: offset / job id, resumable
//! ```
//!
//! 1. [`extract`]    : validate the PDF and turn every page into text or a
//!    rendered PNG; runs in `spawn_blocking` because pdfium is not async-safe
//! 2. [`batcher`]    : split pages into fixed-size chunks
//! 3. [`encode`]     : chunk → chat message parts (attachments or data URLs)
//! 4. [`completion`] : one chat request per chunk with retry/backoff
//! 5. [`batch`]      : JSONL submission, bounded polling, result routing
//! 6. [`openai`]     : the Files + Batches REST transport
//! 7. [`checkpoint`] : atomic, lock-guarded resume state
//! 8. [`writer`]     : `Question,Answer` CSV output

pub mod batch;
pub mod batcher;
pub mod checkpoint;
pub mod completion;
pub mod encode;
pub mod extract;
pub mod openai;
pub mod writer;
