//! Result types: study cards and per-run summaries.

use crate::error::UnitError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single question/answer study card.
///
/// Both sides are trimmed and guaranteed non-empty; construct through
/// [`Card::new`] (or deserialize, which applies the same rule).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCard")]
pub struct Card {
    question: String,
    answer: String,
}

impl Card {
    /// Build a card, returning `None` when either side is blank.
    pub fn new(question: impl AsRef<str>, answer: impl AsRef<str>) -> Option<Self> {
        let question = question.as_ref().trim();
        let answer = answer.as_ref().trim();
        if question.is_empty() || answer.is_empty() {
            return None;
        }
        Some(Self {
            question: question.to_string(),
            answer: answer.to_string(),
        })
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }
}

/// Unvalidated card as produced by the model.
#[derive(Debug, Deserialize)]
pub(crate) struct RawCard {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

impl TryFrom<RawCard> for Card {
    type Error = String;

    fn try_from(raw: RawCard) -> Result<Self, Self::Error> {
        Card::new(&raw.question, &raw.answer)
            .ok_or_else(|| "question and answer must not be blank".to_string())
    }
}

/// Outcome of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    /// Input PDF.
    pub input: PathBuf,
    /// CSV written for this document.
    pub output: PathBuf,
    /// Pages extracted from the input; `None` when a resumed batch run
    /// routed results without extracting the document again.
    pub total_pages: Option<usize>,
    /// Rows written to `output`.
    pub cards_written: usize,
    /// Chunks or batch records that contributed no cards.
    pub unit_errors: Vec<UnitError>,
    /// `true` when the run picked up an existing checkpoint.
    pub resumed: bool,
}

/// A document that was skipped because it could not be read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub input: PathBuf,
    pub error: String,
}

/// Outcome of a (possibly multi-document) run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub documents: Vec<DocumentSummary>,
    pub failures: Vec<DocumentFailure>,
    /// Batch records that could not be attributed to any document.
    #[serde(default)]
    pub unrouted: Vec<UnitError>,
}

impl RunSummary {
    /// Total cards written across all documents.
    pub fn total_cards(&self) -> usize {
        self.documents.iter().map(|d| d.cards_written).sum()
    }

    /// Total unit-level errors across all documents.
    pub fn total_unit_errors(&self) -> usize {
        self.documents.iter().map(|d| d.unit_errors.len()).sum::<usize>() + self.unrouted.len()
    }
}
