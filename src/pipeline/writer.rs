//! CSV output: one `Question,Answer` row per card.

use crate::error::Pdf2CardsError;
use crate::output::Card;
use std::path::Path;
use tracing::info;

/// Header row written at the top of every study set.
pub const CSV_HEADER: [&str; 2] = ["Question", "Answer"];

/// Render cards as CSV (header included, RFC 4180 quoting).
pub fn render_csv(cards: &[Card]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for card in cards {
        writer.write_record([card.question(), card.answer()])?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Write `cards` to `path`.
///
/// Uses atomic write (temp file + rename) so a reader never sees a partial
/// study set. The parent directory is created when missing.
pub async fn write_cards(path: &Path, cards: &[Card]) -> Result<(), Pdf2CardsError> {
    let fail = |detail: String| Pdf2CardsError::OutputWriteFailed {
        path: path.to_path_buf(),
        detail,
    };

    let bytes = render_csv(cards).map_err(|e| fail(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| fail(format!("creating {}: {}", parent.display(), e)))?;
    }

    let tmp_path = path.with_extension("csv.tmp");
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| fail(e.to_string()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| fail(e.to_string()))?;

    info!("Study set saved to {} ({} cards)", path.display(), cards.len());
    Ok(())
}
