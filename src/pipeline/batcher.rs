//! Content batching: partition page records into fixed-size chunks.
//!
//! Pure and lazy; chunks borrow from the page list.

use super::extract::PageRecord;
use crate::error::Pdf2CardsError;

/// A contiguous run of pages submitted together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Position of the first page within the document's page list.
    pub start: usize,
    pub pages: &'a [PageRecord],
}

impl Chunk<'_> {
    /// Position one past the last page of this chunk.
    pub fn end(&self) -> usize {
        self.start + self.pages.len()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Lazy iterator over the chunks of a page list.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    inner: std::slice::Chunks<'a, PageRecord>,
    next_start: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let pages = self.inner.next()?;
        let chunk = Chunk {
            start: self.next_start,
            pages,
        };
        self.next_start += pages.len();
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Chunks<'_> {}

/// Partition `pages` into chunks of `chunk_size` (the last may be shorter).
pub fn chunks(pages: &[PageRecord], chunk_size: usize) -> Result<Chunks<'_>, Pdf2CardsError> {
    chunks_from(pages, chunk_size, 0)
}

/// Like [`chunks`], skipping the first `offset` pages.
///
/// `offset` is clamped to the page count, so a finished run yields nothing.
pub fn chunks_from(
    pages: &[PageRecord],
    chunk_size: usize,
    offset: usize,
) -> Result<Chunks<'_>, Pdf2CardsError> {
    if chunk_size == 0 {
        return Err(Pdf2CardsError::InvalidConfig(
            "Chunk size must be ≥ 1".into(),
        ));
    }
    let offset = offset.min(pages.len());
    Ok(Chunks {
        inner: pages[offset..].chunks(chunk_size),
        next_start: offset,
    })
}

/// Number of chunks `page_count` pages produce.
pub fn chunk_count(page_count: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    page_count.div_ceil(chunk_size)
}
