//! Page extraction: turn a PDF into ordered [`PageRecord`]s via pdfium.
//!
//! A page that carries embedded images is rasterised (unless `text_only`),
//! because the pictures usually hold the content worth asking about. Every
//! other page contributes its text layer, which is far cheaper to send.
//!
//! pdfium is not async-safe, so the whole document is processed inside
//! `spawn_blocking`.

use crate::config::StudySetConfig;
use crate::error::Pdf2CardsError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Content of one page; text and image are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePayload {
    Text(String),
    Image { data: Vec<u8>, mime_type: String },
}

/// One extracted page, 0-indexed in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub index: usize,
    pub payload: PagePayload,
}

impl PageRecord {
    pub fn text(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            payload: PagePayload::Text(text.into()),
        }
    }

    pub fn image(index: usize, data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            index,
            payload: PagePayload::Image {
                data,
                mime_type: mime_type.into(),
            },
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self.payload, PagePayload::Image { .. })
    }
}

/// Source of page records for a document.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Extract every page of `path` in order, starting at index 0.
    async fn extract(&self, path: &Path, text_only: bool) -> Result<Vec<PageRecord>, Pdf2CardsError>;
}

/// pdfium-backed extractor.
#[derive(Debug, Clone)]
pub struct PdfiumExtractor {
    short_edge_px: u32,
    password: Option<String>,
}

impl PdfiumExtractor {
    pub fn new(short_edge_px: u32, password: Option<String>) -> Self {
        Self {
            short_edge_px,
            password,
        }
    }

    pub fn from_config(config: &StudySetConfig) -> Self {
        Self::new(config.render_short_edge_px, config.password.clone())
    }
}

#[async_trait]
impl PageExtractor for PdfiumExtractor {
    async fn extract(&self, path: &Path, text_only: bool) -> Result<Vec<PageRecord>, Pdf2CardsError> {
        validate_pdf(path)?;

        let path = path.to_path_buf();
        let short_edge = self.short_edge_px;
        let password = self.password.clone();

        tokio::task::spawn_blocking(move || {
            extract_blocking(&path, short_edge, password.as_deref(), text_only)
        })
        .await
        .map_err(|e| Pdf2CardsError::Internal(format!("Extraction task panicked: {}", e)))?
    }
}

/// Validate existence, readability and PDF magic bytes.
pub fn validate_pdf(path: &Path) -> Result<(), Pdf2CardsError> {
    if !path.exists() {
        return Err(Pdf2CardsError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(Pdf2CardsError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2CardsError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(Pdf2CardsError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    debug!("Validated PDF: {}", path.display());
    Ok(())
}

/// Bind pdfium: `PDFIUM_LIB_PATH` (file or directory), then the executable's
/// directory, then the system library search path.
fn bind_pdfium() -> Result<Pdfium, Pdf2CardsError> {
    if let Ok(configured) = std::env::var("PDFIUM_LIB_PATH") {
        let configured = PathBuf::from(configured);
        let lib = if configured.is_dir() {
            PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(
                configured.to_string_lossy().as_ref(),
            ))
        } else {
            configured
        };
        let bindings = Pdfium::bind_to_library(&lib).map_err(|e| {
            Pdf2CardsError::PdfiumBindingFailed(format!("{}: {:?}", lib.display(), e))
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let lib = PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(
            exe_dir.to_string_lossy().as_ref(),
        ));
        if let Ok(bindings) = Pdfium::bind_to_library(&lib) {
            debug!("Bound pdfium next to executable: {}", exe_dir.display());
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| Pdf2CardsError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn extract_blocking(
    pdf_path: &Path,
    short_edge_px: u32,
    password: Option<&str>,
    text_only: bool,
) -> Result<Vec<PageRecord>, Pdf2CardsError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| Pdf2CardsError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    info!("PDF loaded: {} pages ({})", pages.len(), pdf_path.display());

    let mut records = Vec::with_capacity(pages.len() as usize);

    for (index, page) in pages.iter().enumerate() {
        let has_images = page
            .objects()
            .iter()
            .any(|object| object.object_type() == PdfPageObjectType::Image);

        if has_images && !text_only {
            let data = render_page(&page, short_edge_px).map_err(|detail| {
                Pdf2CardsError::RasterisationFailed {
                    path: pdf_path.to_path_buf(),
                    page: index + 1,
                    detail,
                }
            })?;
            debug!("Page {} rendered → {} bytes PNG", index + 1, data.len());
            records.push(PageRecord::image(index, data, "image/png"));
        } else {
            let text = page.text().map(|t| t.all()).unwrap_or_default();
            debug!("Page {} text layer → {} chars", index + 1, text.len());
            records.push(PageRecord::text(index, text));
        }
    }

    Ok(records)
}

/// Rasterise a page so its shorter edge is `short_edge_px`, PNG-encoded.
fn render_page(page: &PdfPage, short_edge_px: u32) -> Result<Vec<u8>, String> {
    let (width, height) = target_dimensions(page.width().value, page.height().value, short_edge_px);

    let render_config = PdfRenderConfig::new()
        .set_target_width(width as i32)
        .set_maximum_height(height as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| format!("{:?}", e))?;

    let image = bitmap.as_image();
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {}", e))?;
    Ok(buf)
}

/// Pixel size that scales the page so its shorter edge equals `short_edge_px`.
fn target_dimensions(width_points: f32, height_points: f32, short_edge_px: u32) -> (u32, u32) {
    let width_points = width_points.max(1.0);
    let height_points = height_points.max(1.0);
    let scale = short_edge_px as f32 / width_points.min(height_points);
    (
        ((width_points * scale).round() as u32).max(1),
        ((height_points * scale).round() as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn portrait_page_scales_by_width() {
        // US Letter: 612 × 792 pt
        assert_eq!(target_dimensions(612.0, 792.0, 500), (500, 647));
    }

    #[test]
    fn landscape_page_scales_by_height() {
        assert_eq!(target_dimensions(842.0, 595.0, 500), (708, 500));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = validate_pdf(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, Pdf2CardsError::FileNotFound { .. }));
        assert!(err.is_extraction_error());
    }

    #[test]
    fn wrong_magic_bytes_are_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"PK\x03\x04 not a pdf").unwrap();
        let err = validate_pdf(file.path()).unwrap_err();
        match err {
            Pdf2CardsError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn pdf_header_passes_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.7\n").unwrap();
        assert!(validate_pdf(file.path()).is_ok());
    }

    #[test]
    fn page_record_constructors() {
        assert!(!PageRecord::text(0, "hello").is_image());
        assert!(PageRecord::image(1, vec![1, 2], "image/png").is_image());
    }
}
