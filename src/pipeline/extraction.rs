//! Page text and embedded image extraction via Google PDFium.
//!
//! `PdfiumExtractor` is stateless (`Send + Sync`). Each call binds a fresh
//! `Pdfium` instance because the upstream type is `!Send`; the OS caches the
//! library load. Non-PDF payloads that decode as UTF-8 are treated as a
//! single page of plain text.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use pdfium_render::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use super::source::DocumentHandle;
use super::types::{DocumentExtractor, ExtractedContent, ExtractedImage, PageText};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("PDFium library not available: {0}")]
    LibraryUnavailable(String),

    #[error("PDF is password protected")]
    PdfEncrypted,

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Unsupported document format")]
    UnsupportedFormat,

    #[error("No page could be extracted")]
    NothingExtracted,
}

/// Extracts text and images from PDFs (and plain UTF-8 text files).
pub struct PdfiumExtractor {
    library: Option<PathBuf>,
}

impl PdfiumExtractor {
    /// Verify the PDFium library is loadable (fail-fast).
    ///
    /// Discovery order:
    /// 1. `library`, an explicit path to the library file
    /// 2. Alongside the running executable, or its `lib/` sibling
    /// 3. System library search paths
    pub fn new(library: Option<PathBuf>) -> Result<Self, ExtractionError> {
        let _ = load_pdfium(library.as_deref())?;
        Ok(Self { library })
    }

    fn extract_pdf(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractionError> {
        let pdfium = load_pdfium(self.library.as_deref())?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(map_load_error)?;

        let mut content = ExtractedContent::default();
        let page_count = document.pages().len() as usize;

        for (index, page) in document.pages().iter().enumerate() {
            let page_number = index + 1;

            match page.text() {
                Ok(text) => content.pages.push(PageText {
                    page_number,
                    text: text.all(),
                }),
                Err(e) => {
                    warn!(page = page_number, "Skipping page, text extraction failed: {e}");
                    content.skipped_pages.push(page_number);
                    continue;
                }
            }

            let mut image_index = 0;
            for object in page.objects().iter() {
                let Some(image_object) = object.as_image_object() else {
                    continue;
                };
                match image_object.get_raw_image() {
                    Ok(image) => match encode_png(&image) {
                        Ok(png) => {
                            let (width, height) = image.dimensions();
                            content.images.push(ExtractedImage {
                                page_number,
                                index: image_index,
                                width,
                                height,
                                format: "png".to_string(),
                                bytes: png,
                            });
                            image_index += 1;
                        }
                        Err(e) => warn!(page = page_number, "Skipping image: {e}"),
                    },
                    Err(e) => warn!(page = page_number, "Skipping unreadable image: {e}"),
                }
            }
        }

        if content.pages.is_empty() && page_count > 0 {
            return Err(ExtractionError::NothingExtracted);
        }

        debug!(
            pages = content.pages.len(),
            skipped = content.skipped_pages.len(),
            images = content.images.len(),
            "PDF extraction complete"
        );
        Ok(content)
    }
}

impl DocumentExtractor for PdfiumExtractor {
    fn extract(&self, document: &DocumentHandle) -> Result<ExtractedContent, ExtractionError> {
        if document.is_pdf() {
            return self.extract_pdf(document.bytes());
        }
        extract_plain_text(document.bytes())
    }
}

/// Single-page extraction for UTF-8 text payloads.
pub fn extract_plain_text(bytes: &[u8]) -> Result<ExtractedContent, ExtractionError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ExtractionError::UnsupportedFormat)?;
    if text.contains('\0') {
        return Err(ExtractionError::UnsupportedFormat);
    }
    Ok(ExtractedContent {
        pages: vec![PageText {
            page_number: 1,
            text: text.to_string(),
        }],
        ..Default::default()
    })
}

/// Encode any decoded image as PNG.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

fn load_pdfium(library: Option<&Path>) -> Result<Pdfium, ExtractionError> {
    if let Some(path) = library {
        debug!(path = %path.display(), "Loading PDFium from configured path");
        let bindings = Pdfium::bind_to_library(path).map_err(|e| {
            ExtractionError::LibraryUnavailable(format!(
                "Failed to load PDFium from {}: {e}",
                path.display()
            ))
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidates = [
                exe_dir.to_path_buf(),
                exe_dir.join("lib"),
                exe_dir.join("..").join("lib"),
            ];

            for dir in &candidates {
                let lib_path = Pdfium::pdfium_platform_library_name_at_path(
                    dir.to_string_lossy().as_ref(),
                );
                if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                    debug!(dir = %dir.display(), "Loaded PDFium from candidate directory");
                    return Ok(Pdfium::new(bindings));
                }
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        ExtractionError::LibraryUnavailable(format!(
            "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

/// Map PDF load errors, detecting encrypted PDFs.
fn map_load_error(e: PdfiumError) -> ExtractionError {
    let msg = format!("{e}");
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfParsing(format!("Failed to load PDF: {msg}"))
    }
}
