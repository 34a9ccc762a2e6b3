use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::annotation::AnnotationError;
use super::caption::CaptionError;
use super::extraction::ExtractionError;
use super::model::ModelError;
use super::ocr::OcrError;
use super::source::DocumentHandle;

/// Text of one page, in page order. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize)]
pub struct PageText {
    pub page_number: usize,
    pub text: String,
}

/// An image pulled out of a page. `bytes` holds an encoded image in `format`
/// and is owned by the pipeline run that extracted it.
#[derive(Clone, Zeroize)]
pub struct ExtractedImage {
    pub page_number: usize,
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ExtractedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractedImage")
            .field("page_number", &self.page_number)
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// OCR outcome for one image. A failed image carries empty text and an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct OcrResult {
    pub page_number: usize,
    pub image_index: usize,
    pub text: String,
    pub error: Option<String>,
}

impl OcrResult {
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Caption outcome for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct CaptionResult {
    pub page_number: usize,
    pub image_index: usize,
    pub caption: String,
    pub error: Option<String>,
}

/// Everything one pipeline run extracts from a document.
/// Zeroized when the owning session discards it.
#[derive(Debug, Clone, Default, Zeroize)]
pub struct ExtractedContent {
    pub pages: Vec<PageText>,
    pub images: Vec<ExtractedImage>,
    pub ocr: Vec<OcrResult>,
    pub captions: Vec<CaptionResult>,
    /// Pages whose extraction failed and were skipped.
    pub skipped_pages: Vec<usize>,
}

impl ExtractedContent {
    pub fn page_chars(&self) -> usize {
        self.pages.iter().map(|p| p.text.chars().count()).sum()
    }

    pub fn ocr_chars(&self) -> usize {
        self.ocr.iter().map(|r| r.text.chars().count()).sum()
    }

    /// Page text followed by OCR text, whitespace-normalized.
    pub fn combined_text(&self) -> String {
        let pages = self.pages.iter().map(|p| p.text.as_str());
        let ocr = self.ocr.iter().map(|r| r.text.as_str());
        super::text::normalize_whitespace(pages.chain(ocr))
    }

    /// Page text joined by newlines, line structure intact.
    pub fn page_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn images_with_text(&self) -> usize {
        self.ocr.iter().filter(|r| r.has_text()).count()
    }
}

/// Result of polling an annotation job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Ready(Vec<serde_json::Value>),
    NotReady,
}

// ═══════════════════════════════════════════════════════════
// Collaborator contracts (allow mocking for tests)
// ═══════════════════════════════════════════════════════════

/// Page text and embedded image extraction.
pub trait DocumentExtractor: Send + Sync {
    /// Per-page failures are recorded in `skipped_pages`, not returned.
    fn extract(&self, document: &DocumentHandle) -> Result<ExtractedContent, ExtractionError>;
}

pub trait OcrEngine: Send + Sync {
    fn is_available(&self) -> bool;

    /// May return empty text.
    fn recognize(&self, image: &ExtractedImage) -> Result<String, OcrError>;
}

pub trait ImageCaptioner: Send + Sync {
    fn is_available(&self) -> bool;

    fn caption(&self, image: &ExtractedImage) -> Result<String, CaptionError>;
}

/// A loaded text model, shared read-only across requests.
pub trait TextModel: Send + Sync {
    fn name(&self) -> &str;

    fn summarize(&self, text: &str) -> Result<String, ModelError>;

    fn answer(&self, question: &str, context: &str) -> Result<String, ModelError>;
}

/// Loads a text model from one endpoint/model pair.
pub trait ModelLoader: Send + Sync {
    fn load(&self, endpoint: &str, model: &str) -> Result<Box<dyn TextModel>, ModelError>;
}

/// Third-party concept annotation. Non-local by definition.
pub trait AnnotationService: Send + Sync {
    fn submit(&self, text: &str) -> Result<String, AnnotationError>;

    fn poll(&self, token: &str) -> Result<PollStatus, AnnotationError>;
}
