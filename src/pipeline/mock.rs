//! Hand-written collaborator mocks for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use super::annotation::AnnotationError;
use super::caption::CaptionError;
use super::extraction::ExtractionError;
use super::model::ModelError;
use super::ocr::OcrError;
use super::source::DocumentHandle;
use super::types::*;

// ═══════════════════════════════════════════════════════════
// Extraction
// ═══════════════════════════════════════════════════════════

/// Returns a canned `ExtractedContent`, or fails when built with `failing`.
pub struct MockExtractor {
    content: Option<ExtractedContent>,
}

impl MockExtractor {
    pub fn with_pages(pages: &[&str]) -> Self {
        Self::with_content(ExtractedContent {
            pages: pages
                .iter()
                .enumerate()
                .map(|(i, text)| PageText {
                    page_number: i + 1,
                    text: text.to_string(),
                })
                .collect(),
            ..Default::default()
        })
    }

    pub fn with_content(content: ExtractedContent) -> Self {
        Self {
            content: Some(content),
        }
    }

    pub fn failing() -> Self {
        Self { content: None }
    }
}

impl DocumentExtractor for MockExtractor {
    fn extract(&self, _document: &DocumentHandle) -> Result<ExtractedContent, ExtractionError> {
        self.content.clone().ok_or(ExtractionError::UnsupportedFormat)
    }
}

/// A small fake image on `page`.
pub fn image(page_number: usize, index: usize) -> ExtractedImage {
    ExtractedImage {
        page_number,
        index,
        width: 4,
        height: 4,
        format: "png".into(),
        bytes: vec![0u8; 16],
    }
}

// ═══════════════════════════════════════════════════════════
// OCR + captioning
// ═══════════════════════════════════════════════════════════

/// Per-image behaviour keyed by image index.
#[derive(Default)]
struct ItemScript {
    fail: HashSet<usize>,
    panic: HashSet<usize>,
    delay: Duration,
}

impl ItemScript {
    fn check(&self, index: usize) -> bool {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.panic.contains(&index) {
            panic!("scripted panic on image {index}");
        }
        !self.fail.contains(&index)
    }
}

pub struct MockOcrEngine {
    available: bool,
    script: ItemScript,
    calls: AtomicU32,
}

impl MockOcrEngine {
    /// Recognizes every image as `"ocr p<page> i<index>"`.
    pub fn new() -> Self {
        Self {
            available: true,
            script: ItemScript::default(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn failing_on(mut self, index: usize) -> Self {
        self.script.fail.insert(index);
        self
    }

    pub fn panicking_on(mut self, index: usize) -> Self {
        self.script.panic.insert(index);
        self
    }

    /// Every image takes `delay` before it is recognized.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.script.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for MockOcrEngine {
    fn is_available(&self) -> bool {
        self.available
    }

    fn recognize(&self, image: &ExtractedImage) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.script.check(image.index) {
            return Err(OcrError::Processing("scripted failure".into()));
        }
        Ok(format!("ocr p{} i{}", image.page_number, image.index))
    }
}

pub struct MockCaptioner {
    available: bool,
    script: ItemScript,
}

impl MockCaptioner {
    /// Captions every image as `"figure <index>"`.
    pub fn new() -> Self {
        Self {
            available: true,
            script: ItemScript::default(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn failing_on(mut self, index: usize) -> Self {
        self.script.fail.insert(index);
        self
    }
}

impl ImageCaptioner for MockCaptioner {
    fn is_available(&self) -> bool {
        self.available
    }

    fn caption(&self, image: &ExtractedImage) -> Result<String, CaptionError> {
        if !self.script.check(image.index) {
            return Err(CaptionError::Model(ModelError::Timeout(1)));
        }
        Ok(format!("figure {}", image.index))
    }
}

// ═══════════════════════════════════════════════════════════
// Text model
// ═══════════════════════════════════════════════════════════

pub struct MockTextModel {
    name: String,
    fail_summary: bool,
    fail_questions: HashSet<String>,
    answer_delay: Duration,
    questions_seen: Mutex<Vec<String>>,
}

impl MockTextModel {
    /// Summaries are `"summary of <n> chars"`, answers `"answer to <question>"`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_summary: false,
            fail_questions: HashSet::new(),
            answer_delay: Duration::ZERO,
            questions_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_summary(mut self) -> Self {
        self.fail_summary = true;
        self
    }

    pub fn failing_question(mut self, question: &str) -> Self {
        self.fail_questions.insert(question.to_string());
        self
    }

    pub fn slow_answers(mut self, delay: Duration) -> Self {
        self.answer_delay = delay;
        self
    }

    pub fn questions_seen(&self) -> Vec<String> {
        self.questions_seen.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

impl TextModel for MockTextModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn summarize(&self, text: &str) -> Result<String, ModelError> {
        if self.fail_summary {
            return Err(ModelError::Timeout(300));
        }
        Ok(format!("summary of {} chars", text.chars().count()))
    }

    fn answer(&self, question: &str, _context: &str) -> Result<String, ModelError> {
        if let Ok(mut seen) = self.questions_seen.lock() {
            seen.push(question.to_string());
        }
        if !self.answer_delay.is_zero() {
            std::thread::sleep(self.answer_delay);
        }
        if self.fail_questions.contains(question) {
            return Err(ModelError::Api {
                status: 500,
                message: "scripted".into(),
            });
        }
        Ok(format!("answer to {question}"))
    }
}

/// Loads a `MockTextModel` only for the listed endpoint/model pairs.
pub struct MockLoader {
    succeed: Vec<(String, String)>,
    attempts: AtomicU32,
}

impl MockLoader {
    pub fn succeed_on(pairs: &[(&str, &str)]) -> Self {
        Self {
            succeed: pairs
                .iter()
                .map(|(e, m)| (e.to_string(), m.to_string()))
                .collect(),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ModelLoader for MockLoader {
    fn load(&self, endpoint: &str, model: &str) -> Result<Box<dyn TextModel>, ModelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.succeed.iter().any(|(e, m)| e == endpoint && m == model) {
            Ok(Box::new(MockTextModel::new(model)))
        } else {
            Err(ModelError::NotReachable(endpoint.to_string()))
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Annotation
// ═══════════════════════════════════════════════════════════

pub struct MockAnnotationService {
    ready_on_poll: u32,
    annotations: Vec<Value>,
    fail_submit: bool,
    polls: AtomicU32,
    submitted_chars: Mutex<Option<usize>>,
}

impl MockAnnotationService {
    /// Becomes ready on the `polls`-th poll.
    pub fn ready_after(polls: u32, annotations: Vec<Value>) -> Self {
        Self {
            ready_on_poll: polls,
            annotations,
            fail_submit: false,
            polls: AtomicU32::new(0),
            submitted_chars: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_submit: true,
            ..Self::ready_after(1, vec![])
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    /// Character count of the last submitted text.
    pub fn submitted_chars(&self) -> Option<usize> {
        self.submitted_chars.lock().ok().and_then(|c| *c)
    }
}

impl AnnotationService for MockAnnotationService {
    fn submit(&self, text: &str) -> Result<String, AnnotationError> {
        if self.fail_submit {
            return Err(AnnotationError::Http { status: 503 });
        }
        if let Ok(mut chars) = self.submitted_chars.lock() {
            *chars = Some(text.chars().count());
        }
        Ok("mock-session".into())
    }

    fn poll(&self, _token: &str) -> Result<PollStatus, AnnotationError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.ready_on_poll {
            Ok(PollStatus::Ready(self.annotations.clone()))
        } else {
            Ok(PollStatus::NotReady)
        }
    }
}
