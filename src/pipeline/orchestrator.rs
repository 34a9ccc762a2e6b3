//! Runs one analysis request through the stages its report variant needs
//! and assembles the report.
//!
//! ```text
//! resolve -> extract -> [OCR -> caption] -> assemble text
//!         -> summary / sections / key terms / questions / annotation
//!         -> report -> [persist]
//! ```
//!
//! Every stage checks the session first. Per-item work (images, questions)
//! runs on a bounded worker pool; each item is its own failure domain and
//! results keep input order. Work already dispatched when the session
//! expires finishes, then its results are discarded.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use rayon::prelude::*;
use serde_json::Value;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use super::annotation::annotate;
use super::caption::CAPTION_FAILED_MARKER;
use super::extraction::ExtractionError;
use super::model::{TextCapability, CAPABILITY_UNAVAILABLE_MARKER};
use super::source::{resolve, DocumentSource, RemoteFetcher, SourceError};
use super::text::{
    extract_key_terms, extract_sections, extractive_summary, truncate_chars, SectionName,
};
use super::types::*;
use crate::audit::AuditAction;
use crate::config::AppConfig;
use crate::identity::fingerprint_text;
use crate::questions::resolve_questions;
use crate::report::*;
use crate::session::{Session, SessionError};
use crate::store::SavedArtifact;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Could not load document: {0}")]
    Source(#[from] SourceError),

    #[error("Could not extract document: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Worker pool could not be built: {0}")]
    WorkerPool(String),
}

impl PipelineError {
    /// Timeouts (and TLS failures, which carry a remediation hint) may
    /// succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// One analysis request.
#[derive(Debug)]
pub struct AnalysisRequest {
    pub source: DocumentSource,
    pub variant: ReportVariant,
    /// Empty means the default research questions.
    pub questions: Vec<String>,
    /// Directory the report is persisted into, if any.
    pub output_dir: Option<PathBuf>,
}

impl AnalysisRequest {
    pub fn new(source: DocumentSource, variant: ReportVariant) -> Self {
        Self {
            source,
            variant,
            questions: Vec::new(),
            output_dir: None,
        }
    }

    pub fn with_questions(mut self, questions: Vec<String>) -> Self {
        self.questions = questions;
        self
    }

    pub fn persist_to(mut self, dir: PathBuf) -> Self {
        self.output_dir = Some(dir);
        self
    }
}

/// A finished run. Persistence failures never cost the caller the report.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub report: AnalysisReport,
    pub saved: Option<SavedArtifact>,
    pub save_error: Option<String>,
}

struct AnnotationStage {
    annotations: Vec<Value>,
    error: Option<String>,
    external_api_used: bool,
}

/// Composes the collaborators. Built once per process and shared by every
/// session; holds no per-request state.
pub struct AnalysisPipeline {
    config: AppConfig,
    fetcher: RemoteFetcher,
    extractor: Arc<dyn DocumentExtractor>,
    ocr: Option<Arc<dyn OcrEngine>>,
    captioner: Option<Arc<dyn ImageCaptioner>>,
    text: TextCapability,
    annotation: Option<Arc<dyn AnnotationService>>,
    pool: rayon::ThreadPool,
}

impl AnalysisPipeline {
    pub fn new(
        config: AppConfig,
        extractor: Arc<dyn DocumentExtractor>,
        text: TextCapability,
    ) -> Result<Self, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("analysis-worker-{i}"))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
        let fetcher = RemoteFetcher::new(config.fetch_timeout, config.max_download_bytes);
        Ok(Self {
            config,
            fetcher,
            extractor,
            ocr: None,
            captioner: None,
            text,
            annotation: None,
            pool,
        })
    }

    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn with_captioner(mut self, captioner: Arc<dyn ImageCaptioner>) -> Self {
        self.captioner = Some(captioner);
        self
    }

    pub fn with_annotation(mut self, service: Arc<dyn AnnotationService>) -> Self {
        self.annotation = Some(service);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn text_capability(&self) -> &TextCapability {
        &self.text
    }

    /// Run `request` inside `session`.
    ///
    /// Fails only for run-global problems: an inactive session, an
    /// unreadable document, or extraction failing outright. Everything else
    /// degrades into markers inside the report.
    pub fn run(
        &self,
        session: &mut Session,
        request: AnalysisRequest,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let AnalysisRequest {
            source,
            variant,
            questions,
            output_dir,
        } = request;
        let user = session.user_id().to_string();
        let source_kind = source.kind();

        // ── Resolve ──
        session.ensure_active()?;
        let handle = match resolve(source, &self.fetcher) {
            Ok(handle) => handle,
            Err(e) => {
                session
                    .audit()
                    .record_access(&user, AuditAction::DocumentLoad, source_kind.as_str(), false);
                tracing::warn!(
                    source = source_kind.as_str(),
                    retryable = e.is_retryable(),
                    "Document load failed: {e}"
                );
                return Err(e.into());
            }
        };
        let hash = handle.hash();
        session.register_document(handle.fingerprint());
        session
            .audit()
            .record_access(&user, AuditAction::DocumentLoad, handle.display_name(), true);
        session
            .audit()
            .record_processing_event(&user, &hash, AuditAction::DocumentLoad);
        tracing::info!(
            document = %hash,
            variant = %variant,
            bytes = handle.bytes().len(),
            "Document loaded"
        );

        // ── Extract ──
        session.ensure_active()?;
        let content = match self.extractor.extract(&handle) {
            Ok(content) => content,
            Err(e) => {
                record_failure(session, &hash, "extraction", &e);
                return Err(e.into());
            }
        };
        session
            .audit()
            .record_processing_event(&user, &hash, AuditAction::TextExtraction);
        tracing::info!(
            document = %hash,
            pages = content.pages.len(),
            skipped = content.skipped_pages.len(),
            images = content.images.len(),
            "Extraction finished"
        );
        let document_info = DocumentInfo {
            source_name: handle.display_name().to_string(),
            total_pages: content.pages.len(),
            skipped_pages: content.skipped_pages.clone(),
            total_chars: content.page_chars(),
            total_images: content.images.len(),
        };
        drop(handle);
        session.hold_content(content);

        // ── Images ──
        let (ocr_available, captioning_available) = if variant.needs_images() {
            (
                self.ocr_stage(session, &hash)?,
                self.caption_stage(session, &hash)?,
            )
        } else {
            (false, false)
        };

        // ── Assemble text ──
        session.ensure_active()?;
        let combined = Zeroizing::new(
            session
                .content()
                .map(ExtractedContent::combined_text)
                .unwrap_or_default(),
        );
        tracing::debug!(
            document = %hash,
            text_fingerprint = %fingerprint_text(&combined),
            chars = combined.chars().count(),
            "Text assembled"
        );

        // ── Analyse ──
        let mut external_api_used = false;
        let report = match variant {
            ReportVariant::Full => {
                let summary = self.summary_stage(session, &hash, &combined)?;
                let key_terms = extract_key_terms(&combined);
                let sections = self.section_names(session);
                let answers = self.question_stage(session, &hash, &questions, &combined)?;
                let (image_analysis, ocr_chars) = match session.content() {
                    Some(content) => (
                        ImageAnalysis {
                            total_images: content.images.len(),
                            images_with_text: content.images_with_text(),
                            ocr_available,
                            captioning_available,
                            ocr: content.ocr.clone(),
                            captions: content.captions.clone(),
                        },
                        content.ocr_chars(),
                    ),
                    None => return Err(SessionError::Closed.into()),
                };
                let statistics = Statistics {
                    total_text_chars: combined.chars().count(),
                    ocr_text_chars: ocr_chars,
                    questions_processed: answers.len(),
                    sections_identified: sections.len(),
                    key_terms_extracted: key_terms.len(),
                };
                ReportBody::Full {
                    document_info,
                    text_analysis: TextAnalysis {
                        summary,
                        key_terms: report_key_terms(&key_terms),
                        sections,
                    },
                    image_analysis,
                    question_responses: answers,
                    statistics,
                }
            }
            ReportVariant::SummaryOnly => {
                let summary = self.summary_stage(session, &hash, &combined)?;
                ReportBody::SummaryOnly {
                    document_info,
                    summary,
                    key_terms: report_key_terms(&extract_key_terms(&combined)),
                    sections: self.section_names(session),
                }
            }
            ReportVariant::QaOnly => ReportBody::QaOnly {
                document_info,
                question_responses: self.question_stage(session, &hash, &questions, &combined)?,
            },
            ReportVariant::AnnotationOnly => {
                let stage = self.annotation_stage(session, &hash, &combined)?;
                external_api_used = stage.external_api_used;
                ReportBody::AnnotationOnly {
                    document_info,
                    annotations: stage.annotations,
                    annotation_error: stage.error,
                }
            }
        };

        let report = AnalysisReport {
            compliance: ComplianceMetadata {
                processed_locally: !external_api_used,
                external_api_used,
                encrypted_storage: session.is_encrypted(),
                audit_logged: true,
                audit_durable: session.audit().is_durable(),
                user_id: user.clone(),
                session_id: session.id(),
                document_hash: hash.clone(),
                processing_timestamp: Utc::now(),
            },
            report,
        };

        // ── Persist ──
        let (saved, save_error) = match output_dir {
            Some(dir) => {
                session.ensure_active()?;
                let target = dir.join(variant.file_name());
                match session.store().save(&report, &target) {
                    Ok(artifact) => (Some(artifact), None),
                    Err(e) => {
                        record_failure(session, &hash, "persistence", &e);
                        (None, Some(e.to_string()))
                    }
                }
            }
            None => (None, None),
        };

        session
            .audit()
            .record_processing_event(&user, &hash, AuditAction::AnalysisComplete);
        session.release_content();
        tracing::info!(
            document = %hash,
            variant = %variant,
            degraded = report.is_degraded(),
            persisted = saved.is_some(),
            "Analysis complete"
        );

        Ok(AnalysisOutcome {
            report,
            saved,
            save_error,
        })
    }

    // ═══════════════════════════════════════════════════════════
    // Stages
    // ═══════════════════════════════════════════════════════════

    /// Returns whether OCR was available.
    fn ocr_stage(&self, session: &mut Session, hash: &str) -> Result<bool, PipelineError> {
        let Some(engine) = self.ocr.as_ref().filter(|_| self.config.ocr_enabled) else {
            return Ok(false);
        };
        if !engine.is_available() {
            tracing::warn!(document = %hash, "OCR engine not available, skipping image text");
            return Ok(false);
        }

        session.ensure_active()?;
        let mut records = match session.content() {
            Some(content) if !content.images.is_empty() => self.for_each_isolated(
                &content.images,
                |image| match engine.recognize(image) {
                    Ok(text) => OcrResult {
                        page_number: image.page_number,
                        image_index: image.index,
                        text: text.trim().to_string(),
                        error: None,
                    },
                    Err(e) => OcrResult {
                        page_number: image.page_number,
                        image_index: image.index,
                        text: String::new(),
                        error: Some(e.to_string()),
                    },
                },
                |image| OcrResult {
                    page_number: image.page_number,
                    image_index: image.index,
                    text: String::new(),
                    error: Some("OCR worker panicked".to_string()),
                },
            ),
            _ => return Ok(true),
        };

        if let Err(e) = session.ensure_active() {
            records.zeroize();
            return Err(e.into());
        }
        let failed = records.iter().filter(|r| r.error.is_some()).count();
        let total = records.len();
        if let Some(content) = session.content_mut() {
            content.ocr = records;
        }
        session
            .audit()
            .record_processing_event(session.user_id(), hash, AuditAction::OcrProcessing);
        tracing::info!(document = %hash, images = total, failed, "OCR finished");
        Ok(true)
    }

    /// Returns whether captioning was available.
    fn caption_stage(&self, session: &mut Session, hash: &str) -> Result<bool, PipelineError> {
        let Some(captioner) = self
            .captioner
            .as_ref()
            .filter(|_| self.config.captioning_enabled)
        else {
            return Ok(false);
        };
        if !captioner.is_available() {
            tracing::warn!(document = %hash, "Captioning model not available, skipping captions");
            return Ok(false);
        }

        session.ensure_active()?;
        let mut records = match session.content() {
            Some(content) if !content.images.is_empty() => self.for_each_isolated(
                &content.images,
                |image| match captioner.caption(image) {
                    Ok(caption) => CaptionResult {
                        page_number: image.page_number,
                        image_index: image.index,
                        caption,
                        error: None,
                    },
                    Err(e) => CaptionResult {
                        page_number: image.page_number,
                        image_index: image.index,
                        caption: CAPTION_FAILED_MARKER.to_string(),
                        error: Some(e.to_string()),
                    },
                },
                |image| CaptionResult {
                    page_number: image.page_number,
                    image_index: image.index,
                    caption: CAPTION_FAILED_MARKER.to_string(),
                    error: Some("caption worker panicked".to_string()),
                },
            ),
            _ => return Ok(true),
        };

        if let Err(e) = session.ensure_active() {
            records.zeroize();
            return Err(e.into());
        }
        let failed = records.iter().filter(|r| r.error.is_some()).count();
        let total = records.len();
        if let Some(content) = session.content_mut() {
            content.captions = records;
        }
        session
            .audit()
            .record_processing_event(session.user_id(), hash, AuditAction::ImageAnalysis);
        tracing::info!(document = %hash, images = total, failed, "Captioning finished");
        Ok(true)
    }

    fn summary_stage(
        &self,
        session: &mut Session,
        hash: &str,
        text: &str,
    ) -> Result<SummaryRecord, PipelineError> {
        session.ensure_active()?;
        let record = summarize(&self.text, text);
        session.ensure_active()?;
        session
            .audit()
            .record_processing_event(session.user_id(), hash, AuditAction::Summarization);
        tracing::info!(document = %hash, method = ?record.method, "Summarization finished");
        Ok(record)
    }

    fn question_stage(
        &self,
        session: &mut Session,
        hash: &str,
        requested: &[String],
        context: &str,
    ) -> Result<Vec<AnswerRecord>, PipelineError> {
        let questions = resolve_questions(requested);
        session.ensure_active()?;

        let mut records = match &self.text {
            TextCapability::Available(model) => self.for_each_isolated(
                &questions,
                |question| answer_one(model.as_ref(), question, context),
                |question| AnswerRecord {
                    question: question.clone(),
                    answer: ANSWER_FAILED_MARKER.to_string(),
                    method: AnswerMethod::Error,
                    error: Some("question worker panicked".to_string()),
                },
            ),
            TextCapability::Unavailable { reason } => questions
                .iter()
                .map(|question| AnswerRecord {
                    question: question.clone(),
                    answer: CAPABILITY_UNAVAILABLE_MARKER.to_string(),
                    method: AnswerMethod::Unavailable,
                    error: Some(reason.clone()),
                })
                .collect(),
        };

        if let Err(e) = session.ensure_active() {
            records.iter_mut().for_each(|r| r.answer.zeroize());
            return Err(e.into());
        }
        let failed = records
            .iter()
            .filter(|r| r.method != AnswerMethod::Model)
            .count();
        session
            .audit()
            .record_processing_event(session.user_id(), hash, AuditAction::QuestionAnswering);
        tracing::info!(
            document = %hash,
            questions = records.len(),
            failed,
            "Question answering finished"
        );
        Ok(records)
    }

    fn annotation_stage(
        &self,
        session: &mut Session,
        hash: &str,
        text: &str,
    ) -> Result<AnnotationStage, PipelineError> {
        let Some(service) = self.annotation.as_ref() else {
            return Ok(AnnotationStage {
                annotations: Vec::new(),
                error: Some("annotation service not configured".to_string()),
                external_api_used: false,
            });
        };
        if text.is_empty() {
            return Ok(AnnotationStage {
                annotations: Vec::new(),
                error: Some("no text to annotate".to_string()),
                external_api_used: false,
            });
        }

        session.ensure_active()?;
        let settings = &self.config.annotation;
        let excerpt = truncate_chars(text, settings.max_chars);
        tracing::warn!(
            document = %hash,
            chars = excerpt.chars().count(),
            "Sending document text to external annotation service"
        );
        let result = annotate(
            service.as_ref(),
            excerpt,
            settings.poll_attempts,
            settings.poll_interval,
        );
        session.ensure_active()?;

        let user = session.user_id();
        let stage = match result {
            Ok(annotations) => {
                session
                    .audit()
                    .record_processing_event(user, hash, AuditAction::ExternalAnnotation);
                tracing::info!(document = %hash, count = annotations.len(), "Annotation finished");
                AnnotationStage {
                    annotations,
                    error: None,
                    external_api_used: true,
                }
            }
            Err(e) => {
                session
                    .audit()
                    .record_access(user, AuditAction::ExternalAnnotation, hash, false);
                tracing::warn!(document = %hash, "Annotation failed: {e}");
                AnnotationStage {
                    annotations: Vec::new(),
                    error: Some(e.to_string()),
                    external_api_used: true,
                }
            }
        };
        Ok(stage)
    }

    fn section_names(&self, session: &Session) -> Vec<SectionName> {
        let raw = Zeroizing::new(
            session
                .content()
                .map(ExtractedContent::page_text)
                .unwrap_or_default(),
        );
        extract_sections(&raw).into_iter().map(|s| s.name).collect()
    }

    /// Map `work` over `items` on the worker pool. A panicking item becomes
    /// `on_panic(item)`; output order is input order.
    fn for_each_isolated<T, R>(
        &self,
        items: &[T],
        work: impl Fn(&T) -> R + Sync,
        on_panic: impl Fn(&T) -> R + Sync,
    ) -> Vec<R>
    where
        T: Sync,
        R: Send,
    {
        self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    catch_unwind(AssertUnwindSafe(|| work(item))).unwrap_or_else(|_| on_panic(item))
                })
                .collect()
        })
    }
}

fn summarize(capability: &TextCapability, text: &str) -> SummaryRecord {
    let model = match capability {
        TextCapability::Available(model) => model,
        TextCapability::Unavailable { reason } => {
            return SummaryRecord {
                text: CAPABILITY_UNAVAILABLE_MARKER.to_string(),
                method: SummaryMethod::Unavailable,
                model: None,
                error: Some(reason.clone()),
            }
        }
    };

    let error = match model.summarize(text) {
        Ok(summary) if !summary.trim().is_empty() => {
            return SummaryRecord {
                text: summary,
                method: SummaryMethod::Model,
                model: Some(model.name().to_string()),
                error: None,
            }
        }
        Ok(_) => "model returned an empty summary".to_string(),
        Err(e) => e.to_string(),
    };
    tracing::warn!(model = model.name(), "Summarization failed, using extractive fallback: {error}");
    SummaryRecord {
        text: extractive_summary(text),
        method: SummaryMethod::ExtractiveFallback,
        model: Some(model.name().to_string()),
        error: Some(error),
    }
}

fn answer_one(model: &dyn TextModel, question: &str, context: &str) -> AnswerRecord {
    match model.answer(question, context) {
        Ok(answer) => AnswerRecord {
            question: question.to_string(),
            answer,
            method: AnswerMethod::Model,
            error: None,
        },
        Err(e) => AnswerRecord {
            question: question.to_string(),
            answer: ANSWER_FAILED_MARKER.to_string(),
            method: AnswerMethod::Error,
            error: Some(e.to_string()),
        },
    }
}

fn record_failure(session: &Session, hash: &str, stage: &str, error: &dyn std::fmt::Display) {
    session
        .audit()
        .record_access(session.user_id(), AuditAction::ProcessingError, hash, false);
    tracing::error!(document = %hash, stage, "Pipeline stage failed: {error}");
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::audit::{AuditLog, Outcome};
    use crate::pipeline::mock::*;
    use crate::questions::DEFAULT_QUESTIONS;

    const PAGE_ONE: &str =
        "Abstract: We enrolled 240 adults in a sleep trial.\nIntroduction\nSleep matters for health.";
    const PAGE_TWO: &str = "Methods: randomised controlled trial.\nResults\n\
        Participants slept longer. Sleep improved mood.\nConclusion: more sleep helps.\n\
        References\n[1] Someone.";

    fn config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::with_data_dir(dir.to_path_buf());
        config.workers = 2;
        config.annotation.poll_interval = Duration::ZERO;
        config.annotation.poll_attempts = 2;
        config
    }

    fn pipeline_with(config: AppConfig, extractor: MockExtractor, text: TextCapability) -> AnalysisPipeline {
        AnalysisPipeline::new(config, Arc::new(extractor), text).unwrap()
    }

    fn pipeline(dir: &Path, extractor: MockExtractor, text: TextCapability) -> AnalysisPipeline {
        pipeline_with(config(dir), extractor, text)
    }

    fn available(model: MockTextModel) -> TextCapability {
        TextCapability::Available(Arc::new(model))
    }

    fn open(pipeline: &AnalysisPipeline, secret: Option<&str>) -> (Session, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::console());
        let session = Session::open(
            "alice",
            secret.map(str::to_string),
            pipeline.config(),
            Arc::clone(&audit),
        );
        (session, audit)
    }

    fn upload(bytes: &[u8]) -> DocumentSource {
        DocumentSource::UploadedBytes {
            name: Some("paper.pdf".into()),
            bytes: bytes.to_vec(),
        }
    }

    fn paper() -> MockExtractor {
        MockExtractor::with_pages(&[PAGE_ONE, PAGE_TWO])
    }

    fn with_images(count: usize) -> MockExtractor {
        let mut content = ExtractedContent {
            pages: vec![PageText {
                page_number: 1,
                text: PAGE_ONE.to_string(),
            }],
            ..Default::default()
        };
        content.images = (0..count).map(|i| image(1, i)).collect();
        MockExtractor::with_content(content)
    }

    fn actions(audit: &AuditLog) -> Vec<AuditAction> {
        audit.recent().iter().map(|r| r.action).collect()
    }

    #[test]
    fn full_report_without_images_has_empty_image_sections() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), paper(), available(MockTextModel::new("m")))
            .with_ocr(Arc::new(MockOcrEngine::new()))
            .with_captioner(Arc::new(MockCaptioner::new()));
        let (mut session, _audit) = open(&pipeline, None);

        let outcome = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"%PDF-1.7"), ReportVariant::Full))
            .unwrap();

        let ReportBody::Full {
            document_info,
            text_analysis,
            image_analysis,
            question_responses,
            statistics,
        } = outcome.report.report
        else {
            panic!("expected full report");
        };
        assert_eq!(document_info.source_name, "paper.pdf");
        assert_eq!(document_info.total_pages, 2);
        assert_eq!(image_analysis.total_images, 0);
        assert!(image_analysis.ocr.is_empty());
        assert!(image_analysis.captions.is_empty());
        assert_eq!(text_analysis.summary.method, SummaryMethod::Model);
        assert!(text_analysis.sections.contains(&SectionName::Abstract));
        assert!(text_analysis.sections.contains(&SectionName::Conclusion));
        assert!(text_analysis.key_terms.contains(&"sleep".to_string()));
        assert!(text_analysis.key_terms.len() <= REPORT_KEY_TERMS);
        assert_eq!(question_responses.len(), DEFAULT_QUESTIONS.len());
        assert_eq!(statistics.questions_processed, DEFAULT_QUESTIONS.len());
        assert_eq!(statistics.ocr_text_chars, 0);
        assert!(outcome.report.compliance.processed_locally);
        assert!(!outcome.report.compliance.external_api_used);
        assert!(outcome.report.compliance.audit_logged);
        assert!(!outcome.report.compliance.audit_durable);
        assert!(outcome.saved.is_none());
    }

    #[test]
    fn compliance_reports_durable_audit_file() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), paper(), available(MockTextModel::new("m")));
        let audit = Arc::new(AuditLog::open(&dir.path().join("audit.log")));
        let mut session = Session::open("alice", None, pipeline.config(), audit);

        let outcome = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"%PDF-1.7"), ReportVariant::SummaryOnly))
            .unwrap();
        assert!(outcome.report.compliance.audit_durable);
    }

    #[test]
    fn unavailable_model_yields_markers_not_failure() {
        let dir = tempfile::tempdir().unwrap();
        let text = TextCapability::Unavailable {
            reason: "no model".into(),
        };
        let pipeline = pipeline(dir.path(), paper(), text);
        let (mut session, _audit) = open(&pipeline, None);

        let outcome = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::Full))
            .unwrap();

        let summary = outcome.report.summary().unwrap();
        assert_eq!(summary.text, CAPABILITY_UNAVAILABLE_MARKER);
        assert_eq!(summary.method, SummaryMethod::Unavailable);
        let answers = outcome.report.answers();
        assert_eq!(answers.len(), DEFAULT_QUESTIONS.len());
        assert!(answers
            .iter()
            .all(|a| a.answer == CAPABILITY_UNAVAILABLE_MARKER && a.method == AnswerMethod::Unavailable));
        assert!(outcome.report.is_degraded());
    }

    #[test]
    fn ocr_failures_are_isolated_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = Arc::new(MockOcrEngine::new().failing_on(1).panicking_on(2));
        let pipeline = pipeline(dir.path(), with_images(4), available(MockTextModel::new("m")))
            .with_ocr(ocr.clone());
        let (mut session, audit) = open(&pipeline, None);

        let outcome = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::Full))
            .unwrap();

        let ReportBody::Full { image_analysis, statistics, .. } = outcome.report.report else {
            panic!("expected full report");
        };
        assert!(image_analysis.ocr_available);
        assert!(!image_analysis.captioning_available);
        let indices: Vec<usize> = image_analysis.ocr.iter().map(|r| r.image_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(image_analysis.ocr[0].text, "ocr p1 i0");
        assert!(image_analysis.ocr[1].text.is_empty());
        assert!(image_analysis.ocr[1].error.is_some());
        assert_eq!(image_analysis.ocr[2].error.as_deref(), Some("OCR worker panicked"));
        assert_eq!(image_analysis.ocr[3].text, "ocr p1 i3");
        assert_eq!(image_analysis.images_with_text, 2);
        assert_eq!(statistics.ocr_text_chars, "ocr p1 i0".len() * 2);
        assert_eq!(ocr.calls(), 4);
        assert!(actions(&audit).contains(&AuditAction::OcrProcessing));
    }

    #[test]
    fn caption_failure_records_marker() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), with_images(2), available(MockTextModel::new("m")))
            .with_captioner(Arc::new(MockCaptioner::new().failing_on(0)));
        let (mut session, audit) = open(&pipeline, None);

        let outcome = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::Full))
            .unwrap();

        let ReportBody::Full { image_analysis, .. } = outcome.report.report else {
            panic!("expected full report");
        };
        assert_eq!(image_analysis.captions[0].caption, CAPTION_FAILED_MARKER);
        assert!(image_analysis.captions[0].error.is_some());
        assert_eq!(image_analysis.captions[1].caption, "figure 1");
        assert!(actions(&audit).contains(&AuditAction::ImageAnalysis));
    }

    #[test]
    fn disabled_or_unavailable_ocr_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut disabled = config(dir.path());
        disabled.ocr_enabled = false;
        let ocr = Arc::new(MockOcrEngine::new());
        let skipping = pipeline_with(disabled, with_images(2), available(MockTextModel::new("m")))
            .with_ocr(ocr.clone());
        let (mut session, _audit) = open(&skipping, None);
        let outcome = skipping
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::Full))
            .unwrap();
        let ReportBody::Full { image_analysis, .. } = outcome.report.report else {
            panic!("expected full report");
        };
        assert!(!image_analysis.ocr_available);
        assert_eq!(image_analysis.total_images, 2);
        assert_eq!(ocr.calls(), 0);

        let pipeline = pipeline(dir.path(), with_images(2), available(MockTextModel::new("m")))
            .with_ocr(Arc::new(MockOcrEngine::unavailable()));
        let (mut session, _audit) = open(&pipeline, None);
        let outcome = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::Full))
            .unwrap();
        let ReportBody::Full { image_analysis, .. } = outcome.report.report else {
            panic!("expected full report");
        };
        assert!(!image_analysis.ocr_available);
        assert!(image_analysis.ocr.is_empty());
    }

    #[test]
    fn failed_summary_call_uses_extractive_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            paper(),
            available(MockTextModel::new("m").failing_summary()),
        );
        let (mut session, _audit) = open(&pipeline, None);

        let outcome = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::SummaryOnly))
            .unwrap();

        let summary = outcome.report.summary().unwrap();
        assert_eq!(summary.method, SummaryMethod::ExtractiveFallback);
        assert!(summary.text.starts_with("Abstract: We enrolled 240 adults"));
        assert!(summary.text.ends_with("..."));
        assert!(summary.error.is_some());
        assert!(outcome.report.answers().is_empty());
    }

    #[test]
    fn question_failure_is_isolated_and_order_kept() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            paper(),
            available(MockTextModel::new("m").failing_question("B?")),
        );
        let (mut session, audit) = open(&pipeline, None);
        let questions = vec!["A?".to_string(), "B?".to_string(), "C?".to_string()];

        let outcome = pipeline
            .run(
                &mut session,
                AnalysisRequest::new(upload(b"x"), ReportVariant::QaOnly).with_questions(questions),
            )
            .unwrap();

        let answers = outcome.report.answers();
        let asked: Vec<&str> = answers.iter().map(|a| a.question.as_str()).collect();
        assert_eq!(asked, vec!["A?", "B?", "C?"]);
        assert_eq!(answers[0].answer, "answer to A?");
        assert_eq!(answers[1].answer, ANSWER_FAILED_MARKER);
        assert_eq!(answers[1].method, AnswerMethod::Error);
        assert_eq!(answers[2].method, AnswerMethod::Model);
        assert!(outcome.report.summary().is_none());
        assert!(!actions(&audit).contains(&AuditAction::Summarization));
    }

    #[test]
    fn summary_only_asks_no_questions() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(MockTextModel::new("m"));
        let pipeline = pipeline(dir.path(), paper(), TextCapability::Available(model.clone()));
        let (mut session, _audit) = open(&pipeline, None);

        let outcome = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::SummaryOnly))
            .unwrap();

        assert_eq!(outcome.report.variant(), ReportVariant::SummaryOnly);
        assert!(model.questions_seen().is_empty());
    }

    #[test]
    fn audit_trail_follows_stage_order() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), paper(), available(MockTextModel::new("m")));
        let (mut session, audit) = open(&pipeline, None);

        pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::Full))
            .unwrap();

        assert_eq!(
            actions(&audit),
            vec![
                AuditAction::SessionStart,
                AuditAction::DocumentLoad,
                AuditAction::DocumentLoad,
                AuditAction::TextExtraction,
                AuditAction::Summarization,
                AuditAction::QuestionAnswering,
                AuditAction::AnalysisComplete,
            ]
        );
        assert!(session.content().is_none(), "content released after run");
    }

    #[test]
    fn expired_session_rejects_run_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.session_timeout = Duration::from_secs(1);
        let pipeline = pipeline_with(config, paper(), available(MockTextModel::new("m")));
        let (mut session, audit) = open(&pipeline, None);
        session.backdate_activity(Duration::from_secs(5));

        let err = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::Full))
            .unwrap_err();

        assert!(matches!(err, PipelineError::Session(SessionError::Expired { .. })));
        assert!(!err.is_retryable());
        assert!(!actions(&audit).contains(&AuditAction::DocumentLoad));
        assert!(actions(&audit).contains(&AuditAction::SessionTimeout));
    }

    const SHORT_TIMEOUT: Duration = Duration::from_millis(200);
    const SLOW_ITEM: Duration = Duration::from_millis(600);

    #[test]
    fn expiry_during_ocr_discards_results_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");
        let mut config = config(dir.path());
        config.session_timeout = SHORT_TIMEOUT;
        let ocr = Arc::new(MockOcrEngine::new().slow(SLOW_ITEM));
        let pipeline = pipeline_with(config, with_images(2), available(MockTextModel::new("m")))
            .with_ocr(ocr.clone());
        let (mut session, audit) = open(&pipeline, None);

        let err = pipeline
            .run(
                &mut session,
                AnalysisRequest::new(upload(b"%PDF-1.7"), ReportVariant::Full).persist_to(out.clone()),
            )
            .unwrap_err();

        assert!(matches!(err, PipelineError::Session(SessionError::Expired { .. })));
        assert_eq!(ocr.calls(), 2, "dispatched items run to completion");
        assert!(session.content().is_none());
        assert!(!out.exists(), "no report persisted");
        let actions = actions(&audit);
        assert!(actions.contains(&AuditAction::SessionTimeout));
        assert!(!actions.contains(&AuditAction::OcrProcessing));
        assert!(!actions.contains(&AuditAction::AnalysisComplete));
    }

    #[test]
    fn expiry_during_question_answering_discards_answers_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");
        let mut config = config(dir.path());
        config.session_timeout = SHORT_TIMEOUT;
        let model = MockTextModel::new("m").slow_answers(SLOW_ITEM);
        let pipeline = pipeline_with(config, paper(), available(model));
        let (mut session, audit) = open(&pipeline, None);

        let err = pipeline
            .run(
                &mut session,
                AnalysisRequest::new(upload(b"%PDF-1.7"), ReportVariant::QaOnly)
                    .with_questions(vec!["Sample size?".into()])
                    .persist_to(out.clone()),
            )
            .unwrap_err();

        assert!(matches!(err, PipelineError::Session(SessionError::Expired { .. })));
        assert_eq!(session.state(), crate::session::SessionState::Expired);
        assert!(session.content().is_none());
        assert!(!out.exists());
        let actions = actions(&audit);
        assert!(!actions.contains(&AuditAction::QuestionAnswering));
        assert!(!actions.contains(&AuditAction::ReportSave));
    }

    #[test]
    fn missing_file_fails_with_audited_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), paper(), available(MockTextModel::new("m")));
        let (mut session, audit) = open(&pipeline, None);
        let source = DocumentSource::LocalPath(dir.path().join("absent.pdf"));

        let err = pipeline
            .run(&mut session, AnalysisRequest::new(source, ReportVariant::Full))
            .unwrap_err();

        assert!(matches!(err, PipelineError::Source(SourceError::NotFound(_))));
        let load = audit
            .recent()
            .into_iter()
            .find(|r| r.action == AuditAction::DocumentLoad)
            .unwrap();
        assert_eq!(load.outcome, Outcome::Failure);
        assert_eq!(load.resource, "local_path");
    }

    #[test]
    fn extraction_failure_is_run_global() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), MockExtractor::failing(), available(MockTextModel::new("m")));
        let (mut session, audit) = open(&pipeline, None);

        let err = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::Full))
            .unwrap_err();

        assert!(matches!(err, PipelineError::Extraction(_)));
        assert!(actions(&audit).contains(&AuditAction::ProcessingError));
    }

    #[test]
    fn identical_content_shares_hash_but_is_audited_twice() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), paper(), available(MockTextModel::new("m")));
        let (mut session, audit) = open(&pipeline, None);

        let first = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"same"), ReportVariant::QaOnly))
            .unwrap();
        let second = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"same"), ReportVariant::QaOnly))
            .unwrap();

        assert_eq!(
            first.report.compliance.document_hash,
            second.report.compliance.document_hash
        );
        assert_eq!(session.documents().len(), 2);
        let loads = actions(&audit)
            .into_iter()
            .filter(|a| *a == AuditAction::DocumentLoad)
            .count();
        assert_eq!(loads, 4, "access + processing record per run");
    }

    #[test]
    fn annotation_report_marks_external_use_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.annotation.max_chars = 10;
        let service = Arc::new(MockAnnotationService::ready_after(
            1,
            vec![serde_json::json!({"text": "sleep", "type": "Disease"})],
        ));
        let pipeline = pipeline_with(config, paper(), available(MockTextModel::new("m")))
            .with_annotation(service.clone());
        let (mut session, audit) = open(&pipeline, None);

        let outcome = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::AnnotationOnly))
            .unwrap();

        let compliance = &outcome.report.compliance;
        assert!(compliance.external_api_used);
        assert!(!compliance.processed_locally);
        let ReportBody::AnnotationOnly {
            annotations,
            annotation_error,
            ..
        } = &outcome.report.report
        else {
            panic!("expected annotation report");
        };
        assert_eq!(annotations.len(), 1);
        assert!(annotation_error.is_none());
        assert_eq!(service.submitted_chars(), Some(10));
        assert!(actions(&audit).contains(&AuditAction::ExternalAnnotation));
    }

    #[test]
    fn annotation_failure_is_a_report_field() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), paper(), available(MockTextModel::new("m")))
            .with_annotation(Arc::new(MockAnnotationService::failing()));
        let (mut session, _audit) = open(&pipeline, None);

        let outcome = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::AnnotationOnly))
            .unwrap();

        let ReportBody::AnnotationOnly { annotation_error, .. } = &outcome.report.report else {
            panic!("expected annotation report");
        };
        assert!(annotation_error.as_deref().unwrap().contains("503"));
        assert!(outcome.report.is_degraded());
    }

    #[test]
    fn annotation_without_service_stays_local() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), paper(), available(MockTextModel::new("m")));
        let (mut session, _audit) = open(&pipeline, None);

        let outcome = pipeline
            .run(&mut session, AnalysisRequest::new(upload(b"x"), ReportVariant::AnnotationOnly))
            .unwrap();

        assert!(outcome.report.compliance.processed_locally);
        assert!(outcome.report.is_degraded());
    }

    #[test]
    fn encrypted_report_round_trips_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");
        std::fs::create_dir_all(&out).unwrap();
        let pipeline = pipeline(dir.path(), paper(), available(MockTextModel::new("m")));
        let (mut session, audit) = open(&pipeline, Some("correct horse"));

        let outcome = pipeline
            .run(
                &mut session,
                AnalysisRequest::new(upload(b"x"), ReportVariant::QaOnly).persist_to(out.clone()),
            )
            .unwrap();

        let saved = outcome.saved.unwrap();
        assert!(saved.encrypted);
        assert!(!saved.used_fallback);
        assert_eq!(saved.path, out.join("qa_analysis.json.enc"));
        assert!(outcome.report.compliance.encrypted_storage);
        assert!(actions(&audit).contains(&AuditAction::ReportSave));

        let loaded: AnalysisReport = session
            .store()
            .load(&out.join("qa_analysis.json"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded, outcome.report);
    }

    #[test]
    fn pipeline_error_retryability() {
        assert!(PipelineError::Source(SourceError::Timeout(Duration::from_secs(30))).is_retryable());
        assert!(!PipelineError::Source(SourceError::Empty).is_retryable());
        assert!(!PipelineError::Session(SessionError::Closed).is_retryable());
    }
}
