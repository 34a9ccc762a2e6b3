//! Report shapes: compliance metadata plus exactly the outputs the
//! requested variant asks for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::pipeline::text::SectionName;
use crate::pipeline::{CaptionResult, OcrResult};

/// Key terms listed in reports (extraction keeps more).
pub const REPORT_KEY_TERMS: usize = 15;

/// Answer recorded when a single question fails.
pub const ANSWER_FAILED_MARKER: &str = "Unable to process question securely";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportVariant {
    Full,
    SummaryOnly,
    QaOnly,
    AnnotationOnly,
}

impl ReportVariant {
    pub const ALL: [ReportVariant; 4] = [
        Self::Full,
        Self::SummaryOnly,
        Self::QaOnly,
        Self::AnnotationOnly,
    ];

    /// Logical key under which the variant is persisted.
    pub fn artifact_name(&self) -> &'static str {
        match self {
            Self::Full => "full_analysis",
            Self::SummaryOnly => "summary_analysis",
            Self::QaOnly => "qa_analysis",
            Self::AnnotationOnly => "annotation_analysis",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.artifact_name())
    }

    pub fn needs_images(&self) -> bool {
        matches!(self, Self::Full)
    }

    pub fn needs_summary(&self) -> bool {
        matches!(self, Self::Full | Self::SummaryOnly)
    }

    pub fn needs_questions(&self) -> bool {
        matches!(self, Self::Full | Self::QaOnly)
    }

    pub fn needs_annotation(&self) -> bool {
        matches!(self, Self::AnnotationOnly)
    }
}

impl std::fmt::Display for ReportVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.artifact_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceMetadata {
    pub processed_locally: bool,
    pub external_api_used: bool,
    pub encrypted_storage: bool,
    pub audit_logged: bool,
    /// False when the audit trail fell back to the console sink.
    pub audit_durable: bool,
    pub user_id: String,
    pub session_id: Uuid,
    pub document_hash: String,
    pub processing_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMethod {
    Model,
    ExtractiveFallback,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub text: String,
    pub method: SummaryMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMethod {
    Model,
    Unavailable,
    Error,
}

/// One question and its outcome, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question: String,
    pub answer: String,
    pub method: AnswerMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Basename, "upload" or remote host.
    pub source_name: String,
    pub total_pages: usize,
    pub skipped_pages: Vec<usize>,
    pub total_chars: usize,
    pub total_images: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextAnalysis {
    pub summary: SummaryRecord,
    pub key_terms: Vec<String>,
    pub sections: Vec<SectionName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub total_images: usize,
    pub images_with_text: usize,
    pub ocr_available: bool,
    pub captioning_available: bool,
    pub ocr: Vec<OcrResult>,
    pub captions: Vec<CaptionResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_text_chars: usize,
    pub ocr_text_chars: usize,
    pub questions_processed: usize,
    pub sections_identified: usize,
    pub key_terms_extracted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum ReportBody {
    Full {
        document_info: DocumentInfo,
        text_analysis: TextAnalysis,
        image_analysis: ImageAnalysis,
        question_responses: Vec<AnswerRecord>,
        statistics: Statistics,
    },
    SummaryOnly {
        document_info: DocumentInfo,
        summary: SummaryRecord,
        key_terms: Vec<String>,
        sections: Vec<SectionName>,
    },
    QaOnly {
        document_info: DocumentInfo,
        question_responses: Vec<AnswerRecord>,
    },
    AnnotationOnly {
        document_info: DocumentInfo,
        annotations: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        annotation_error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub compliance: ComplianceMetadata,
    pub report: ReportBody,
}

impl AnalysisReport {
    pub fn variant(&self) -> ReportVariant {
        match self.report {
            ReportBody::Full { .. } => ReportVariant::Full,
            ReportBody::SummaryOnly { .. } => ReportVariant::SummaryOnly,
            ReportBody::QaOnly { .. } => ReportVariant::QaOnly,
            ReportBody::AnnotationOnly { .. } => ReportVariant::AnnotationOnly,
        }
    }

    pub fn document_info(&self) -> &DocumentInfo {
        match &self.report {
            ReportBody::Full { document_info, .. }
            | ReportBody::SummaryOnly { document_info, .. }
            | ReportBody::QaOnly { document_info, .. }
            | ReportBody::AnnotationOnly { document_info, .. } => document_info,
        }
    }

    pub fn summary(&self) -> Option<&SummaryRecord> {
        match &self.report {
            ReportBody::Full { text_analysis, .. } => Some(&text_analysis.summary),
            ReportBody::SummaryOnly { summary, .. } => Some(summary),
            _ => None,
        }
    }

    pub fn answers(&self) -> &[AnswerRecord] {
        match &self.report {
            ReportBody::Full { question_responses, .. }
            | ReportBody::QaOnly { question_responses, .. } => question_responses,
            _ => &[],
        }
    }

    /// True when any requested output carries an unavailable or error marker.
    pub fn is_degraded(&self) -> bool {
        let summary_degraded = self
            .summary()
            .is_some_and(|s| s.method != SummaryMethod::Model);
        let answers_degraded = self.answers().iter().any(|a| a.method != AnswerMethod::Model);
        let annotation_failed = matches!(
            &self.report,
            ReportBody::AnnotationOnly { annotation_error: Some(_), .. }
        );
        summary_degraded || answers_degraded || annotation_failed
    }
}

/// Cap a key term list at the report length.
pub fn report_key_terms(terms: &[String]) -> Vec<String> {
    terms.iter().take(REPORT_KEY_TERMS).cloned().collect()
}
