//! Append-only audit trail of every security-relevant action.
//!
//! One line per record: `timestamp - LEVEL - message`. Records reference
//! documents only by fingerprint or basename, never by content.
//!
//! Writes never fail the caller. If the durable file cannot be opened or
//! written, the log switches to the console sink (tracing target `audit`)
//! and records that switch exactly once.

use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local};

/// Records kept in memory for inspection (most recent first out).
const RECENT_CAPACITY: usize = 1_000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Action tags written to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    SessionStart,
    SessionEnd,
    SessionTimeout,
    DocumentLoad,
    TextExtraction,
    OcrProcessing,
    ImageAnalysis,
    Summarization,
    QuestionAnswering,
    ExternalAnnotation,
    AnalysisComplete,
    ProcessingError,
    ReportSave,
    ReportLoad,
    ReportDelete,
    StorageFallback,
    AuditSinkFallback,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "SESSION_START",
            Self::SessionEnd => "SESSION_END",
            Self::SessionTimeout => "SESSION_TIMEOUT",
            Self::DocumentLoad => "DOCUMENT_LOAD",
            Self::TextExtraction => "TEXT_EXTRACTION",
            Self::OcrProcessing => "OCR_PROCESSING",
            Self::ImageAnalysis => "IMAGE_ANALYSIS",
            Self::Summarization => "SUMMARIZATION",
            Self::QuestionAnswering => "QUESTION_ANSWERING",
            Self::ExternalAnnotation => "EXTERNAL_ANNOTATION",
            Self::AnalysisComplete => "ANALYSIS_COMPLETE",
            Self::ProcessingError => "PROCESSING_ERROR",
            Self::ReportSave => "REPORT_SAVE",
            Self::ReportLoad => "REPORT_LOAD",
            Self::ReportDelete => "REPORT_DELETE",
            Self::StorageFallback => "STORAGE_FALLBACK",
            Self::AuditSinkFallback => "AUDIT_SINK_FALLBACK",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    fn level(&self) -> &'static str {
        match self {
            Self::Success => "INFO",
            Self::Failure => "WARNING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Access to a resource (session, file, report).
    Access,
    /// Processing of sensitive document content, referenced by hash.
    Processing,
}

/// A single audit record. Never mutated once written.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub timestamp: DateTime<Local>,
    pub kind: RecordKind,
    pub user_id: String,
    pub action: AuditAction,
    /// Basename, logical name or document hash. Never raw content.
    pub resource: String,
    pub outcome: Outcome,
}

impl AuditRecord {
    pub fn message(&self) -> String {
        match self.kind {
            RecordKind::Access => format!(
                "USER:{} ACTION:{} RESOURCE:{} STATUS:{}",
                escape_field(&self.user_id),
                self.action,
                escape_field(&self.resource),
                self.outcome.as_str()
            ),
            RecordKind::Processing => format!(
                "PHI_PROCESSING USER:{} DOC_HASH:{} ACTION:{}",
                escape_field(&self.user_id),
                escape_field(&self.resource),
                self.action
            ),
        }
    }

    /// Persisted line format: `timestamp - LEVEL - message`.
    pub fn to_line(&self) -> String {
        format!(
            "{} - {} - {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.outcome.level(),
            self.message()
        )
    }
}

/// Control characters are written as escapes so one record stays one line.
fn escape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_control() {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    out
}

enum Sink {
    File { path: PathBuf, file: File },
    Console,
}

struct AuditState {
    sink: Sink,
    fell_back: bool,
    recent: VecDeque<AuditRecord>,
}

/// Process-wide audit sink. Share it as `Arc<AuditLog>`.
pub struct AuditLog {
    state: Mutex<AuditState>,
}

impl AuditLog {
    /// Open (append) the durable audit file, creating parent directories.
    /// Falls back to the console sink when the file is not writable.
    pub fn open(path: &Path) -> Self {
        let log = Self::with_sink(Sink::Console);
        match open_append(path) {
            Ok(file) => {
                log.lock().sink = Sink::File {
                    path: path.to_path_buf(),
                    file,
                };
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "Audit log not writable: {e}");
                log.record_fallback("audit file unavailable");
            }
        }
        log
    }

    /// Ephemeral, console-only audit log.
    pub fn console() -> Self {
        Self::with_sink(Sink::Console)
    }

    fn with_sink(sink: Sink) -> Self {
        Self {
            state: Mutex::new(AuditState {
                sink,
                fell_back: false,
                recent: VecDeque::with_capacity(64),
            }),
        }
    }

    /// Record an access attempt or action on a named resource.
    pub fn record_access(&self, user: &str, action: AuditAction, resource: &str, success: bool) {
        let outcome = if success {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        self.append(AuditRecord {
            timestamp: Local::now(),
            kind: RecordKind::Access,
            user_id: user.to_string(),
            action,
            resource: resource.to_string(),
            outcome,
        });
    }

    /// Record processing of document content, referenced by its fingerprint.
    pub fn record_processing_event(&self, user: &str, document_hash: &str, action: AuditAction) {
        self.append(AuditRecord {
            timestamp: Local::now(),
            kind: RecordKind::Processing,
            user_id: user.to_string(),
            action,
            resource: document_hash.to_string(),
            outcome: Outcome::Success,
        });
    }

    /// Whether records currently go to the durable file.
    pub fn is_durable(&self) -> bool {
        matches!(self.lock().sink, Sink::File { .. })
    }

    /// Path of the durable sink, if any.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.lock().sink {
            Sink::File { path, .. } => Some(path.clone()),
            Sink::Console => None,
        }
    }

    /// Most recent records, oldest first.
    pub fn recent(&self) -> Vec<AuditRecord> {
        self.lock().recent.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, AuditState> {
        // A panic mid-write must not silence auditing for the rest of the process.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append(&self, record: AuditRecord) {
        let mut state = self.lock();
        let line = record.to_line();

        let write_error = match &mut state.sink {
            Sink::File { file, .. } => writeln!(file, "{line}").and_then(|_| file.flush()).err(),
            Sink::Console => {
                tracing::info!(target: "audit", "{line}");
                None
            }
        };

        remember(&mut state, record.clone());

        if let Some(e) = write_error {
            tracing::warn!("Audit write failed, switching to console sink: {e}");
            state.sink = Sink::Console;
            tracing::info!(target: "audit", "{line}");
            let fallback = fallback_record(&mut state, "audit write failed", &record.user_id);
            if let Some(fallback) = fallback {
                tracing::info!(target: "audit", "{}", fallback.to_line());
                remember(&mut state, fallback);
            }
        }
    }

    fn record_fallback(&self, reason: &str) {
        let mut state = self.lock();
        if let Some(fallback) = fallback_record(&mut state, reason, "system") {
            tracing::info!(target: "audit", "{}", fallback.to_line());
            remember(&mut state, fallback);
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Build the one-time fallback record; `None` if the switch was already recorded.
fn fallback_record(state: &mut AuditState, reason: &str, user: &str) -> Option<AuditRecord> {
    if state.fell_back {
        return None;
    }
    state.fell_back = true;
    Some(AuditRecord {
        timestamp: Local::now(),
        kind: RecordKind::Access,
        user_id: user.to_string(),
        action: AuditAction::AuditSinkFallback,
        resource: reason.to_string(),
        outcome: Outcome::Failure,
    })
}

fn remember(state: &mut AuditState, record: AuditRecord) {
    if state.recent.len() == RECENT_CAPACITY {
        state.recent.pop_front();
    }
    state.recent.push_back(record);
}
