use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "ScholarGuard";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default idle timeout: 30 minutes.
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30 * 60;

/// Default upper bound for downloaded documents: 100 MiB.
const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 100 * 1024 * 1024;

pub const DEFAULT_MODEL_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_BASELINE_MODEL: &str = "llama3.2";

pub const PUBTATOR_SUBMIT_URL: &str =
    "https://www.ncbi.nlm.nih.gov/research/pubtator-api/public/annotate/submit";
pub const PUBTATOR_RECEIVE_URL: &str =
    "https://www.ncbi.nlm.nih.gov/research/pubtator-api/public/annotate/";

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "scholarguard=info"
}

/// Get the application data directory.
/// ~/ScholarGuard/ on all platforms; falls back to the temp dir when no home exists.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("Baseline model name must not be empty")]
    MissingBaselineModel,
}

/// Model service settings. Endpoints are loopback-only (checked at load time).
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Endpoint tried first (e.g. a warm, dedicated cache instance).
    pub preferred_endpoint: Option<String>,
    /// Standard local endpoint tried second.
    pub default_endpoint: String,
    /// Model requested for summarization / question answering.
    pub preferred_model: String,
    /// Known-good model used when the preferred one cannot be loaded.
    pub baseline_model: String,
    /// Vision model used for image captioning.
    pub vision_model: String,
    /// Fixed deadline per model call.
    pub request_timeout: Duration,
    /// Characters of document text handed to the model per call.
    pub context_chars: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            preferred_endpoint: None,
            default_endpoint: DEFAULT_MODEL_ENDPOINT.to_string(),
            preferred_model: DEFAULT_BASELINE_MODEL.to_string(),
            baseline_model: DEFAULT_BASELINE_MODEL.to_string(),
            vision_model: "llava".to_string(),
            request_timeout: Duration::from_secs(300),
            context_chars: 1000,
        }
    }
}

/// External biomedical annotation service settings.
#[derive(Debug, Clone)]
pub struct AnnotationSettings {
    pub submit_url: String,
    pub receive_url: String,
    pub request_timeout: Duration,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    /// Text sent to the service is truncated to this many characters.
    pub max_chars: usize,
}

impl Default for AnnotationSettings {
    fn default() -> Self {
        Self {
            submit_url: PUBTATOR_SUBMIT_URL.to_string(),
            receive_url: PUBTATOR_RECEIVE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
            poll_attempts: 6,
            poll_interval: Duration::from_secs(5),
            max_chars: 100_000,
        }
    }
}

/// Process-wide configuration, built once at startup and passed into
/// component constructors. Library code never reads environment variables;
/// the binary maps them onto these fields.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub audit_log_path: PathBuf,
    /// Where artifacts land when the requested target is not writable.
    pub fallback_dir: PathBuf,
    pub session_timeout: Duration,
    pub ocr_enabled: bool,
    pub captioning_enabled: bool,
    /// Upper bound on concurrent per-item work (OCR, captions, answers).
    pub workers: usize,
    pub fetch_timeout: Duration,
    pub max_download_bytes: u64,
    pub model: ModelSettings,
    pub annotation: AnnotationSettings,
    pub log_filter: String,
    /// Explicit PDFium library file. `None` searches next to the executable,
    /// then the system paths.
    pub pdfium_library: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = app_data_dir();
        Self {
            audit_log_path: data_dir.join("audit.log"),
            fallback_dir: std::env::temp_dir().join(APP_NAME),
            data_dir,
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            ocr_enabled: true,
            captioning_enabled: true,
            workers: 4,
            fetch_timeout: Duration::from_secs(30),
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            model: ModelSettings::default(),
            annotation: AnnotationSettings::default(),
            log_filter: default_log_filter().to_string(),
            pdfium_library: None,
        }
    }
}

impl AppConfig {
    /// Config rooted at an explicit data directory (tests, portable installs).
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            audit_log_path: data_dir.join("audit.log"),
            fallback_dir: data_dir.join("fallback"),
            data_dir,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("session_timeout"));
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroValue("workers"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("fetch_timeout"));
        }
        if self.max_download_bytes == 0 {
            return Err(ConfigError::ZeroValue("max_download_bytes"));
        }
        if self.model.request_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("model.request_timeout"));
        }
        if self.model.context_chars == 0 {
            return Err(ConfigError::ZeroValue("model.context_chars"));
        }
        if self.model.baseline_model.trim().is_empty() {
            return Err(ConfigError::MissingBaselineModel);
        }
        Ok(())
    }
}
