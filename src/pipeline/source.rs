//! Document source resolution: local path, uploaded bytes or remote URL,
//! turned into an immutable `DocumentHandle` with its fingerprint.

use std::io::Read;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::identity::{fingerprint, Fingerprint};

const PDF_MAGIC: &[u8] = b"%PDF-";

const TLS_HINT: &str = "TLS verification failed for the remote host. Check the server \
certificate chain and system clock, or download the document manually and pass its path.";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document not found: {0}")]
    NotFound(PathBuf),

    #[error("Document is empty")]
    Empty,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("{hint}")]
    Tls { hint: String },

    #[error("Remote fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote document exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Remote server returned HTTP {status}")]
    Http { status: u16 },

    #[error("Network error: {0}")]
    Network(String),
}

impl SourceError {
    /// Errors worth retrying as-is (transient network conditions).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Tls { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    LocalPath,
    UploadedBytes,
    RemoteUrl,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalPath => "local_path",
            Self::UploadedBytes => "uploaded_bytes",
            Self::RemoteUrl => "remote_url",
        }
    }
}

/// Where a document comes from, before it is read.
#[derive(Clone)]
pub enum DocumentSource {
    LocalPath(PathBuf),
    UploadedBytes { name: Option<String>, bytes: Vec<u8> },
    RemoteUrl(String),
}

impl DocumentSource {
    /// Interpret a CLI-style argument: anything with a URL scheme is remote.
    pub fn parse(input: &str) -> Self {
        let lower = input.to_ascii_lowercase();
        if ["http://", "https://", "ftp://", "ftps://"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
        {
            Self::RemoteUrl(input.to_string())
        } else {
            Self::LocalPath(PathBuf::from(input))
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::LocalPath(_) => SourceKind::LocalPath,
            Self::UploadedBytes { .. } => SourceKind::UploadedBytes,
            Self::RemoteUrl(_) => SourceKind::RemoteUrl,
        }
    }
}

impl std::fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalPath(p) => f.debug_tuple("LocalPath").field(p).finish(),
            Self::UploadedBytes { name, bytes } => f
                .debug_struct("UploadedBytes")
                .field("name", name)
                .field("len", &bytes.len())
                .finish(),
            Self::RemoteUrl(u) => f.debug_tuple("RemoteUrl").field(u).finish(),
        }
    }
}

/// A loaded document. Immutable; the fingerprint is computed once.
pub struct DocumentHandle {
    kind: SourceKind,
    display_name: String,
    bytes: Zeroizing<Vec<u8>>,
    fingerprint: Fingerprint,
}

impl DocumentHandle {
    pub fn from_bytes(kind: SourceKind, display_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let fingerprint = fingerprint(&bytes);
        Self {
            kind,
            display_name: display_name.into(),
            bytes: Zeroizing::new(bytes),
            fingerprint,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Basename, "upload" or remote host. Safe to log and report.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Short hash used in audit records and report metadata.
    pub fn hash(&self) -> String {
        self.fingerprint.short()
    }

    pub fn is_pdf(&self) -> bool {
        self.bytes.starts_with(PDF_MAGIC)
    }
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("kind", &self.kind)
            .field("display_name", &self.display_name)
            .field("hash", &self.fingerprint)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Whether a URL targets the local machine.
pub fn is_loopback_url(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}

/// Bounded, deadline-limited HTTP(S) download.
pub struct RemoteFetcher {
    timeout: Duration,
    max_bytes: u64,
}

impl RemoteFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        Self { timeout, max_bytes }
    }

    pub fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let parsed = Url::parse(url).map_err(|e| SourceError::InvalidUrl(e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            // Recognised but not fetched; see DESIGN.md.
            other => return Err(SourceError::UnsupportedScheme(other.to_string())),
        }

        let loopback = is_loopback_url(&parsed);
        if loopback && parsed.scheme() == "https" {
            tracing::warn!(
                host = parsed.host_str().unwrap_or_default(),
                "Certificate verification disabled for loopback host"
            );
        }

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(loopback)
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let response = client
            .get(parsed.clone())
            .send()
            .map_err(|e| self.classify(e, parsed.scheme() == "https"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
            });
        }

        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(SourceError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let mut buffer = Vec::new();
        response
            .take(self.max_bytes + 1)
            .read_to_end(&mut buffer)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::TimedOut => SourceError::Timeout(self.timeout),
                _ => SourceError::Network(e.to_string()),
            })?;

        if buffer.len() as u64 > self.max_bytes {
            return Err(SourceError::TooLarge {
                limit: self.max_bytes,
            });
        }

        tracing::info!(
            host = parsed.host_str().unwrap_or_default(),
            bytes = buffer.len(),
            "Remote document fetched"
        );
        Ok(buffer)
    }

    fn classify(&self, err: reqwest::Error, https: bool) -> SourceError {
        if err.is_timeout() {
            return SourceError::Timeout(self.timeout);
        }
        if https && is_tls_failure(&err) {
            return SourceError::Tls {
                hint: TLS_HINT.to_string(),
            };
        }
        SourceError::Network(err.to_string())
    }
}

/// reqwest exposes no TLS predicate. Only connect failures qualify, and the
/// top-level error is skipped because its message embeds the request URL.
fn is_tls_failure(err: &reqwest::Error) -> bool {
    if !err.is_connect() {
        return false;
    }
    let mut current = std::error::Error::source(err);
    while let Some(e) = current {
        if e.downcast_ref::<std::io::Error>().is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset
            )
        }) {
            return false;
        }
        let message = e.to_string().to_ascii_lowercase();
        if ["certificate", "tls", "ssl", "handshake"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            return true;
        }
        current = e.source();
    }
    false
}

/// Read or download the document and compute its fingerprint.
pub fn resolve(source: DocumentSource, fetcher: &RemoteFetcher) -> Result<DocumentHandle, SourceError> {
    let handle = match source {
        DocumentSource::LocalPath(path) => {
            if !path.is_file() {
                return Err(SourceError::NotFound(path));
            }
            let bytes = std::fs::read(&path)?;
            DocumentHandle::from_bytes(SourceKind::LocalPath, basename(&path), bytes)
        }
        DocumentSource::UploadedBytes { name, bytes } => {
            let display = name
                .as_deref()
                .map(|n| basename(Path::new(n)))
                .unwrap_or_else(|| "upload".to_string());
            DocumentHandle::from_bytes(SourceKind::UploadedBytes, display, bytes)
        }
        DocumentSource::RemoteUrl(url) => {
            let bytes = fetcher.fetch(&url)?;
            let host = Url::parse(&url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| "remote".to_string());
            DocumentHandle::from_bytes(SourceKind::RemoteUrl, host, bytes)
        }
    };

    if handle.bytes().is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(handle)
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}
