//! Local text model access through Ollama, plus the load fallback chain.
//!
//! Endpoints are loopback-only: document text never leaves the machine via
//! this client. Loading walks an ordered candidate list (preferred endpoint,
//! default endpoint, baseline model); first success wins.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::source::is_loopback_url;
use super::text::truncate_chars;
use super::types::{ModelLoader, TextModel};
use crate::config::ModelSettings;

/// Text used in place of a summary or answer when no model could be loaded.
pub const CAPABILITY_UNAVAILABLE_MARKER: &str = "[capability unavailable: no text model could be loaded]";

const SUMMARY_SYSTEM_PROMPT: &str =
    "You summarize research papers. Reply with one concise paragraph and nothing else.";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model service is not reachable at {0}")]
    NotReachable(String),

    #[error("Model service returned an error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Model '{0}' is not installed")]
    ModelNotFound(String),

    #[error("Only localhost connections are allowed for model endpoints")]
    NonLocalEndpoint,

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse model response: {0}")]
    ResponseParsing(String),

    #[error("No text model could be loaded after {attempts} attempt(s): {last}")]
    Unavailable { attempts: usize, last: String },
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::NotReachable(_))
    }
}

/// Reject any model endpoint that is not a loopback address.
pub fn validate_base_url(url: &str) -> Result<(), ModelError> {
    let parsed = Url::parse(url).map_err(|e| ModelError::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ModelError::InvalidUrl(format!("unsupported scheme {}", parsed.scheme())));
    }
    if is_loopback_url(&parsed) {
        Ok(())
    } else {
        Err(ModelError::NonLocalEndpoint)
    }
}

/// Strip a leading `answer:` prefix (any case) from a model reply.
pub fn clean_answer(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("answer:") => trimmed[7..].trim().to_string(),
        _ => trimmed.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════
// HTTP client
// ═══════════════════════════════════════════════════════════

/// Ollama HTTP client for local inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

impl OllamaClient {
    /// Create a client for a loopback Ollama instance.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ModelError> {
        validate_base_url(base_url)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn generate(&self, model: &str, prompt: &str, system: Option<&str>) -> Result<String, ModelError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            system,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;
        let parsed: GenerateResponse = Self::read_json(response)?;
        Ok(parsed.response)
    }

    /// Chat request with base64-encoded images (vision models).
    pub fn chat_with_images(&self, model: &str, prompt: &str, images: &[String]) -> Result<String, ModelError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
                images: Some(images),
            }],
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;
        let parsed: ChatResponse = Self::read_json(response)?;
        Ok(parsed.message.content)
    }

    pub fn list_models(&self) -> Result<Vec<String>, ModelError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_send_error(e))?;
        let parsed: TagsResponse = Self::read_json(response)?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    /// Installed models match by prefix, so `llama3.2` matches `llama3.2:latest`.
    pub fn is_model_available(&self, model: &str) -> Result<bool, ModelError> {
        let models = self.list_models()?;
        Ok(models.iter().any(|m| m.starts_with(model)))
    }

    fn map_send_error(&self, e: reqwest::Error) -> ModelError {
        if e.is_connect() {
            ModelError::NotReachable(self.base_url.clone())
        } else if e.is_timeout() {
            ModelError::Timeout(self.timeout.as_secs())
        } else {
            ModelError::Network(e.to_string())
        }
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::blocking::Response,
    ) -> Result<T, ModelError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .map_err(|e| ModelError::ResponseParsing(e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════
// Text model + loader
// ═══════════════════════════════════════════════════════════

/// Summarization and question answering backed by one Ollama model.
pub struct OllamaTextModel {
    client: OllamaClient,
    model: String,
    context_chars: usize,
}

impl OllamaTextModel {
    pub fn new(client: OllamaClient, model: &str, context_chars: usize) -> Self {
        Self {
            client,
            model: model.to_string(),
            context_chars,
        }
    }
}

impl TextModel for OllamaTextModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn summarize(&self, text: &str) -> Result<String, ModelError> {
        let excerpt = truncate_chars(text, self.context_chars);
        let prompt = format!("Summarize the following research text:\n\n{excerpt}");
        let reply = self
            .client
            .generate(&self.model, &prompt, Some(SUMMARY_SYSTEM_PROMPT))?;
        Ok(reply.trim().to_string())
    }

    fn answer(&self, question: &str, context: &str) -> Result<String, ModelError> {
        let excerpt = truncate_chars(context, self.context_chars);
        let prompt = format!("question: {question} context: {excerpt}");
        let reply = self.client.generate(&self.model, &prompt, None)?;
        Ok(clean_answer(&reply))
    }
}

/// Loads `OllamaTextModel`s after checking the model is installed.
pub struct OllamaLoader {
    timeout: Duration,
    context_chars: usize,
}

impl OllamaLoader {
    pub fn new(settings: &ModelSettings) -> Self {
        Self {
            timeout: settings.request_timeout,
            context_chars: settings.context_chars,
        }
    }
}

impl ModelLoader for OllamaLoader {
    fn load(&self, endpoint: &str, model: &str) -> Result<Box<dyn TextModel>, ModelError> {
        let client = OllamaClient::new(endpoint, self.timeout)?;
        if !client.is_model_available(model)? {
            return Err(ModelError::ModelNotFound(model.to_string()));
        }
        Ok(Box::new(OllamaTextModel::new(client, model, self.context_chars)))
    }
}

// ═══════════════════════════════════════════════════════════
// Fallback chain
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCandidate {
    pub endpoint: String,
    pub model: String,
}

/// Ordered load attempts: preferred endpoint, default endpoint, then the
/// baseline model on the default endpoint. Duplicates are dropped.
pub fn candidates(settings: &ModelSettings) -> Vec<ModelCandidate> {
    let mut list = Vec::with_capacity(3);
    if let Some(preferred) = settings.preferred_endpoint.as_deref() {
        list.push(ModelCandidate {
            endpoint: preferred.to_string(),
            model: settings.preferred_model.clone(),
        });
    }
    list.push(ModelCandidate {
        endpoint: settings.default_endpoint.clone(),
        model: settings.preferred_model.clone(),
    });
    list.push(ModelCandidate {
        endpoint: settings.default_endpoint.clone(),
        model: settings.baseline_model.clone(),
    });
    list.dedup();
    list
}

/// Try each candidate in order; the last failure becomes `Unavailable`.
pub fn load_with_fallback(
    loader: &dyn ModelLoader,
    candidates: &[ModelCandidate],
) -> Result<(Box<dyn TextModel>, ModelCandidate), ModelError> {
    let mut last = String::from("no candidates configured");
    for (attempt, candidate) in candidates.iter().enumerate() {
        match loader.load(&candidate.endpoint, &candidate.model) {
            Ok(model) => {
                tracing::info!(
                    endpoint = %candidate.endpoint,
                    model = %candidate.model,
                    attempt = attempt + 1,
                    "Text model loaded"
                );
                return Ok((model, candidate.clone()));
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %candidate.endpoint,
                    model = %candidate.model,
                    attempt = attempt + 1,
                    "Text model load failed: {e}"
                );
                last = e.to_string();
            }
        }
    }
    Err(ModelError::Unavailable {
        attempts: candidates.len(),
        last,
    })
}

/// Resolved summarization/QA capability, shared across requests.
#[derive(Clone)]
pub enum TextCapability {
    Available(Arc<dyn TextModel>),
    Unavailable { reason: String },
}

impl TextCapability {
    /// Walk the fallback chain once. Exhaustion degrades to `Unavailable`.
    pub fn resolve(loader: &dyn ModelLoader, settings: &ModelSettings) -> Self {
        match load_with_fallback(loader, &candidates(settings)) {
            Ok((model, _)) => Self::Available(Arc::from(model)),
            Err(e) => Self::Unavailable {
                reason: e.to_string(),
            },
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn model_name(&self) -> Option<&str> {
        match self {
            Self::Available(model) => Some(model.name()),
            Self::Unavailable { .. } => None,
        }
    }
}

impl std::fmt::Debug for TextCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(model) => f.debug_tuple("Available").field(&model.name()).finish(),
            Self::Unavailable { reason } => f.debug_struct("Unavailable").field("reason", reason).finish(),
        }
    }
}
