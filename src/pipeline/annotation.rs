//! Biomedical concept annotation through the public PubTator service.
//!
//! This is the only stage that sends document text off the machine; reports
//! that use it are flagged `external_api_used`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::types::{AnnotationService, PollStatus};
use crate::config::AnnotationSettings;

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Annotation service request failed: {0}")]
    Network(String),

    #[error("Annotation service timed out after {0} seconds")]
    Timeout(u64),

    #[error("Annotation service returned HTTP {status}")]
    Http { status: u16 },

    #[error("Annotation service returned no session id")]
    MissingSessionId,

    #[error("Failed to parse annotation response: {0}")]
    ResponseParsing(String),

    #[error("Annotations not ready after {attempts} poll(s)")]
    NotReady { attempts: u32 },
}

#[derive(Deserialize)]
struct SubmitResponse {
    session_id: Option<String>,
}

pub struct PubTatorClient {
    submit_url: String,
    receive_url: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl PubTatorClient {
    pub fn new(settings: &AnnotationSettings) -> Result<Self, AnnotationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| AnnotationError::Network(e.to_string()))?;
        Ok(Self {
            submit_url: settings.submit_url.clone(),
            receive_url: settings.receive_url.clone(),
            client,
            timeout: settings.request_timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> AnnotationError {
        if e.is_timeout() {
            AnnotationError::Timeout(self.timeout.as_secs())
        } else {
            AnnotationError::Network(e.to_string())
        }
    }
}

impl AnnotationService for PubTatorClient {
    fn submit(&self, text: &str) -> Result<String, AnnotationError> {
        let response = self
            .client
            .post(&self.submit_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnnotationError::Http {
                status: status.as_u16(),
            });
        }

        let parsed: SubmitResponse = response
            .json()
            .map_err(|e| AnnotationError::ResponseParsing(e.to_string()))?;
        parsed
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or(AnnotationError::MissingSessionId)
    }

    fn poll(&self, token: &str) -> Result<PollStatus, AnnotationError> {
        let url = format!("{}{}", self.receive_url, token);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::ACCEPTED {
            return Ok(PollStatus::NotReady);
        }
        if !status.is_success() {
            return Err(AnnotationError::Http {
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .map_err(|e| AnnotationError::ResponseParsing(e.to_string()))?;
        match body.get("annotations") {
            Some(Value::Array(items)) => Ok(PollStatus::Ready(items.clone())),
            _ => Ok(PollStatus::NotReady),
        }
    }
}

/// Submit `text`, then poll up to `attempts` times, waiting `interval`
/// before each poll.
pub fn annotate(
    service: &dyn AnnotationService,
    text: &str,
    attempts: u32,
    interval: Duration,
) -> Result<Vec<Value>, AnnotationError> {
    let token = service.submit(text)?;
    tracing::info!(attempts, "Annotation job submitted");

    for attempt in 1..=attempts {
        std::thread::sleep(interval);
        match service.poll(&token)? {
            PollStatus::Ready(annotations) => {
                tracing::info!(attempt, count = annotations.len(), "Annotations received");
                return Ok(annotations);
            }
            PollStatus::NotReady => {
                tracing::debug!(attempt, "Annotations not ready");
            }
        }
    }
    Err(AnnotationError::NotReady { attempts })
}
