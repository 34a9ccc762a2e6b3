//! Image captioning through a local vision model.

use std::sync::OnceLock;

use base64::Engine;
use thiserror::Error;

use super::model::{ModelError, OllamaClient};
use super::types::{ExtractedImage, ImageCaptioner};

/// Caption recorded for an image whose captioning failed.
pub const CAPTION_FAILED_MARKER: &str = "Analysis failed";

const CAPTION_PROMPT: &str =
    "Describe this figure from a research paper in one sentence. Do not transcribe any text.";

/// Images larger than this are not sent to the vision model.
const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("Captioning model error: {0}")]
    Model(#[from] ModelError),

    #[error("Image too large ({0} bytes)")]
    ImageTooLarge(usize),
}

pub struct OllamaCaptioner {
    client: OllamaClient,
    model: String,
    available: OnceLock<bool>,
}

impl OllamaCaptioner {
    pub fn new(client: OllamaClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
            available: OnceLock::new(),
        }
    }
}

impl ImageCaptioner for OllamaCaptioner {
    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| match self.client.is_model_available(&self.model) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(model = %self.model, "Captioning model check failed: {e}");
                false
            }
        })
    }

    fn caption(&self, image: &ExtractedImage) -> Result<String, CaptionError> {
        if image.bytes.len() > MAX_IMAGE_BYTES {
            return Err(CaptionError::ImageTooLarge(image.bytes.len()));
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
        let reply = self
            .client
            .chat_with_images(&self.model, CAPTION_PROMPT, &[encoded])?;
        Ok(reply.trim().to_string())
    }
}
