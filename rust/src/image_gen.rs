use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::data_uri::DataUri;
use crate::error::GenerationError;
use crate::gemini::{GeminiClient, GenerateContentRequest, GenerationConfig, Modality};
use crate::renderer::render_instruction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub image_data_uri: String,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, GenerationError>;
}

pub struct GeminiImageGenerator {
    client: Arc<GeminiClient>,
    model: String,
    instruction: String,
}

impl GeminiImageGenerator {
    pub fn new(client: Arc<GeminiClient>, model: &str, instruction: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
            instruction: instruction.to_string(),
        }
    }

    // The endpoint rejects IMAGE-only requests, so TEXT is listed and ignored.
    fn build_request(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest::user_text(&render_instruction(&self.instruction, prompt))
            .with_config(GenerationConfig {
                response_modalities: Some(vec![Modality::Text, Modality::Image]),
                ..GenerationConfig::default()
            })
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, GenerationError> {
        log::info!("generating image ({} chars) with {}", prompt.len(), self.model);

        let response = self
            .client
            .generate_content(&self.model, &self.build_request(prompt))
            .await
            .map_err(|err| GenerationError::Unknown(err.to_string()))?;

        let image = match response.inline_image() {
            Some(image) if response.stopped_normally() => image,
            _ => {
                let finish_reason = response.finish_reason();
                log::warn!("image generation stopped with {finish_reason}");
                return Err(GenerationError::Generation { finish_reason });
            }
        };

        let uri = DataUri::new(&image.mime_type, &image.data);
        uri.decode()
            .map_err(|err| GenerationError::Unknown(err.to_string()))?;

        log::info!("image generated ({})", uri.mime_type);
        Ok(GeneratedImage {
            image_data_uri: uri.to_string(),
        })
    }
}
