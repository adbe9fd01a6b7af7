use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::error::GenerationError;
use crate::gemini::{GeminiClient, GenerateContentRequest, GenerationConfig};
use crate::renderer::render_instruction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctoredPrompt {
    pub rewritten_prompt: String,
}

/// Rewrites raw user text into a safer, more descriptive image prompt.
#[async_trait]
pub trait PromptDoctor: Send + Sync {
    async fn doctor(&self, prompt: &str) -> Result<DoctoredPrompt, GenerationError>;
}

pub struct GeminiPromptDoctor {
    client: Arc<GeminiClient>,
    model: String,
    instruction: String,
}

impl GeminiPromptDoctor {
    pub fn new(client: Arc<GeminiClient>, model: &str, instruction: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
            instruction: instruction.to_string(),
        }
    }

    fn build_request(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest::user_text(&render_instruction(&self.instruction, prompt))
            .with_config(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(json!({
                    "type": "OBJECT",
                    "properties": {
                        "rewrittenPrompt": {
                            "type": "STRING",
                            "description": "The rewritten, safe, and creative prompt."
                        }
                    },
                    "required": ["rewrittenPrompt"]
                })),
                ..GenerationConfig::default()
            })
    }
}

#[async_trait]
impl PromptDoctor for GeminiPromptDoctor {
    async fn doctor(&self, prompt: &str) -> Result<DoctoredPrompt, GenerationError> {
        log::info!("doctoring prompt ({} chars) with {}", prompt.len(), self.model);

        let response = self
            .client
            .generate_content(&self.model, &self.build_request(prompt))
            .await
            .map_err(|err| GenerationError::Doctoring(err.to_string()))?;

        if !response.stopped_normally() {
            let reason = response.finish_reason();
            log::warn!("doctoring stopped with {reason}");
            return Err(GenerationError::Doctoring(format!(
                "the model returned with status: {reason}"
            )));
        }

        let text = response.text().ok_or_else(|| {
            GenerationError::Doctoring("the model returned no output".to_string())
        })?;
        let parsed: DoctoredPrompt = serde_json::from_str(text.trim()).map_err(|err| {
            GenerationError::Doctoring(format!("the model returned malformed output: {err}"))
        })?;

        sanitize_rewrite(&parsed.rewritten_prompt)
            .map(|rewritten_prompt| DoctoredPrompt { rewritten_prompt })
            .ok_or_else(|| {
                GenerationError::Doctoring("the model returned an empty prompt".to_string())
            })
    }
}

/// Model output is untrusted: trim it, drop wrapping quotes, and refuse blanks.
pub fn sanitize_rewrite(raw: &str) -> Option<String> {
    let mut text = raw.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”')] {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
        }
    }
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
