use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config_store::GeneratorSettings;
use crate::data_uri::DataUri;
use crate::doctor::{sanitize_rewrite, GeminiPromptDoctor, PromptDoctor};
use crate::error::GenerationError;
use crate::gemini::GeminiClient;
use crate::image_gen::{GeminiImageGenerator, GeneratedImage, ImageGenerator};

/// Doctoring (when enabled) followed by image generation, strictly in sequence.
pub struct GenerationPipeline {
    doctor: Option<Arc<dyn PromptDoctor>>,
    generator: Arc<dyn ImageGenerator>,
}

impl GenerationPipeline {
    pub fn new(doctor: Option<Arc<dyn PromptDoctor>>, generator: Arc<dyn ImageGenerator>) -> Self {
        Self { doctor, generator }
    }

    pub fn from_settings(settings: &GeneratorSettings, api_key: &str) -> Result<Self> {
        let client = Arc::new(
            GeminiClient::new(&settings.api_base_url, api_key, settings.request_timeout)
                .context("failed to create Gemini client")?,
        );

        let doctor: Option<Arc<dyn PromptDoctor>> = if settings.doctor_enabled {
            Some(Arc::new(GeminiPromptDoctor::new(
                client.clone(),
                &settings.doctor_model,
                &settings.doctor_instruction,
            )))
        } else {
            None
        };
        let generator = Arc::new(GeminiImageGenerator::new(
            client,
            &settings.image_model,
            &settings.image_instruction,
        ));

        Ok(Self::new(doctor, generator))
    }

    pub fn doctoring_enabled(&self) -> bool {
        self.doctor.is_some()
    }

    pub async fn run(&self, prompt: &str) -> Result<GeneratedImage, GenerationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        let image_prompt = match &self.doctor {
            Some(doctor) => {
                let doctored = doctor.doctor(prompt).await?;
                let rewritten = sanitize_rewrite(&doctored.rewritten_prompt).ok_or_else(|| {
                    GenerationError::Doctoring("the model returned an empty prompt".to_string())
                })?;
                log::debug!("doctored prompt: {rewritten}");
                rewritten
            }
            None => prompt.to_string(),
        };

        let image = self.generator.generate(&image_prompt).await?;
        match DataUri::parse(&image.image_data_uri) {
            Ok(uri) if uri.is_image() => Ok(image),
            _ => Err(GenerationError::Unknown(
                "Image generation failed to return data.".to_string(),
            )),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{FakeDoctor, FakeGenerator, PNG_DATA_URI};
    use super::GenerationPipeline;
    use crate::error::GenerationError;
    use std::sync::Arc;

    #[tokio::test]
    async fn doctored_prompt_feeds_image_stage() {
        let doctor = Arc::new(FakeDoctor::rewriting_to(
            "a fluffy ginger cat sleeping in a sunbeam, detailed illustration",
        ));
        let generator = Arc::new(FakeGenerator::returning(PNG_DATA_URI));
        let pipeline = GenerationPipeline::new(Some(doctor.clone()), generator.clone());

        let image = pipeline.run("a cat").await.expect("run");
        assert_eq!(image.image_data_uri, PNG_DATA_URI);
        assert_eq!(doctor.seen(), vec!["a cat"]);
        assert_eq!(
            generator.seen(),
            vec!["a fluffy ginger cat sleeping in a sunbeam, detailed illustration"]
        );
    }

    #[tokio::test]
    async fn doctoring_failure_stops_before_image_stage() {
        let doctor = Arc::new(FakeDoctor::failing(GenerationError::Doctoring(
            "timeout".to_string(),
        )));
        let generator = Arc::new(FakeGenerator::returning(PNG_DATA_URI));
        let pipeline = GenerationPipeline::new(Some(doctor), generator.clone());

        let err = pipeline.run("a cat").await.expect_err("should fail");
        assert_eq!(err, GenerationError::Doctoring("timeout".to_string()));
        assert!(generator.seen().is_empty());
    }

    #[tokio::test]
    async fn blank_rewrite_is_never_forwarded() {
        let doctor = Arc::new(FakeDoctor::rewriting_to("  \"\"  "));
        let generator = Arc::new(FakeGenerator::returning(PNG_DATA_URI));
        let pipeline = GenerationPipeline::new(Some(doctor), generator.clone());

        let err = pipeline.run("a cat").await.expect_err("should fail");
        assert!(matches!(err, GenerationError::Doctoring(_)));
        assert!(generator.seen().is_empty());
    }

    #[tokio::test]
    async fn without_doctor_raw_prompt_is_used() {
        let generator = Arc::new(FakeGenerator::returning(PNG_DATA_URI));
        let pipeline = GenerationPipeline::new(None, generator.clone());
        assert!(!pipeline.doctoring_enabled());

        pipeline.run("  a cat  ").await.expect("run");
        assert_eq!(generator.seen(), vec!["a cat"]);
    }

    #[tokio::test]
    async fn empty_prompt_makes_no_calls() {
        let doctor = Arc::new(FakeDoctor::rewriting_to("unused"));
        let generator = Arc::new(FakeGenerator::returning(PNG_DATA_URI));
        let pipeline = GenerationPipeline::new(Some(doctor.clone()), generator.clone());

        let err = pipeline.run("   ").await.expect_err("should fail");
        assert_eq!(err, GenerationError::EmptyPrompt);
        assert!(doctor.seen().is_empty());
        assert!(generator.seen().is_empty());
    }

    #[tokio::test]
    async fn non_image_payload_is_rejected() {
        let generator = Arc::new(FakeGenerator::returning("data:text/plain;base64,aGk="));
        let pipeline = GenerationPipeline::new(None, generator);

        let err = pipeline.run("a cat").await.expect_err("should fail");
        assert_eq!(
            err,
            GenerationError::Unknown("Image generation failed to return data.".to_string())
        );
    }
}
