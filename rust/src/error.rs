use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Please write a description for the image.")]
    EmptyPrompt,

    #[error("Prompt doctoring failed: {0}")]
    Doctoring(String),

    #[error("Image generation failed. The model returned with status: {finish_reason}.")]
    Generation { finish_reason: String },

    #[error("{0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyPrompt,
    Doctoring,
    Generation,
    Unknown,
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyPrompt => ErrorKind::EmptyPrompt,
            Self::Doctoring(_) => ErrorKind::Doctoring,
            Self::Generation { .. } => ErrorKind::Generation,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

/// Failures of the raw model endpoint, before they are classified by stage.
#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid API key header")]
    InvalidApiKey,
}
