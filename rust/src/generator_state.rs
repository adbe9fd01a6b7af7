//! Per-session generator state and the reducer that drives it.
//!
//! The reducer never performs I/O. `Submit` hands back an [`Effect::Generate`]
//! carrying a request id; whoever runs the pipeline reports the outcome with
//! [`Action::Completed`] and the same id. Outcomes for any other id are dropped,
//! which covers a `Clear` (or a newer submit) racing an in-flight request.

use serde::Serialize;

use crate::error::{ErrorKind, GenerationError};
use crate::history_store::{HistoryEntry, HistoryStore};
use crate::image_gen::GeneratedImage;
use crate::renderer::download_file_name;

pub const IDLE_MESSAGE: &str = "Your amazing creation will appear here!";
pub const EMPTY_PROMPT_MESSAGE: &str = "Prompt cannot be empty.";
pub const LOADING_MESSAGE: &str = "Conjuring your image... please wait.";
pub const SUCCESS_MESSAGE: &str = "Your masterpiece is ready!";
pub const FAILURE_MESSAGE: &str = "Failed to generate image. Please try again.";
const UNKNOWN_ERROR_TEXT: &str = "An unknown error occurred.";

const SUBMIT_LABEL: &str = "Generate Image";
const SUBMIT_LABEL_LOADING: &str = "Generating...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UiStatus {
    Idle,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub enum Action {
    EditPrompt(String),
    Submit,
    Completed {
        request_id: u64,
        result: Result<GeneratedImage, GenerationError>,
    },
    Clear,
    SelectHistoryEntry(usize),
    ClearHistory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    Generate { request_id: u64, prompt: String },
    /// A generation is already in flight; the submission was refused.
    Busy,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorView {
    pub prompt: String,
    pub status: UiStatus,
    pub status_message: String,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub image_data_uri: Option<String>,
    pub is_loading: bool,
    pub submit_label: &'static str,
    pub can_download: bool,
    pub download_file_name: String,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct GeneratorState {
    prompt: String,
    status: UiStatus,
    status_message: String,
    error: Option<String>,
    error_kind: Option<ErrorKind>,
    image: Option<GeneratedImage>,
    history: HistoryStore,
    in_flight: Option<InFlight>,
    next_request_id: u64,
}

#[derive(Debug, Clone)]
struct InFlight {
    request_id: u64,
    prompt: String,
}

impl Default for GeneratorState {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneratorState {
    pub fn new() -> Self {
        Self {
            prompt: String::new(),
            status: UiStatus::Idle,
            status_message: IDLE_MESSAGE.to_string(),
            error: None,
            error_kind: None,
            image: None,
            history: HistoryStore::default(),
            in_flight: None,
            next_request_id: 1,
        }
    }

    pub fn apply(&mut self, action: Action) -> Effect {
        match action {
            Action::EditPrompt(text) => {
                if self.in_flight.is_none() {
                    self.prompt = text;
                }
                Effect::None
            }
            Action::Submit => self.submit(),
            Action::Completed { request_id, result } => {
                self.complete(request_id, result);
                Effect::None
            }
            Action::Clear => {
                self.prompt.clear();
                self.image = None;
                self.set_error(None);
                self.status = UiStatus::Idle;
                self.status_message = IDLE_MESSAGE.to_string();
                self.in_flight = None;
                Effect::None
            }
            Action::SelectHistoryEntry(index) => {
                if self.in_flight.is_none() {
                    if let Some(entry) = self.history.get(index) {
                        self.prompt = entry.prompt.clone();
                    }
                }
                Effect::None
            }
            Action::ClearHistory => {
                self.history.clear();
                Effect::None
            }
        }
    }

    fn submit(&mut self) -> Effect {
        if self.in_flight.is_some() {
            return Effect::Busy;
        }

        if self.prompt.trim().is_empty() {
            self.image = None;
            self.error = Some(GenerationError::EmptyPrompt.to_string());
            self.error_kind = Some(ErrorKind::EmptyPrompt);
            self.status = UiStatus::Error;
            self.status_message = EMPTY_PROMPT_MESSAGE.to_string();
            return Effect::None;
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.in_flight = Some(InFlight {
            request_id,
            prompt: self.prompt.clone(),
        });
        self.image = None;
        self.set_error(None);
        self.status = UiStatus::Loading;
        self.status_message = LOADING_MESSAGE.to_string();

        Effect::Generate {
            request_id,
            prompt: self.prompt.clone(),
        }
    }

    fn complete(&mut self, request_id: u64, result: Result<GeneratedImage, GenerationError>) {
        let in_flight = match self.in_flight.take() {
            Some(in_flight) if in_flight.request_id == request_id => in_flight,
            other => {
                self.in_flight = other;
                log::debug!("dropping stale result for request {request_id}");
                return;
            }
        };

        match result {
            Ok(image) if !image.image_data_uri.trim().is_empty() => {
                self.image = Some(image);
                self.set_error(None);
                self.status = UiStatus::Success;
                self.status_message = SUCCESS_MESSAGE.to_string();
                self.history.record(&in_flight.prompt);
            }
            Ok(_) => self.fail(&GenerationError::Unknown(
                "Image generation failed to return data.".to_string(),
            )),
            Err(err) => self.fail(&err),
        }
    }

    fn fail(&mut self, err: &GenerationError) {
        self.image = None;
        self.set_error(Some(err));
        self.status = UiStatus::Error;
        self.status_message = FAILURE_MESSAGE.to_string();
    }

    fn set_error(&mut self, err: Option<&GenerationError>) {
        match err {
            Some(err) => {
                let text = err.to_string();
                let text = if text.trim().is_empty() {
                    UNKNOWN_ERROR_TEXT.to_string()
                } else {
                    text
                };
                self.error = Some(format!("Oops! Something went wrong. {text}"));
                self.error_kind = Some(err.kind());
            }
            None => {
                self.error = None;
                self.error_kind = None;
            }
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn status(&self) -> UiStatus {
        self.status
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn image(&self) -> Option<&GeneratedImage> {
        self.image.as_ref()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// File name and data URI for saving the current image, if there is one.
    pub fn download(&self) -> Option<(String, &str)> {
        self.image
            .as_ref()
            .map(|image| (download_file_name(&self.prompt), image.image_data_uri.as_str()))
    }

    pub fn view(&self) -> GeneratorView {
        let is_loading = self.is_loading();
        GeneratorView {
            prompt: self.prompt.clone(),
            status: self.status,
            status_message: self.status_message.clone(),
            error: self.error.clone(),
            error_kind: self.error_kind,
            image_data_uri: self.image.as_ref().map(|i| i.image_data_uri.clone()),
            is_loading,
            submit_label: if is_loading {
                SUBMIT_LABEL_LOADING
            } else {
                SUBMIT_LABEL
            },
            can_download: self.image.is_some() && !is_loading,
            download_file_name: download_file_name(&self.prompt),
            history: self.history.entries(),
        }
    }
}
