pub mod config_store;
pub mod data_uri;
pub mod doctor;
pub mod error;
pub mod gemini;
pub mod generator_state;
pub mod history_store;
pub mod image_gen;
pub mod main_ui_html;
pub mod path_utils;
pub mod pipeline;
pub mod renderer;
pub mod server;
pub mod session_store;

/// Placeholder substituted with the user's text in instruction templates.
pub const PROMPT_PLACEHOLDER: &str = "{{prompt}}";
