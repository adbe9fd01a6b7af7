use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use toml::map::Map;
use toml::Value;

pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEFAULT_DOCTOR_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";
const MAX_REQUEST_TIMEOUT_SEC: f64 = 600.0;
const MAX_SESSION_IDLE_MINUTES: i64 = 7 * 24 * 60;

pub const DEFAULT_DOCTOR_INSTRUCTION: &str = r#"You are a creative assistant for an AI image generator. Your job is to take a user's prompt and refine it to be optimal for image generation models.

Follow these rules:
1. Understand Intent: Analyze any given prompt, no matter how short, vague, unsafe, or incomplete.
2. Rewrite Inappropriate Prompts: If a prompt is inappropriate (NSFW, sexual, violent, hate-based, etc.), you MUST rewrite it into a completely safe, creative, and SFW version that captures a positive and artistic interpretation of the original idea. For example, "bloody battle" could become "a cinematic scene of knights in shining armor in a tense standoff before a battle."
3. Expand Vague Prompts: If a prompt is unclear or very short (e.g., "a cat"), expand it into a rich, imaginative, and descriptive sentence. For example, "a cat" could become "a fluffy ginger cat sleeping in a sunbeam, detailed illustration."
4. Preserve Detail: If a prompt is already long and descriptive, keep its intent and details, optionally adding quality qualifiers.
5. Ensure Safety: The final rewritten prompt must be safe for work and MUST NOT contain any nudity, gore, violence, hate speech, or explicit adult content.
6. Output Format: Your final output must only be the rewritten prompt.

User Prompt: "{{prompt}}"
"#;

pub const DEFAULT_IMAGE_INSTRUCTION: &str = r#"Generate a high-quality, photorealistic image based on the following prompt, paying close attention to every detail, especially for long and descriptive requests. The image should be a direct visual representation of the user's text, avoiding any extra text, letters, or words in the image itself. Focus on accurate composition, rich detail, and faithful interpretation to bring the user's vision to life.

User Prompt: "{{prompt}}""#;

/// Everything the services need, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    pub api_base_url: String,
    pub api_key_env: String,
    pub request_timeout: Option<Duration>,
    pub doctor_enabled: bool,
    pub doctor_model: String,
    pub doctor_instruction: String,
    pub image_model: String,
    pub image_instruction: String,
}

#[derive(Debug)]
pub struct ConfigStore {
    pub path: PathBuf,
    doc: Value,
}

impl ConfigStore {
    /// Loads the file, creating it with defaults when absent, and writes back the
    /// normalized document.
    pub fn new(path: PathBuf) -> Result<Self> {
        let doc = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<Value>(&text)
                .with_context(|| format!("failed to parse TOML: {}", path.display()))?
        } else {
            log::info!("config not found, writing defaults to {}", path.display());
            Value::Table(Map::new())
        };

        let mut store = Self { path, doc };
        store.normalize_doc();
        store.save()?;
        Ok(store)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create config dir: {}", parent.display())
                })?;
            }
        }
        let text = toml::to_string_pretty(&self.doc).context("failed to serialize TOML")?;
        fs::write(&self.path, text)
            .with_context(|| format!("failed to write config: {}", self.path.display()))
    }

    pub fn server_port(&self) -> u16 {
        self.table("app")
            .and_then(|t| t.get("server_port"))
            .and_then(value_to_i64)
            .and_then(|v| u16::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(3000)
    }

    pub fn session_idle(&self) -> Duration {
        let minutes = self
            .table("app")
            .and_then(|t| t.get("session_idle_minutes"))
            .and_then(value_to_i64)
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(60)
            .min(MAX_SESSION_IDLE_MINUTES as u64);
        Duration::from_secs(minutes.saturating_mul(60))
    }

    pub fn api_base_url(&self) -> String {
        self.string_or("api", "base_url", DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn api_key_env(&self) -> String {
        self.string_or("api", "api_key_env", DEFAULT_API_KEY_ENV)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.table("api")
            .and_then(|t| t.get("request_timeout_sec"))
            .and_then(value_to_f64)
            .filter(|v| v.is_finite() && *v > 0.0)
            .map(|v| Duration::from_secs_f64(v.min(MAX_REQUEST_TIMEOUT_SEC)))
    }

    pub fn doctor_enabled(&self) -> bool {
        self.table("doctor")
            .and_then(|t| t.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn doctor_model(&self) -> String {
        self.string_or("doctor", "model", DEFAULT_DOCTOR_MODEL)
    }

    pub fn doctor_instruction(&self) -> String {
        self.string_or("doctor", "instruction", DEFAULT_DOCTOR_INSTRUCTION)
    }

    pub fn image_model(&self) -> String {
        self.string_or("image", "model", DEFAULT_IMAGE_MODEL)
    }

    pub fn image_instruction(&self) -> String {
        self.string_or("image", "instruction", DEFAULT_IMAGE_INSTRUCTION)
    }

    pub fn generator_settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            api_base_url: self.api_base_url(),
            api_key_env: self.api_key_env(),
            request_timeout: self.request_timeout(),
            doctor_enabled: self.doctor_enabled(),
            doctor_model: self.doctor_model(),
            doctor_instruction: self.doctor_instruction(),
            image_model: self.image_model(),
            image_instruction: self.image_instruction(),
        }
    }

    fn normalize_doc(&mut self) {
        if !self.doc.is_table() {
            self.doc = Value::Table(Map::new());
        }

        {
            let app = self.ensure_table_mut("app");

            let port = app
                .get("server_port")
                .and_then(value_to_i64)
                .filter(|v| (1..=65_535).contains(v))
                .unwrap_or(3000);
            app.insert("server_port".to_string(), Value::Integer(port));

            let idle = app
                .get("session_idle_minutes")
                .and_then(value_to_i64)
                .filter(|v| *v > 0)
                .unwrap_or(60)
                .min(MAX_SESSION_IDLE_MINUTES);
            app.insert("session_idle_minutes".to_string(), Value::Integer(idle));
        }

        {
            let api = self.ensure_table_mut("api");
            insert_string_default(api, "base_url", DEFAULT_API_BASE_URL);
            insert_string_default(api, "api_key_env", DEFAULT_API_KEY_ENV);

            let timeout = api
                .get("request_timeout_sec")
                .and_then(value_to_f64)
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(0.0)
                .min(MAX_REQUEST_TIMEOUT_SEC);
            api.insert("request_timeout_sec".to_string(), Value::Float(timeout));
        }

        {
            let doctor = self.ensure_table_mut("doctor");
            if doctor.get("enabled").and_then(Value::as_bool).is_none() {
                doctor.insert("enabled".to_string(), Value::Boolean(true));
            }
            insert_string_default(doctor, "model", DEFAULT_DOCTOR_MODEL);
            insert_string_default(doctor, "instruction", DEFAULT_DOCTOR_INSTRUCTION);
        }

        {
            let image = self.ensure_table_mut("image");
            insert_string_default(image, "model", DEFAULT_IMAGE_MODEL);
            insert_string_default(image, "instruction", DEFAULT_IMAGE_INSTRUCTION);
        }
    }

    fn table(&self, name: &str) -> Option<&Map<String, Value>> {
        self.doc
            .as_table()
            .and_then(|root| root.get(name))
            .and_then(Value::as_table)
    }

    fn string_or(&self, table: &str, key: &str, fallback: &str) -> String {
        self.table(table)
            .and_then(|t| t.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(fallback)
            .to_string()
    }

    fn root_table_mut(&mut self) -> &mut Map<String, Value> {
        if !self.doc.is_table() {
            self.doc = Value::Table(Map::new());
        }
        self.doc
            .as_table_mut()
            .expect("root should be table after normalization")
    }

    fn ensure_table_mut(&mut self, name: &str) -> &mut Map<String, Value> {
        let root = self.root_table_mut();
        let table = root
            .entry(name.to_string())
            .or_insert_with(|| Value::Table(Map::new()));
        if !table.is_table() {
            *table = Value::Table(Map::new());
        }
        table
            .as_table_mut()
            .expect("entry should be table after normalization")
    }
}

fn insert_string_default(table: &mut Map<String, Value>, key: &str, fallback: &str) {
    let present = table
        .get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !present {
        table.insert(key.to_string(), Value::String(fallback.to_string()));
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    value
        .as_float()
        .or_else(|| value.as_integer().map(|v| v as f64))
        .or_else(|| value.as_str().and_then(|v| v.parse::<f64>().ok()))
}

fn value_to_i64(value: &Value) -> Option<i64> {
    value
        .as_integer()
        .or_else(|| value.as_float().map(|v| v as i64))
        .or_else(|| value.as_str().and_then(|v| v.parse::<i64>().ok()))
}
