use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;

/// `data:<mime>;base64,<payload>` with the payload kept encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub data: String,
}

impl DataUri {
    pub fn new(mime_type: &str, data: &str) -> Self {
        Self {
            mime_type: mime_type.trim().to_string(),
            data: data.trim().to_string(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let rest = raw
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| anyhow!("not a data URI"))?;
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| anyhow!("data URI has no payload"))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| anyhow!("data URI is not base64 encoded"))?;
        if mime_type.is_empty() {
            return Err(anyhow!("data URI has no MIME type"));
        }

        Ok(Self::new(mime_type, data))
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        let bytes = STANDARD
            .decode(self.data.as_bytes())
            .context("data URI payload is not valid base64")?;
        if bytes.is_empty() {
            return Err(anyhow!("data URI payload is empty"));
        }
        Ok(bytes)
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.data)
    }
}
