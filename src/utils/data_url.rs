//! Embedded `data:` image references, the form every image blob takes inside a session.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::{ComicError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 payload, without the `data:` header.
    pub data: String,
}

impl InlineImage {
    /// Parses `data:<mime>;base64,<payload>`. Anything else is rejected.
    pub fn parse(data_url: &str) -> Result<Self> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or_else(|| ComicError::validation("invalid data URL"))?;
        let (mime_type, data) = rest
            .split_once(";base64,")
            .ok_or_else(|| ComicError::validation("invalid data URL"))?;

        if mime_type.is_empty() || mime_type.contains(';') || data.is_empty() {
            return Err(ComicError::validation("invalid data URL"));
        }

        Ok(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: BASE64.encode(bytes),
        }
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| ComicError::validation(format!("invalid base64 payload: {}", e)))
    }
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}
