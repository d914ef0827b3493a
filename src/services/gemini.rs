use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::core::config::Config;
use crate::core::error::{ComicError, Result};
use crate::core::state::PanelSize;
use crate::services::prompt::portrait_fragments;
use crate::services::script::{
    parse_script_response, script_response_schema, script_system_prompt, script_user_prompt,
    ScriptResponse,
};
use crate::utils::data_url::InlineImage;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    /// Falls back to the `GEMINI_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_script_model")]
    pub script_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_script_model() -> String {
    "gemini-2.5-pro".to_string()
}
fn default_image_model() -> String {
    "gemini-2.5-flash-image-preview".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/".to_string()
}
fn default_retry_count() -> usize {
    3
}
fn default_retry_delay_seconds() -> u64 {
    10
}
fn default_timeout_seconds() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            script_model: default_script_model(),
            image_model: default_image_model(),
            base_url: default_base_url(),
            retry_count: default_retry_count(),
            retry_delay_seconds: default_retry_delay_seconds(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptBrief {
    pub overall_desc: String,
    pub tone: String,
    pub use_character_b: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortraitSpec {
    pub name: String,
    pub style_preset: String,
    pub prompt: String,
    /// At most one `data:` URL.
    pub references: Vec<String>,
    pub size: PanelSize,
}

/// One panel attempt. Built fresh for every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub references: Vec<InlineImage>,
    pub prompt_fragments: Vec<String>,
    pub output_size: PanelSize,
}

/// The generative capability the pipeline drives.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate_script(&self, brief: &ScriptBrief) -> Result<ScriptResponse>;
    async fn generate_character_portrait(&self, spec: &PortraitSpec) -> Result<InlineImage>;
    async fn generate_panel_image(&self, request: &GenerationRequest) -> Result<InlineImage>;
}

pub fn create_backend(config: &Config) -> Result<Arc<dyn GenerationBackend>> {
    Ok(Arc::new(GeminiBackend::new(&config.llm)?))
}

// --- Wire format ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineImage,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<ResponseBlob>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBlob {
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

fn user_content(parts: Vec<Part>) -> Content {
    Content {
        role: "user".to_string(),
        parts,
    }
}

fn text_parts(fragments: impl IntoIterator<Item = String>) -> Vec<Part> {
    fragments.into_iter().map(|text| Part::Text { text }).collect()
}

fn first_candidate(response: GenerateContentResponse) -> Result<Candidate> {
    if let Some(err) = response.error {
        return Err(ComicError::upstream(format!("Gemini API returned error: {}", err.message)));
    }
    response
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| ComicError::upstream("No candidates returned from Gemini"))
}

/// Concatenated text parts of the first candidate.
fn extract_text(response: GenerateContentResponse) -> Result<String> {
    let candidate = first_candidate(response)?;
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
        .unwrap_or_default();
    if text.trim().is_empty() {
        let reason = candidate.finish_reason.as_deref().unwrap_or("UNKNOWN");
        debug!("Empty script response, finish reason: {}", reason);
        return Err(ComicError::upstream("Invalid response (empty text)"));
    }
    Ok(text)
}

/// First inline image part of the first candidate.
fn extract_image(response: GenerateContentResponse) -> Result<InlineImage> {
    let candidate = first_candidate(response)?;
    candidate
        .content
        .into_iter()
        .flat_map(|c| c.parts)
        .filter_map(|p| p.inline_data)
        .find(|blob| !blob.data.is_empty())
        .map(|blob| InlineImage {
            mime_type: blob.mime_type.unwrap_or_else(|| "image/png".to_string()),
            data: blob.data,
        })
        .ok_or_else(|| ComicError::upstream("No image part in Gemini response"))
}

// --- Gemini ---

pub struct GeminiBackend {
    config: LlmConfig,
    api_key: Option<String>,
    endpoint: Url,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()));

        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .map_err(|e| ComicError::configuration(format!("invalid base_url {}: {}", base, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config: config.clone(),
            api_key,
            endpoint,
            client,
        })
    }

    fn model_url(&self, model: &str) -> Result<Url> {
        self.endpoint
            .join(&format!("models/{}:generateContent", model))
            .map_err(|e| ComicError::configuration(format!("invalid model {}: {}", model, e)))
    }

    async fn call(&self, model: &str, body: &GenerateContentRequest) -> Result<GenerateContentResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ComicError::configuration(format!("{} not configured", API_KEY_ENV)))?;
        let url = self.model_url(model)?;
        let delay = Duration::from_secs(self.config.retry_delay_seconds);

        let mut attempt = 0;
        loop {
            let outcome = self
                .client
                .post(url.clone())
                .header("x-goog-api-key", api_key)
                .json(body)
                .send()
                .await;

            let err = match outcome {
                Ok(resp) if resp.status().is_success() => {
                    let text = resp.text().await?;
                    return Ok(serde_json::from_str(&text)?);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    let err = ComicError::upstream(format!("Gemini API error ({}): {}", status, text));
                    let retryable =
                        status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    if !retryable {
                        return Err(err);
                    }
                    err
                }
                Err(e) => ComicError::from(e),
            };

            if attempt >= self.config.retry_count {
                return Err(err);
            }
            attempt += 1;
            warn!(
                "{} call failed: {}, retrying ({}/{})...",
                model, err, attempt, self.config.retry_count
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    async fn generate_script(&self, brief: &ScriptBrief) -> Result<ScriptResponse> {
        let body = GenerateContentRequest {
            contents: vec![user_content(text_parts([
                script_system_prompt(),
                script_user_prompt(brief),
            ]))],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: script_response_schema(brief.use_character_b),
            }),
        };

        let response = self.call(&self.config.script_model, &body).await?;
        parse_script_response(&extract_text(response)?)
    }

    async fn generate_character_portrait(&self, spec: &PortraitSpec) -> Result<InlineImage> {
        let mut parts = text_parts(portrait_fragments(spec));
        for reference in spec.references.iter().take(1) {
            match InlineImage::parse(reference) {
                Ok(inline_data) => parts.push(Part::Inline { inline_data }),
                Err(e) => debug!("Dropping portrait reference: {}", e),
            }
        }

        let body = GenerateContentRequest {
            contents: vec![user_content(parts)],
            generation_config: None,
        };
        extract_image(self.call(&self.config.image_model, &body).await?)
    }

    async fn generate_panel_image(&self, request: &GenerationRequest) -> Result<InlineImage> {
        let mut parts = text_parts(request.prompt_fragments.iter().cloned());
        parts.extend(request.references.iter().cloned().map(|inline_data| Part::Inline { inline_data }));

        let body = GenerateContentRequest {
            contents: vec![user_content(parts)],
            generation_config: None,
        };
        extract_image(self.call(&self.config.image_model, &body).await?)
    }
}
