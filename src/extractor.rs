use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Instruction sent with every receipt image.
pub const RECEIPT_PROMPT: &str = r#"You are reading a photo of a shop receipt.
Extract the key facts of the receipt as a single flat JSON object.
- Use short field names such as "store", "date", "time", "items", "subtotal", "tax", "total", "payment_method".
- Every value must be a string, number, boolean or null. Use null when a value cannot be read.
- Keep amounts as they are printed, without currency symbols.
- Write dates as YYYY-MM-DD.
Return only the JSON object, with no explanation."#;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("vision request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("vision API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("vision API returned no text")]
    EmptyResponse,
}

/// Turns an image into raw key/value text.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String, ExtractError>;
}

/// Google Gemini `generateContent` with the image sent inline.
#[derive(Debug, Clone)]
pub struct GeminiExtractor {
    http: Client,
    api_base: String,
    model: String,
    api_key: String,
}

impl GeminiExtractor {
    pub fn new(api_key: impl Into<String>, model: Option<String>, api_base: Option<String>) -> Result<Self, ExtractError> {
        let http = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            http,
            api_base: api_base
                .map(|b| b.trim().trim_end_matches('/').to_string())
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn request_body(image: &[u8], mime_type: &str, prompt: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt },
                    { "inline_data": { "mime_type": mime_type, "data": BASE64.encode(image) } },
                ]
            }]
        })
    }
}

#[async_trait]
impl Extractor for GeminiExtractor {
    #[tracing::instrument(name = "gemini_extract", skip(self, image, prompt), fields(size = image.len()))]
    async fn extract(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String, ExtractError> {
        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(image, mime_type, prompt))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".into());
            error!("Gemini error: {}", body);
            return Err(ExtractError::Status { status: status.as_u16(), body });
        }

        let payload: Value = resp.json().await?;
        let text = response_text(&payload).ok_or(ExtractError::EmptyResponse)?;
        debug!(chars = text.len(), "vision model answered");
        Ok(text)
    }
}

/// Concatenated text parts of the first candidate.
fn response_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() { None } else { Some(text) }
}
