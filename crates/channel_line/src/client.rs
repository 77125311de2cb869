use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::message::Message;

pub const DEFAULT_API_BASE: &str = "https://api.line.me";
pub const DEFAULT_DATA_API_BASE: &str = "https://api-data.line.me";

#[derive(Error, Debug)]
pub enum LineError {
    #[error("LINE request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LINE API returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Thin client over the Messaging API endpoints the bot uses.
#[derive(Clone, Debug)]
pub struct LineClient {
    http: Client,
    api_base: String,
    data_api_base: String,
    access_token: String,
}

impl LineClient {
    pub fn new(access_token: impl Into<String>) -> Result<Self, LineError> {
        Self::with_bases(access_token, DEFAULT_API_BASE, DEFAULT_DATA_API_BASE)
    }

    pub fn with_bases(
        access_token: impl Into<String>,
        api_base: &str,
        data_api_base: &str,
    ) -> Result<Self, LineError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            data_api_base: data_api_base.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    /// Answer a webhook event. Reply tokens are single use.
    pub async fn reply(&self, reply_token: &str, messages: Vec<Message>) -> Result<(), LineError> {
        let url = format!("{}/v2/bot/message/reply", self.api_base);
        let body = json!({ "replyToken": reply_token, "messages": messages });
        self.post(&url, &body).await
    }

    /// Send unsolicited messages to a user.
    pub async fn push(&self, to: &str, messages: Vec<Message>) -> Result<(), LineError> {
        let url = format!("{}/v2/bot/message/push", self.api_base);
        let body = json!({ "to": to, "messages": messages });
        self.post(&url, &body).await
    }

    /// Download the binary content of a user-sent message.
    /// Returns the bytes and the reported content type.
    pub async fn content(&self, message_id: &str) -> Result<(Vec<u8>, String), LineError> {
        let url = format!("{}/v2/bot/message/{}/content", self.data_api_base, message_id);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".into());
            error!(%url, status = status.as_u16(), "content download failed");
            return Err(LineError::Status { status: status.as_u16(), body });
        }
        let mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = resp.bytes().await?;
        debug!(message_id, size = bytes.len(), "downloaded message content");
        Ok((bytes.to_vec(), mime))
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<(), LineError> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".into());
            error!(%url, status = status.as_u16(), "LINE API error: {}", text);
            return Err(LineError::Status { status: status.as_u16(), body: text });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bases_are_normalised() {
        let client = LineClient::with_bases("t", "http://localhost:9000/", "http://localhost:9001//").unwrap();
        assert_eq!(client.api_base, "http://localhost:9000");
        assert_eq!(client.data_api_base, "http://localhost:9001");
    }

    #[tokio::test]
    async fn test_push_to_unreachable_host_is_request_error() {
        let client = LineClient::with_bases("t", "http://127.0.0.1:9", "http://127.0.0.1:9").unwrap();
        let err = client.push("U1", vec![Message::text("x")]).await.unwrap_err();
        assert!(matches!(err, LineError::Request(_)));
    }
}
