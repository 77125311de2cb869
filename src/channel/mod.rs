/*
    LINE  ──POST /callback──▶ webhook ──InboundEvent──▶ EditSession
      ▲                                                     │
      │◀──────── reply(render(OutboundAction)) ─────────────┘
      │
      └─────── push(notification) ◀── LineNotifier ◀── SubmissionWorker
*/
pub mod notifier;
pub mod render;
pub mod webhook;

use async_trait::async_trait;
use channel_line::{LineClient, LineError, Message};

pub use notifier::LineNotifier;
pub use webhook::{AppState, router};

/// The Messaging API calls the bot makes. [`LineClient`] is the real one.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn reply(&self, reply_token: &str, messages: Vec<Message>) -> Result<(), LineError>;
    async fn push(&self, user_id: &str, messages: Vec<Message>) -> Result<(), LineError>;
    async fn content(&self, message_id: &str) -> Result<(Vec<u8>, String), LineError>;
}

#[async_trait]
impl MessagingApi for LineClient {
    async fn reply(&self, reply_token: &str, messages: Vec<Message>) -> Result<(), LineError> {
        LineClient::reply(self, reply_token, messages).await
    }

    async fn push(&self, user_id: &str, messages: Vec<Message>) -> Result<(), LineError> {
        LineClient::push(self, user_id, messages).await
    }

    async fn content(&self, message_id: &str) -> Result<(Vec<u8>, String), LineError> {
        LineClient::content(self, message_id).await
    }
}
