use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Extension, Router,
    http::StatusCode,
    routing::{get, post},
};
use channel_line::{EventMessage, Message, MessageEvent, PostbackEvent, WebhookBody, WebhookEvent};
use tower_http::trace::TraceLayer;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::MessagingApi;
use super::render::render;
use crate::editor::{EditSession, InboundEvent, OutboundAction};
use crate::logger::Telemetry;

/// Shared by every webhook delivery.
#[derive(Clone)]
pub struct AppState {
    pub editor: Arc<EditSession>,
    pub api: Arc<dyn MessagingApi>,
    pub telemetry: Arc<Telemetry>,
    /// Received images are archived here when set.
    pub image_dir: Option<PathBuf>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/callback", post(callback))
        .route("/health", get(health))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

/// Acknowledges at once; the events are handled in the background, one
/// after another, so LINE never waits on the vision model.
async fn callback(Extension(state): Extension<AppState>, body: String) -> StatusCode {
    let body: WebhookBody = match serde_json::from_str(&body) {
        Ok(body) => body,
        Err(e) => {
            warn!("rejecting malformed webhook body: {e}");
            return StatusCode::BAD_REQUEST;
        }
    };

    let delivery = uuid::Uuid::new_v4().to_string();
    debug!(%delivery, events = body.events.len(), "webhook delivery accepted");
    tokio::spawn(
        async move { state.dispatch(body).await }.instrument(info_span!("webhook_delivery", %delivery)),
    );
    StatusCode::OK
}

impl AppState {
    /// Handles the events of one delivery in order.
    pub async fn dispatch(&self, body: WebhookBody) {
        for event in body.events {
            self.handle_event(event).await;
        }
    }

    async fn handle_event(&self, event: WebhookEvent) {
        let (Some(user_id), Some(reply_token)) = (
            event.user_id().map(str::to_owned),
            event.reply_token().map(str::to_owned),
        ) else {
            debug!("ignoring event without user or reply token");
            return;
        };

        let messages = match event {
            WebhookEvent::Message(MessageEvent { message, .. }) => match message {
                EventMessage::Image { id } => self.image_received(&user_id, &id).await,
                EventMessage::Text { text, .. } => self.run(InboundEvent::correction(&user_id, text)).await,
                EventMessage::Unsupported => {
                    vec![Message::text(self.editor.catalog().unsupported_message())]
                }
            },
            WebhookEvent::Postback(PostbackEvent { postback, .. }) => {
                self.run(InboundEvent::selection(&user_id, postback.data)).await
            }
            WebhookEvent::Unsupported => return,
        };

        if let Err(e) = self.api.reply(&reply_token, messages).await {
            error!(%user_id, "reply failed: {e}");
        }
    }

    async fn image_received(&self, user_id: &str, message_id: &str) -> Vec<Message> {
        let (image, mime_type) = match self.api.content(message_id).await {
            Ok(content) => content,
            Err(e) => {
                error!(%user_id, %message_id, "could not download image: {e}");
                return vec![Message::text(self.editor.catalog().analysis_failed())];
            }
        };
        info!(%user_id, %message_id, bytes = image.len(), %mime_type, "image received");

        if let Some(dir) = &self.image_dir {
            match archive_image(dir, message_id, &mime_type, &image).await {
                Ok(path) => debug!("image saved to {}", path.display()),
                Err(e) => warn!("could not archive image {message_id}: {e}"),
            }
        }

        self.run(InboundEvent::image(user_id, image, mime_type)).await
    }

    async fn run(&self, event: InboundEvent) -> Vec<Message> {
        let kind = event.kind.name();
        let action = self
            .telemetry
            .instrument_event(kind, self.editor.handle(event), |action| {
                !matches!(action, OutboundAction::Error(_))
            })
            .await;
        render(&action)
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type.split(';').next().unwrap_or_default().trim() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Writes `received_image_<id>.<ext>` under `dir`, creating `dir` if needed.
pub async fn archive_image(dir: &Path, message_id: &str, mime_type: &str, image: &[u8]) -> std::io::Result<PathBuf> {
    // message ids come from LINE, but keep them from escaping `dir`
    let safe_id: String = message_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    let path = dir.join(format!("received_image_{safe_id}.{}", extension_for(mime_type)));
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, image).await?;
    Ok(path)
}
