use std::sync::Arc;

use async_trait::async_trait;
use channel_line::Message;
use tracing::{error, info};

use super::MessagingApi;
use super::render::notification_text;
use crate::forwarder::{Notification, Notifier};
use crate::locale::Catalog;
use crate::logger::Telemetry;

/// Delivers submission outcomes as push messages.
pub struct LineNotifier {
    api: Arc<dyn MessagingApi>,
    catalog: Catalog,
    telemetry: Option<Arc<Telemetry>>,
}

impl LineNotifier {
    pub fn new(api: Arc<dyn MessagingApi>, catalog: Catalog) -> Self {
        Self { api, catalog, telemetry: None }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }
}

#[async_trait]
impl Notifier for LineNotifier {
    async fn notify(&self, user_id: &str, notification: Notification) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_submission(&notification);
        }

        let text = notification_text(&self.catalog, &notification);
        match self.api.push(user_id, vec![Message::text(text)]).await {
            Ok(()) => info!(%user_id, ?notification, "submission outcome pushed"),
            Err(e) => error!(%user_id, ?notification, "could not push submission outcome: {e}"),
        }
    }
}
