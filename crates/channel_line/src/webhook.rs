use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Body of a webhook delivery. LINE batches zero or more events per request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookBody {
    #[serde(default)]
    pub destination: Option<String>,
    /// Events that fail to deserialize are logged and dropped, so one odd
    /// event does not cost the rest of the batch.
    #[serde(default, deserialize_with = "skip_malformed")]
    pub events: Vec<WebhookEvent>,
}

fn skip_malformed<'de, D>(deserializer: D) -> Result<Vec<WebhookEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, event)| match serde_json::from_value(event) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(index, "skipping malformed webhook event: {e}");
                None
            }
        })
        .collect())
}

/// The subset of webhook events the bot reacts to. Everything else
/// (follow, unfollow, join, beacon, ...) lands in `Unsupported`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebhookEvent {
    Message(MessageEvent),
    Postback(PostbackEvent),
    #[serde(other)]
    Unsupported,
}

impl WebhookEvent {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            WebhookEvent::Message(ev) => ev.source.user_id.as_deref(),
            WebhookEvent::Postback(ev) => ev.source.user_id.as_deref(),
            WebhookEvent::Unsupported => None,
        }
    }

    pub fn reply_token(&self) -> Option<&str> {
        match self {
            WebhookEvent::Message(ev) => ev.reply_token.as_deref(),
            WebhookEvent::Postback(ev) => ev.reply_token.as_deref(),
            WebhookEvent::Unsupported => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    #[serde(default)]
    pub reply_token: Option<String>,
    pub source: Source,
    pub message: EventMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventMessage {
    Text { id: String, text: String },
    Image { id: String },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostbackEvent {
    #[serde(default)]
    pub reply_token: Option<String>,
    pub source: Source,
    pub postback: Postback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Postback {
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_webhook_body() {
        let raw = r#"{
            "destination": "Uxxxxxxxx",
            "events": [
                {
                    "type": "message",
                    "replyToken": "r1",
                    "source": {"type": "user", "userId": "U1"},
                    "timestamp": 1700000000000,
                    "message": {"type": "text", "id": "m1", "text": "1200"}
                },
                {
                    "type": "message",
                    "replyToken": "r2",
                    "source": {"type": "user", "userId": "U1"},
                    "message": {"type": "image", "id": "m2", "contentProvider": {"type": "line"}}
                },
                {
                    "type": "postback",
                    "replyToken": "r3",
                    "source": {"type": "user", "userId": "U2"},
                    "postback": {"data": "{\"action\":\"get_result\"}"}
                },
                {
                    "type": "follow",
                    "replyToken": "r4",
                    "source": {"type": "user", "userId": "U3"}
                }
            ]
        }"#;

        let body: WebhookBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.events.len(), 4);

        match &body.events[0] {
            WebhookEvent::Message(ev) => {
                assert_eq!(ev.reply_token.as_deref(), Some("r1"));
                assert_eq!(
                    ev.message,
                    EventMessage::Text { id: "m1".into(), text: "1200".into() }
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match &body.events[1] {
            WebhookEvent::Message(ev) => {
                assert_eq!(ev.message, EventMessage::Image { id: "m2".into() })
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(body.events[2].user_id(), Some("U2"));
        assert_eq!(body.events[2].reply_token(), Some("r3"));
        assert_eq!(body.events[3], WebhookEvent::Unsupported);
    }

    #[test]
    fn test_unsupported_message_kind() {
        let raw = r#"{
            "type": "message",
            "source": {"type": "user", "userId": "U1"},
            "message": {"type": "sticker", "id": "s1", "packageId": "1"}
        }"#;
        let ev: WebhookEvent = serde_json::from_str(raw).unwrap();
        match ev {
            WebhookEvent::Message(m) => assert_eq!(m.message, EventMessage::Unsupported),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_event_does_not_drop_the_batch() {
        let raw = r#"{
            "destination": "U0",
            "events": [
                {"type": "message", "replyToken": "r1", "message": {"type": "text", "id": "m1", "text": "hi"}},
                {
                    "type": "postback",
                    "replyToken": "r2",
                    "source": {"type": "user", "userId": "U1"},
                    "postback": {"data": "{\"action\":\"get_result\"}"}
                }
            ]
        }"#;
        let body: WebhookBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.events.len(), 1);
        assert_eq!(body.events[0].reply_token(), Some("r2"));

        assert!(serde_json::from_str::<WebhookBody>(r#"{"events": {"type": "follow"}}"#).is_err());
    }

    #[test]
    fn test_verification_body_without_events() {
        let body: WebhookBody = serde_json::from_str(r#"{"destination":"U0","events":[]}"#).unwrap();
        assert!(body.events.is_empty());
    }
}
