use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing message objects accepted by the reply and push endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Text {
        text: String,
    },
    Flex {
        #[serde(rename = "altText")]
        alt_text: String,
        contents: Value,
    },
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Message::Text { text: text.into() }
    }

    pub fn flex(alt_text: impl Into<String>, contents: Value) -> Self {
        Message::Flex {
            alt_text: alt_text.into(),
            contents,
        }
    }
}
