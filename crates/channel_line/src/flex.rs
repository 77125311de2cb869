//! Small builders for Flex Message JSON.
//!
//! Only the components the bot renders are covered: bubbles, vertical boxes,
//! bold text and postback buttons.
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Link,
    Primary,
    Secondary,
}

impl ButtonStyle {
    fn as_str(&self) -> &'static str {
        match self {
            ButtonStyle::Link => "link",
            ButtonStyle::Primary => "primary",
            ButtonStyle::Secondary => "secondary",
        }
    }
}

pub fn bubble(body: Value) -> Value {
    json!({
        "type": "bubble",
        "body": body,
    })
}

pub fn vertical_box(contents: Vec<Value>) -> Value {
    json!({
        "type": "box",
        "layout": "vertical",
        "contents": contents,
    })
}

/// Same as [`vertical_box`] but with the tight spacing used for button rows.
pub fn compact_box(contents: Vec<Value>) -> Value {
    json!({
        "type": "box",
        "layout": "vertical",
        "contents": contents,
        "spacing": "none",
        "margin": "none",
        "paddingAll": "0px",
    })
}

pub fn bold_text(text: &str) -> Value {
    json!({
        "type": "text",
        "text": text,
        "weight": "bold",
        "size": "sm",
        "wrap": true,
        "margin": "md",
    })
}

/// A button that echoes `data` back as a postback event when tapped.
pub fn postback_button(
    label: &str,
    data: &str,
    display_text: Option<&str>,
    style: ButtonStyle,
) -> Value {
    let mut action = json!({
        "type": "postback",
        "label": label,
        "data": data,
    });
    if let Some(display) = display_text {
        action["displayText"] = json!(display);
    }
    json!({
        "type": "button",
        "action": action,
        "style": style.as_str(),
        "height": "sm",
        "margin": "none",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postback_button_without_display_text() {
        let b = postback_button("Submit", "{}", None, ButtonStyle::Primary);
        assert_eq!(b["action"]["type"], "postback");
        assert_eq!(b["style"], "primary");
        assert!(b["action"].get("displayText").is_none());
    }

    #[test]
    fn test_bubble_wraps_body() {
        let b = bubble(vertical_box(vec![bold_text("hi")]));
        assert_eq!(b["type"], "bubble");
        assert_eq!(b["body"]["contents"][0]["text"], "hi");
    }
}
