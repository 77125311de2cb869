//! Turns editor output into LINE messages.
//!
//! A choice UI is sent as three Flex bubbles: the field buttons, a one-line
//! hint and the submit button. A notice, when present, goes first as text.
use channel_line::Message;
use channel_line::flex::{self, ButtonStyle};
use serde_json::{Value, json};

use crate::choice::{ChoiceEntry, ChoiceUi, ConfirmationUi};
use crate::editor::OutboundAction;
use crate::forwarder::Notification;
use crate::locale::Catalog;

pub fn render(action: &OutboundAction) -> Vec<Message> {
    match action {
        OutboundAction::ChoiceUi { notice, ui, confirmation } => {
            let mut messages = Vec::with_capacity(4);
            if let Some(notice) = notice {
                messages.push(Message::text(notice));
            }
            messages.push(Message::flex(&ui.alt_text, choices_bubble(ui)));
            messages.push(Message::flex(&confirmation.hint, hint_bubble(&confirmation.hint)));
            messages.push(Message::flex(&confirmation.alt_text, confirmation_bubble(confirmation)));
            messages
        }
        OutboundAction::TextPrompt(text) | OutboundAction::Error(text) | OutboundAction::Ack(text) => {
            vec![Message::text(text)]
        }
    }
}

pub fn notification_text(catalog: &Catalog, notification: &Notification) -> &'static str {
    match notification {
        Notification::Submitted => catalog.submit_succeeded(),
        Notification::SubmissionFailed => catalog.submit_failed(),
        Notification::SubmissionError => catalog.submit_error(),
    }
}

fn button(entry: &ChoiceEntry, style: ButtonStyle) -> Value {
    flex::postback_button(&entry.label, &entry.token, Some(&entry.display_text), style)
}

fn choices_bubble(ui: &ChoiceUi) -> Value {
    let rows: Vec<Value> = ui
        .rows
        .iter()
        .map(|row| {
            flex::compact_box(vec![
                button(&row.name, ButtonStyle::Link),
                button(&row.value, ButtonStyle::Secondary),
            ])
        })
        .collect();

    let mut grid = flex::vertical_box(rows);
    grid["spacing"] = json!("sm");
    grid["margin"] = json!("md");
    grid["paddingAll"] = json!("10px");

    let mut body = flex::vertical_box(vec![flex::bold_text(&ui.title), grid]);
    body["spacing"] = json!("none");
    body["paddingAll"] = json!("10px");
    flex::bubble(body)
}

fn hint_bubble(hint: &str) -> Value {
    flex::bubble(flex::vertical_box(vec![flex::bold_text(hint)]))
}

fn confirmation_bubble(confirmation: &ConfirmationUi) -> Value {
    let mut submit = flex::postback_button(&confirmation.action_label, &confirmation.token, None, ButtonStyle::Primary);
    submit["margin"] = json!("sm");
    let mut actions = flex::vertical_box(vec![submit]);
    actions["spacing"] = json!("sm");
    flex::bubble(flex::vertical_box(vec![flex::bold_text(&confirmation.prompt), actions]))
}
