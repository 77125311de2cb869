use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{fieldset::FieldSet, locale::Catalog};

pub const DEFAULT_LABEL_WIDTH: usize = 10;

/// LINE rejects button labels longer than this.
pub const MAX_LABEL_WIDTH: usize = 40;

/// LINE's limit on postback `data`, in characters.
pub const MAX_POSTBACK_CHARS: usize = 300;

/// Action value carried by the submit token.
const SUBMIT_ACTION: &str = "get_result";

/// Which part of a field the user wants to edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aspect {
    Name,
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSelection {
    pub field: String,
    pub aspect: Aspect,
}

impl FieldSelection {
    pub fn new(field: impl Into<String>, aspect: Aspect) -> Self {
        Self { field: field.into(), aspect }
    }
}

/// A decoded selection token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Field(FieldSelection),
    Submit,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("selection token is malformed: {0}")]
    Malformed(String),

    #[error("selection token carries unknown action `{0}`")]
    UnknownAction(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("field set is empty, nothing to render")]
    Empty,

    #[error("field name is too long for a selection token ({chars} characters)")]
    NameTooLong { chars: usize },
}

/// On-the-wire shape of a token. Field picks are `{"key", "edit_type"}`,
/// the submit button is `{"action": "get_result"}`.
#[derive(Debug, Serialize, Deserialize)]
struct TokenWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    edit_type: Option<Aspect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
}

impl Selection {
    pub fn encode(&self) -> String {
        let wire = match self {
            Selection::Field(sel) => TokenWire {
                key: Some(sel.field.clone()),
                edit_type: Some(sel.aspect),
                action: None,
            },
            Selection::Submit => TokenWire {
                key: None,
                edit_type: None,
                action: Some(SUBMIT_ACTION.to_string()),
            },
        };
        // a struct of strings always serializes
        serde_json::to_string(&wire).unwrap_or_default()
    }

    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let wire: TokenWire =
            serde_json::from_str(token).map_err(|e| TokenError::Malformed(e.to_string()))?;

        if let Some(action) = wire.action {
            return if action == SUBMIT_ACTION {
                Ok(Selection::Submit)
            } else {
                Err(TokenError::UnknownAction(action))
            };
        }

        match (wire.key, wire.edit_type) {
            (Some(field), Some(aspect)) => Ok(Selection::Field(FieldSelection { field, aspect })),
            (None, _) => Err(TokenError::Malformed("missing `key`".into())),
            (_, None) => Err(TokenError::Malformed("missing `edit_type`".into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceEntry {
    pub label: String,
    /// Echoed into the chat when the entry is tapped.
    pub display_text: String,
    pub token: String,
    pub aspect: Aspect,
}

/// One field rendered as a name entry and a value entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceRow {
    pub field: String,
    pub name: ChoiceEntry,
    pub value: ChoiceEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceUi {
    pub title: String,
    pub alt_text: String,
    pub rows: Vec<ChoiceRow>,
}

impl ChoiceUi {
    /// All selectable entries in display order, name before value.
    pub fn entries(&self) -> impl Iterator<Item = &ChoiceEntry> {
        self.rows.iter().flat_map(|r| [&r.name, &r.value])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationUi {
    pub prompt: String,
    pub hint: String,
    pub action_label: String,
    pub alt_text: String,
    pub token: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ChoiceUiBuilder {
    label_width: usize,
    catalog: Catalog,
}

impl ChoiceUiBuilder {
    pub fn new(label_width: usize, catalog: Catalog) -> Self {
        Self {
            label_width: label_width.clamp(1, MAX_LABEL_WIDTH),
            catalog,
        }
    }

    pub fn build(&self, fields: &FieldSet) -> Result<ChoiceUi, BuildError> {
        if fields.is_empty() {
            return Err(BuildError::Empty);
        }

        let rows = fields
            .iter()
            .map(|(name, value)| {
                let shown = value.unwrap_or(self.catalog.absent_value());
                Ok(ChoiceRow {
                    field: name.to_string(),
                    name: self.entry(name, name, Aspect::Name)?,
                    value: self.entry(name, shown, Aspect::Value)?,
                })
            })
            .collect::<Result<_, BuildError>>()?;

        Ok(ChoiceUi {
            title: self.catalog.choice_title().to_string(),
            alt_text: self.catalog.choice_alt_text().to_string(),
            rows,
        })
    }

    pub fn build_confirmation(&self) -> ConfirmationUi {
        ConfirmationUi {
            prompt: self.catalog.confirm_prompt().to_string(),
            hint: self.catalog.choice_hint().to_string(),
            action_label: self.catalog.confirm_label().to_string(),
            alt_text: self.catalog.confirm_alt_text().to_string(),
            token: Selection::Submit.encode(),
        }
    }

    fn entry(&self, field: &str, shown: &str, aspect: Aspect) -> Result<ChoiceEntry, BuildError> {
        let token = Selection::Field(FieldSelection::new(field, aspect)).encode();
        let chars = token.chars().count();
        if chars > MAX_POSTBACK_CHARS {
            return Err(BuildError::NameTooLong { chars });
        }

        // LINE refuses the whole message if any label is empty
        let mut label = truncate(shown.trim(), self.label_width);
        if label.is_empty() {
            label = self.catalog.absent_value().to_string();
        }

        Ok(ChoiceEntry {
            label,
            display_text: self.catalog.selected(field, aspect),
            token,
            aspect,
        })
    }
}

impl Default for ChoiceUiBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_LABEL_WIDTH, Catalog::default())
    }
}

/// Cuts `text` to at most `width` characters.
pub fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}
