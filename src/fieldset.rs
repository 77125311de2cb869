use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Extracted receipt data under edit: field name → optional value.
///
/// Iteration order is display order and survives every mutation except a
/// rename, which moves the renamed field to the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSet(IndexMap<String, Option<String>>);

/// What to do when a rename targets a name another field already uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenamePolicy {
    /// Refuse the rename and keep both fields.
    #[default]
    Reject,
    /// The other field's value is replaced by the renamed field's value.
    Overwrite,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("extraction output is not valid JSON: {detail}")]
    Syntax { detail: String, raw: String },

    #[error("extraction output is a JSON {found}, expected an object")]
    NotAnObject { found: &'static str, raw: String },
}

impl ParseError {
    /// The text that failed to parse, kept for operator diagnostics.
    pub fn raw(&self) -> &str {
        match self {
            ParseError::Syntax { raw, .. } | ParseError::NotAnObject { raw, .. } => raw,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldSetError {
    #[error("field `{0}` does not exist")]
    UnknownField(String),

    #[error("field name `{0}` is already in use")]
    NameInUse(String),
}

impl FieldSet {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<Option<&str>> {
        self.0.get(field).map(|v| v.as_deref())
    }

    /// Appends a field, or replaces the value in place if it already exists.
    pub fn insert(&mut self, field: impl Into<String>, value: Option<String>) {
        self.0.insert(field.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Overwrites the value of an existing field, keeping its position.
    pub fn set_value(&mut self, field: &str, value: impl Into<String>) -> Result<(), FieldSetError> {
        match self.0.get_mut(field) {
            Some(slot) => {
                *slot = Some(value.into());
                Ok(())
            }
            None => Err(FieldSetError::UnknownField(field.to_string())),
        }
    }

    /// Renames `old` to `new`, carrying the value over.
    pub fn rename(&mut self, old: &str, new: &str, policy: RenamePolicy) -> Result<(), FieldSetError> {
        if !self.0.contains_key(old) {
            return Err(FieldSetError::UnknownField(old.to_string()));
        }
        if old == new {
            return Ok(());
        }
        if self.0.contains_key(new) && policy == RenamePolicy::Reject {
            return Err(FieldSetError::NameInUse(new.to_string()));
        }
        // shift_remove keeps the relative order of the remaining fields
        if let Some(value) = self.0.shift_remove(old) {
            self.0.insert(new.to_string(), value);
        }
        Ok(())
    }

    /// Flat JSON object; absent values become `null`.
    pub fn to_json(&self) -> serde_json::Map<String, Value> {
        self.0
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Some(s) => Value::String(s.clone()),
                    None => Value::Null,
                };
                (k.clone(), value)
            })
            .collect()
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.to_json()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, Option<V>)> for FieldSet {
    fn from_iter<T: IntoIterator<Item = (K, Option<V>)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.map(Into::into))).collect())
    }
}

/// Parses vision-model output into a [`FieldSet`].
///
/// A markdown code fence around the JSON is tolerated. Strings are kept
/// verbatim, numbers and booleans use their JSON spelling, `null` becomes an
/// absent value, nested arrays/objects are kept as compact JSON text.
pub fn parse(raw: &str) -> Result<FieldSet, ParseError> {
    let body = strip_code_fence(raw);

    // serde_json is built with `preserve_order`, so object keys keep document order
    let value: Value = serde_json::from_str(body).map_err(|e| ParseError::Syntax {
        detail: e.to_string(),
        raw: raw.to_string(),
    })?;

    let object = match value {
        Value::Object(map) => map,
        other => {
            return Err(ParseError::NotAnObject {
                found: json_kind(&other),
                raw: raw.to_string(),
            });
        }
    };

    Ok(FieldSet(
        object
            .into_iter()
            .map(|(k, v)| (k, scalar_text(v)))
            .collect(),
    ))
}

fn strip_code_fence(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // drop an optional language tag on the opening line
        let tag_len = rest
            .find(|c: char| c.is_whitespace() || c == '{' || c == '[')
            .unwrap_or(rest.len());
        let tag = &rest[..tag_len];
        body = if tag.is_empty() || tag.eq_ignore_ascii_case("json") {
            &rest[tag_len..]
        } else {
            rest
        };
        if let Some(inner) = body.trim_end().strip_suffix("```") {
            body = inner;
        }
        body = body.trim();
    }
    body
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested @ (Value::Array(_) | Value::Object(_)) => Some(nested.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
