//! Editor form state for one dataset item.
//!
//! The schema is inferred from the item itself: a field holding a JSON
//! object or array (or a string that decodes to one) is *complex* and edited
//! as pretty-printed JSON text, everything else is plain text.

use serde_json::Value;

use crate::error::{DseditError, Result};
use crate::models::{DatasetItem, ItemData};

pub const INVALID_JSON_MESSAGE: &str = "must be a valid JSON object or array";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Complex,
}

/// How value changes leave the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Only an explicit `submit` produces values.
    #[default]
    Manual,
    /// Every change reports the full field map.
    Autosave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub kind: FieldKind,
    pub value: String,
    initial_text: String,
    initial_value: Value,
}

impl FormField {
    fn from_value(name: &str, value: &Value) -> Self {
        let (kind, text) = classify(value);
        Self {
            name: name.to_string(),
            kind,
            value: text.clone(),
            initial_text: text,
            initial_value: value.clone(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.value != self.initial_text
    }

    /// Convert the edited text back into a JSON value.
    fn to_value(&self) -> std::result::Result<Value, FieldError> {
        if !self.is_dirty() && self.kind == FieldKind::Text {
            return Ok(self.initial_value.clone());
        }
        match self.kind {
            FieldKind::Text => Ok(Value::String(self.value.clone())),
            FieldKind::Complex => parse_complex(&self.value).ok_or_else(|| FieldError {
                field: self.name.clone(),
                message: INVALID_JSON_MESSAGE.to_string(),
            }),
        }
    }
}

/// Classify a value and render it for editing.
pub fn classify(value: &Value) -> (FieldKind, String) {
    match value {
        Value::Object(_) | Value::Array(_) => (FieldKind::Complex, pretty(value)),
        Value::String(s) => match parse_structured(s) {
            Some(parsed) => (FieldKind::Complex, pretty(&parsed)),
            None => (FieldKind::Text, s.clone()),
        },
        other => (FieldKind::Text, other.to_string()),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn parse_structured(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(v @ (Value::Object(_) | Value::Array(_))) => Some(v),
        _ => None,
    }
}

/// Empty text is allowed and becomes `null`.
fn parse_complex(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return Some(Value::Null);
    }
    parse_structured(text)
}

/// Dynamic form over one item's `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorForm {
    item_id: String,
    mode: SaveMode,
    fields: Vec<FormField>,
}

impl EditorForm {
    pub fn new(item: &DatasetItem, mode: SaveMode) -> Self {
        Self {
            item_id: item.id.clone(),
            mode,
            fields: item
                .data
                .iter()
                .map(|(name, value)| FormField::from_value(name, value))
                .collect(),
        }
    }

    /// Re-key the form onto a newly loaded item.
    pub fn reset(&mut self, item: &DatasetItem) {
        *self = Self::new(item, self.mode);
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn mode(&self) -> SaveMode {
        self.mode
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_dirty(&self) -> bool {
        self.fields.iter().any(FormField::is_dirty)
    }

    /// Set a field's text. In autosave mode, returns the full converted field
    /// map to hand to the autosave controller; `None` while any complex field
    /// is invalid.
    pub fn set_value(&mut self, name: &str, value: impl Into<String>) -> Result<Option<ItemData>> {
        let field = self
            .fields
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| DseditError::Other(format!("Unknown field: {name}")))?;
        field.value = value.into();

        if self.mode == SaveMode::Manual {
            return Ok(None);
        }
        Ok(self.values().ok())
    }

    pub fn errors(&self) -> Vec<FieldError> {
        self.fields.iter().filter_map(|f| f.to_value().err()).collect()
    }

    /// The converted field map, or every field error.
    pub fn values(&self) -> std::result::Result<ItemData, Vec<FieldError>> {
        let mut data = ItemData::new();
        let mut errors = vec![];
        for field in &self.fields {
            match field.to_value() {
                Ok(v) => {
                    data.insert(field.name.clone(), v);
                }
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(data)
        } else {
            Err(errors)
        }
    }

    /// Validate and convert for an explicit save.
    pub fn submit(&self) -> Result<ItemData> {
        self.values().map_err(DseditError::Validation)
    }

    /// Rebase the initial snapshot on the current values after a save.
    pub fn mark_saved(&mut self) {
        let Ok(data) = self.values() else {
            return;
        };
        for field in &mut self.fields {
            if let Some(v) = data.get(&field.name) {
                field.initial_value = v.clone();
            }
            field.initial_text = field.value.clone();
        }
    }
}
