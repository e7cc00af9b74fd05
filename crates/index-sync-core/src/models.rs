//! Core data models shared by the live sync and batch rebuild paths.
//!
//! A [`Record`] is owned by the backing store; the sync machinery only reads
//! it. A [`Document`] is what a record becomes inside one [`IndexTarget`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::routing::ModelOptions;

/// Identity of a record: its concrete type plus the ordered primary-key tuple.
///
/// Two `Record` instances with equal identities are the same logical row,
/// regardless of which instance observed it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordIdentity {
    pub model: String,
    pub key: Vec<String>,
}

impl RecordIdentity {
    pub fn new(model: impl Into<String>, key: Vec<String>) -> Self {
        Self {
            model: model.into(),
            key,
        }
    }

    /// Deterministic key of the record's document in every index target.
    pub fn document_key(&self) -> String {
        let mut out = self.model.clone();
        for part in &self.key {
            out.push(':');
            out.push_str(part);
        }
        out
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.model, self.key.join(","))
    }
}

/// A backing-store entity subject to indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub model: String,
    pub key: Vec<String>,
    pub fields: Map<String, Value>,
    pub is_new: bool,
    pub is_modified: bool,
}

impl Record {
    /// A record that has never been persisted.
    pub fn new(model: impl Into<String>, key: Vec<String>) -> Self {
        Self {
            model: model.into(),
            key,
            fields: Map::new(),
            is_new: true,
            is_modified: false,
        }
    }

    /// A record as loaded from the store: neither new nor modified.
    pub fn persisted(model: impl Into<String>, key: Vec<String>, fields: Map<String, Value>) -> Self {
        Self {
            model: model.into(),
            key,
            fields,
            is_new: false,
            is_modified: false,
        }
    }

    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity::new(self.model.clone(), self.key.clone())
    }

    /// Set a field, flagging the record as modified when the value changes.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        if self.fields.get(&field) != Some(&value) {
            self.fields.insert(field, value);
            self.is_modified = true;
        }
    }

    /// Whether the record carries changes that must reach the index.
    pub fn needs_save_sync(&self) -> bool {
        self.is_new || self.is_modified
    }

    /// Reset mutation flags after a successful write.
    pub fn mark_persisted(&mut self) {
        self.is_new = false;
        self.is_modified = false;
    }
}

/// One (index, culture) pair that should hold a document for a record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexTarget {
    pub index: String,
    pub culture: String,
}

impl IndexTarget {
    pub fn new(index: impl Into<String>, culture: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            culture: culture.into(),
        }
    }
}

impl fmt::Display for IndexTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.culture)
    }
}

/// A record rendered for one index target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// See [`RecordIdentity::document_key`].
    pub key: String,
    /// The configured model the record was routed through. Purges delete by tag.
    pub tag: String,
    /// The record's concrete type.
    pub model: String,
    pub title: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl Document {
    /// Render `record` for `culture` using the routed model's options.
    ///
    /// An empty `fields` list indexes every field. A field whose value is an
    /// object is treated as a per-culture translation table: only the entry
    /// for `culture` is indexed, and the field is skipped when there is none.
    pub fn build(record: &Record, tag: &str, options: &ModelOptions, culture: &str) -> Self {
        let mut fields = BTreeMap::new();
        let wanted: Vec<&String> = if options.fields.is_empty() {
            record.fields.keys().collect()
        } else {
            options.fields.iter().collect()
        };

        for name in wanted {
            if let Some(text) = record.fields.get(name).and_then(|v| field_text(v, culture)) {
                fields.insert(name.clone(), text);
            }
        }

        let title = options
            .title
            .as_ref()
            .and_then(|t| record.fields.get(t))
            .and_then(|v| field_text(v, culture));

        Self {
            key: record.identity().document_key(),
            tag: tag.to_string(),
            model: record.model.clone(),
            title,
            fields,
        }
    }
}

fn field_text(value: &Value, culture: &str) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get(culture).and_then(|v| field_text(v, culture)),
        other => Some(other.to_string()),
    }
}

/// Canonical lower-snake-case form of a model name (`BlogPost` → `blog_post`).
pub fn underscore(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if prev_lower || (prev_upper && next_lower) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' || c == ' ' || c == ':' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}
