use crate::pipeline::Record;
use crate::route::field_value;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How to derive the optional partition/ordering key for an outbound message.
///
/// Key extraction is best-effort: a strategy that cannot resolve against a
/// record leaves the key unset, it never fails the record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    #[default]
    None,
    Constant(String),
    FieldPath(String),
    Composite(Vec<String>),
}

impl KeyStrategy {
    pub fn extract_key(&self, record: &Record) -> Option<String> {
        match self {
            KeyStrategy::None => None,

            KeyStrategy::Constant(value) => Some(value.clone()),

            KeyStrategy::FieldPath(path) => field_value(&record.content, path),

            KeyStrategy::Composite(fields) => extract_composite_key(record, fields),
        }
    }
}

fn extract_composite_key(record: &Record, fields: &[String]) -> Option<String> {
    let mut key_parts = Vec::new();

    for field in fields {
        if let Some(value) = field_value(&record.content, field) {
            key_parts.push(value);
        } else {
            debug!("Missing field '{}' for composite key", field);
            return None;
        }
    }

    if key_parts.is_empty() {
        None
    } else {
        Some(key_parts.join(":"))
    }
}
