use crate::pipeline::Record;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Resolves one routing string (cluster id, topic or broker list) from a
/// record. Injected per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// Always resolves to the same value.
    Constant(String),
    /// Resolves a dotted field path against the record content.
    Field(String),
}

impl Selector {
    /// Resolving to an empty string is a failure: an empty cluster, topic
    /// or host list is never routable.
    pub fn select(&self, record: &Record) -> Result<String> {
        let resolved = match self {
            Selector::Constant(value) => Some(value.clone()),
            Selector::Field(path) => field_value(&record.content, path),
        };
        match resolved {
            Some(value) if !value.is_empty() => Ok(value),
            Some(_) => Err(Error::Selector(format!("{} resolved to empty string", self))),
            None => Err(Error::Selector(format!("{} not found in record", self))),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Constant(value) => write!(f, "constant '{}'", value),
            Selector::Field(path) => write!(f, "field '{}'", path),
        }
    }
}

/// The per-record routing triple: which cluster, which topic, and which
/// broker set to connect to on a cache miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSelector {
    pub cluster: Selector,
    pub topic: Selector,
    pub hosts: Selector,
}

/// Identifies where a record is delivered: a (cluster, topic) pair.
///
/// Connection granularity is deliberately per (cluster, topic): two records
/// sharing a cluster but not a topic use distinct connections. The compound
/// key is used consistently for cache membership, lookup and insertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationKey {
    pub cluster: String,
    pub topic: String,
}

impl DestinationKey {
    pub fn new(cluster: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.cluster, self.topic)
    }
}

pub(crate) fn field_value(record: &Value, field_path: &str) -> Option<String> {
    let parts: Vec<&str> = field_path.split('.').collect();
    let mut current = record;

    for part in parts {
        match current.get(part) {
            Some(value) => current = value,
            None => {
                debug!("Field '{}' not found in record", part);
                return None;
            }
        }
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        _ => Some(current.to_string()),
    }
}
