//! Database schema and types

use crate::emotion::EmotionMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// SQL schema for initialization
///
/// Every component owns one or more namespaces; a row is one JSON document.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS kv (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    PRIMARY KEY (namespace, key)
);

CREATE INDEX IF NOT EXISTS idx_kv_updated ON kv(namespace, updated_at DESC);
";

/// Message type tag (`type` on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    #[default]
    Text,
    /// Tombstone naming a prior message in `metadata.target_message_id`
    SystemRecall,
    /// Server-side types this client does not interpret (time separators etc.)
    Other(String),
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text" => MessageType::Text,
            // `recall_event` is the spelling older servers emit
            "system-recall" | "recall_event" => MessageType::SystemRecall,
            _ => MessageType::Other(s),
        }
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Text => write!(f, "text"),
            MessageType::SystemRecall => write!(f, "system-recall"),
            MessageType::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A message in a conversation, as stored locally and as carried by frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "session_id", deserialize_with = "null_as_default")]
    pub conversation_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sender_id: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    /// Seconds since the epoch, assigned by the originator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_recalled: bool,
    /// Shown locally before the server's copy arrived; its timestamp is the
    /// local clock and never counts toward the sync cursor
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_provisional: bool,
}

impl Message {
    /// A text message with no id and no timestamp yet
    pub fn text(
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            message_type: MessageType::Text,
            content: content.into(),
            timestamp: None,
            metadata: Map::new(),
            is_recalled: false,
            is_provisional: false,
        }
    }

    /// A recall tombstone targeting `target_id`
    pub fn recall(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        recalled_by: impl Into<String>,
        target_id: &str,
        timestamp: f64,
    ) -> Self {
        let mut metadata = Map::new();
        metadata.insert("target_message_id".to_string(), Value::from(target_id));
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            sender_id: recalled_by.into(),
            message_type: MessageType::SystemRecall,
            content: String::new(),
            timestamp: Some(timestamp),
            metadata,
            is_recalled: false,
            is_provisional: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_recall(&self) -> bool {
        self.message_type == MessageType::SystemRecall
    }

    /// Target of a recall tombstone, if this is one and it names a target
    pub fn recall_target(&self) -> Option<&str> {
        if !self.is_recall() {
            return None;
        }
        ["target_message_id", "targetMessageId"]
            .iter()
            .find_map(|key| self.metadata.get(*key).and_then(Value::as_str))
            .filter(|id| !id.is_empty())
    }

    /// Finite timestamp, if any
    pub fn finite_timestamp(&self) -> Option<f64> {
        self.timestamp.filter(|t| t.is_finite())
    }

    /// Display ordering key; missing timestamps sort first
    pub fn sort_key(&self) -> f64 {
        self.finite_timestamp().unwrap_or(0.0)
    }

    /// Non-empty emotion annotation carried in metadata
    pub fn emotion_map(&self) -> Option<EmotionMap> {
        let raw = self
            .metadata
            .get("emotion_map")
            .or_else(|| self.metadata.get("emotionMap"))?
            .as_object()?;

        let map: EmotionMap = raw
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect();

        if map.is_empty() {
            None
        } else {
            Some(map)
        }
    }
}

/// Treat an explicit JSON `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
