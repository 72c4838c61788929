//! Duplex channel frame formats
//!
//! Inbound frames arrive as `{"type": T, "data": {...}}`. A frame without a
//! `data` envelope is read flat. Outbound frames are flat objects tagged by
//! `type`.

use crate::db::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A frame received from the remote peer
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Batch of messages, either the initial history or a sync response
    History { messages: Vec<Message> },
    /// A single new or updated message
    Message { message: Message },
    /// Presence update for one actor
    Typing { user_id: String, is_typing: bool },
    /// Remote cleared the conversation
    Clear,
    /// Opaque diagnostic entry
    DebugLog { entry: Value },
}

#[derive(Debug, Deserialize)]
struct TypingData {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    is_typing: bool,
}

impl InboundFrame {
    /// Decode a text frame. Unparseable payloads and unknown types yield `None`.
    pub fn decode(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let frame_type = value.get("type")?.as_str()?.to_string();
        let data = match value.get("data") {
            Some(data) if data.is_object() => data.clone(),
            _ => value,
        };

        match frame_type.as_str() {
            "history" => {
                let raw = data.get("messages")?.as_array()?;
                // One bad entry does not poison the whole batch
                let messages = raw
                    .iter()
                    .filter_map(|m| serde_json::from_value::<Message>(m.clone()).ok())
                    .collect();
                Some(InboundFrame::History { messages })
            }
            "message" => serde_json::from_value::<Message>(data)
                .ok()
                .map(|message| InboundFrame::Message { message }),
            "typing" => serde_json::from_value::<TypingData>(data)
                .ok()
                .map(|t| InboundFrame::Typing {
                    user_id: t.user_id,
                    is_typing: t.is_typing,
                }),
            "clear" => Some(InboundFrame::Clear),
            "debug_log" => Some(InboundFrame::DebugLog { entry: data }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::History { .. } => "history",
            InboundFrame::Message { .. } => "message",
            InboundFrame::Typing { .. } => "typing",
            InboundFrame::Clear => "clear",
            InboundFrame::DebugLog { .. } => "debug_log",
        }
    }
}

/// A frame written to the remote peer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Ask for every message strictly newer than `after_timestamp`
    Sync { after_timestamp: f64 },
    /// Session configuration, once per connection
    Init { config: Value },
    Message {
        id: String,
        content: String,
        metadata: Map<String, Value>,
    },
    Clear,
    DebugMode { enabled: bool },
}

impl OutboundFrame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Sync { .. } => "sync",
            OutboundFrame::Init { .. } => "init",
            OutboundFrame::Message { .. } => "message",
            OutboundFrame::Clear => "clear",
            OutboundFrame::DebugMode { .. } => "debug_mode",
        }
    }
}
