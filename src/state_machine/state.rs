//! Session state types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Lifecycle of the duplex channel
///
/// Every dial gets a fresh generation. Channel events and reconnect timers
/// carry the generation they belong to, and anything stale is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionState {
    /// No channel. `generation` is the last one dialed; `retry_pending` is set
    /// while a reconnect timer for it is armed.
    Closed { generation: u64, retry_pending: bool },
    /// Dial in flight
    Connecting { generation: u64 },
    Open { generation: u64 },
    /// Explicitly torn down; terminal
    TornDown,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Closed {
            generation: 0,
            retry_pending: false,
        }
    }
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open { .. })
    }

    pub fn is_torn_down(&self) -> bool {
        matches!(self, SessionState::TornDown)
    }

    /// Status shown to the user for this state
    pub fn status(&self) -> ConnectionStatus {
        match self {
            SessionState::Connecting { .. } => ConnectionStatus::Connecting,
            SessionState::Open { .. } => ConnectionStatus::Open,
            SessionState::Closed {
                retry_pending: true,
                ..
            } => ConnectionStatus::Reconnecting,
            SessionState::Closed { .. } | SessionState::TornDown => ConnectionStatus::Closed,
        }
    }
}

/// Connection status as reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Open => write!(f, "open"),
            ConnectionStatus::Reconnecting => write!(f, "reconnecting"),
            ConnectionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Default delay before a single reconnect attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Session context (mostly immutable configuration)
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub conversation_id: String,
    pub user_id: String,
    /// Sender id of the remote actor whose sends are played back
    pub actor_id: String,
    /// Display name of the remote actor, used in recall notices
    pub actor_name: String,
    /// Sent verbatim in the `init` frame of every connection
    pub session_config: Value,
    pub reconnect_delay: Duration,
    /// Remembered across reconnects; changed only by `Effect::RememberDebugMode`
    pub debug_mode: bool,
}

impl SessionContext {
    pub fn new(conversation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            actor_id: "rin".to_string(),
            actor_name: "Rin".to_string(),
            session_config: Value::Object(serde_json::Map::new()),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            debug_mode: false,
        }
    }

    pub fn with_actor(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.actor_id = id.into();
        self.actor_name = name.into();
        self
    }

    pub fn with_session_config(mut self, config: Value) -> Self {
        self.session_config = config;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }
}
