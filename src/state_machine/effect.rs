//! Effects produced by state transitions

use super::state::ConnectionStatus;
use crate::db::Message;
use crate::wire::OutboundFrame;
use serde_json::Value;
use std::time::Duration;

/// Where merged messages came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOrigin {
    /// A `history` batch (initial load or sync catch-up)
    History,
    /// A single live `message` frame
    Live,
}

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Dial a new channel tagged with `generation`
    Dial { generation: u64 },

    /// Drop the live channel, if any
    CloseChannel,

    /// Write `sync` with the store's cursor as of execution time
    RequestSync,

    /// Write a frame on the live channel
    SendFrame { frame: OutboundFrame },

    /// Append a user message to the store, then write it as a `message` frame
    SendLocalText { text: String },

    /// Arm a one-shot reconnect timer
    ScheduleReconnect { generation: u64, delay: Duration },

    /// Merge into the conversation store
    MergeMessages {
        messages: Vec<Message>,
        origin: MergeOrigin,
    },

    /// Remote cleared the conversation: drop messages and reset the theme
    ClearConversation,

    /// Presence flag for one actor
    SetPresence { user_id: String, is_typing: bool },

    /// Hand a diagnostic entry to observers
    ForwardDebugLog { entry: Value },

    /// Record debug mode in the session context
    RememberDebugMode { enabled: bool },

    /// Write the store through to local storage
    FlushStore,

    /// Tell observers about a connection status change
    NotifyConnection { status: ConnectionStatus },
}

impl Effect {
    pub fn send(frame: OutboundFrame) -> Self {
        Effect::SendFrame { frame }
    }

    pub fn notify(status: ConnectionStatus) -> Self {
        Effect::NotifyConnection { status }
    }

    pub fn merge_history(messages: Vec<Message>) -> Self {
        Effect::MergeMessages {
            messages,
            origin: MergeOrigin::History,
        }
    }

    pub fn merge_live(message: Message) -> Self {
        Effect::MergeMessages {
            messages: vec![message],
            origin: MergeOrigin::Live,
        }
    }
}
