//! Events that can occur in a sync session

use crate::wire::InboundFrame;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Caller intents
    Connect,
    SendText {
        text: String,
    },
    RequestClear,
    SetDebugMode {
        enabled: bool,
    },
    VisibilityChanged {
        visible: bool,
    },
    Teardown,

    // Channel events
    ChannelOpened {
        generation: u64,
    },
    /// Dial did not produce a channel
    ChannelFailed {
        generation: u64,
        reason: String,
    },
    ChannelError {
        generation: u64,
        reason: String,
    },
    ChannelClosed {
        generation: u64,
    },
    FrameReceived {
        generation: u64,
        frame: InboundFrame,
    },

    // Timer events
    /// Reconnect timer armed after `generation` went down has fired
    ReconnectDue {
        generation: u64,
    },
}

impl Event {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connect => "connect",
            Event::SendText { .. } => "send_text",
            Event::RequestClear => "request_clear",
            Event::SetDebugMode { .. } => "set_debug_mode",
            Event::VisibilityChanged { .. } => "visibility_changed",
            Event::Teardown => "teardown",
            Event::ChannelOpened { .. } => "channel_opened",
            Event::ChannelFailed { .. } => "channel_failed",
            Event::ChannelError { .. } => "channel_error",
            Event::ChannelClosed { .. } => "channel_closed",
            Event::FrameReceived { .. } => "frame_received",
            Event::ReconnectDue { .. } => "reconnect_due",
        }
    }
}
