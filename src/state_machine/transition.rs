//! Pure state transition function
//!
//! Given the same state, context and event this always produces the same
//! result. Every I/O consequence is returned as an `Effect`.

use super::{ConnectionStatus, Effect, Event, SessionContext, SessionState};
use crate::wire::{InboundFrame, OutboundFrame};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
///
/// None of these are fatal; the executor logs them and carries on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Channel is not open, dropping {0}")]
    NotConnected(&'static str),
    #[error("Session has been torn down")]
    TornDown,
}

/// Pure transition function
#[allow(clippy::too_many_lines)] // One arm per (state, event) pair reads best flat
pub fn transition(
    state: &SessionState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    let unchanged = || TransitionResult::new(*state);

    match (*state, event) {
        // ============================================================
        // Teardown (terminal)
        // ============================================================
        (SessionState::TornDown, Event::Teardown) => Ok(unchanged()),

        (_, Event::Teardown) => Ok(TransitionResult::new(SessionState::TornDown)
            .with_effect(Effect::CloseChannel)
            .with_effect(Effect::FlushStore)
            .with_effect(Effect::notify(ConnectionStatus::Closed))),

        (SessionState::TornDown, Event::Connect) => Err(TransitionError::TornDown),

        // ============================================================
        // Dialing
        // ============================================================
        (SessionState::Closed { generation, .. }, Event::Connect) => Ok(dial(generation + 1)),

        // Already dialing or open
        (SessionState::Connecting { .. } | SessionState::Open { .. }, Event::Connect) => {
            Ok(unchanged())
        }

        // The timer armed for this generation fired and nothing has changed
        // since: still wanted
        (
            SessionState::Closed {
                generation,
                retry_pending: true,
            },
            Event::ReconnectDue { generation: due },
        ) if due == generation => Ok(dial(generation + 1)),

        (_, Event::ReconnectDue { .. }) => Ok(unchanged()),

        (SessionState::Connecting { generation }, Event::ChannelOpened { generation: g })
            if g == generation =>
        {
            Ok(TransitionResult::new(SessionState::Open { generation })
                .with_effects(on_open(context)))
        }

        // ============================================================
        // Faults: one reconnect per connection
        // ============================================================
        (
            SessionState::Connecting { generation } | SessionState::Open { generation },
            Event::ChannelFailed { generation: g, .. }
            | Event::ChannelError { generation: g, .. }
            | Event::ChannelClosed { generation: g },
        ) if g == generation => Ok(TransitionResult::new(SessionState::Closed {
            generation,
            retry_pending: true,
        })
        .with_effect(Effect::CloseChannel)
        .with_effect(Effect::notify(ConnectionStatus::Reconnecting))
        .with_effect(Effect::ScheduleReconnect {
            generation,
            delay: context.reconnect_delay,
        })),

        // Stale generation, second fault report, or nothing live
        (
            _,
            Event::ChannelOpened { .. }
            | Event::ChannelFailed { .. }
            | Event::ChannelError { .. }
            | Event::ChannelClosed { .. },
        ) => Ok(unchanged()),

        // ============================================================
        // Inbound frames
        // ============================================================
        (SessionState::Open { generation }, Event::FrameReceived { generation: g, frame })
            if g == generation =>
        {
            Ok(unchanged().with_effects(dispatch_frame(context, frame)))
        }

        (_, Event::FrameReceived { .. }) => Ok(unchanged()),

        // ============================================================
        // Outbound intents
        // ============================================================
        (SessionState::Open { .. }, Event::SendText { text }) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(unchanged());
            }
            Ok(unchanged().with_effect(Effect::SendLocalText {
                text: text.to_string(),
            }))
        }

        (_, Event::SendText { .. }) => Err(TransitionError::NotConnected("message")),

        (SessionState::Open { .. }, Event::RequestClear) => {
            Ok(unchanged().with_effect(Effect::send(OutboundFrame::Clear)))
        }

        (_, Event::RequestClear) => Err(TransitionError::NotConnected("clear")),

        (_, Event::SetDebugMode { enabled }) => {
            let result = unchanged().with_effect(Effect::RememberDebugMode { enabled });
            if state.is_open() {
                Ok(result.with_effect(Effect::send(OutboundFrame::DebugMode { enabled })))
            } else {
                Ok(result)
            }
        }

        // ============================================================
        // Visibility
        // ============================================================
        (_, Event::VisibilityChanged { visible: false }) => {
            Ok(unchanged().with_effect(Effect::FlushStore))
        }

        (SessionState::Open { .. }, Event::VisibilityChanged { visible: true }) => {
            Ok(unchanged().with_effect(Effect::RequestSync))
        }

        (_, Event::VisibilityChanged { visible: true }) => Ok(unchanged()),
    }
}

fn dial(generation: u64) -> TransitionResult {
    TransitionResult::new(SessionState::Connecting { generation })
        .with_effect(Effect::notify(ConnectionStatus::Connecting))
        .with_effect(Effect::Dial { generation })
}

/// Handshake on every fresh connection: catch up, then configure
fn on_open(context: &SessionContext) -> Vec<Effect> {
    let mut effects = vec![
        Effect::notify(ConnectionStatus::Open),
        Effect::RequestSync,
        Effect::send(OutboundFrame::Init {
            config: context.session_config.clone(),
        }),
    ];
    if context.debug_mode {
        effects.push(Effect::send(OutboundFrame::DebugMode { enabled: true }));
    }
    effects
}

fn dispatch_frame(context: &SessionContext, frame: InboundFrame) -> Vec<Effect> {
    match frame {
        InboundFrame::History { messages } => vec![Effect::merge_history(messages)],
        InboundFrame::Message { message } => vec![Effect::merge_live(message)],
        InboundFrame::Typing { user_id, is_typing } => {
            vec![Effect::SetPresence { user_id, is_typing }]
        }
        InboundFrame::Clear => vec![Effect::ClearConversation],
        InboundFrame::DebugLog { entry } if context.debug_mode => {
            vec![Effect::ForwardDebugLog { entry }]
        }
        InboundFrame::DebugLog { .. } => vec![],
    }
}
