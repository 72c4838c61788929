//! Runtime for executing sync sessions
//!
//! The executor owns the session state and performs the effects the pure
//! state machine asks for. Observers receive `ClientEvent`s over a broadcast
//! channel.

mod executor;
pub mod traits;
mod websocket;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;
pub use websocket::WebSocketTransport;

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime = SessionRuntime<WebSocketTransport>;

use crate::db::Message;
use crate::emotion::EmotionTheme;
use crate::state_machine::{ConnectionStatus, Event};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Events delivered to observers (the view layer)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The store changed; carries the display-ordered snapshot
    MessagesChanged { messages: Vec<Message> },
    TypingChanged { user_id: String, is_typing: bool },
    /// `None` clears the theme
    ThemeChanged { theme: Option<EmotionTheme> },
    ConnectionChanged { status: ConnectionStatus },
    /// A message emitted by playback, in live order
    PlaybackMessage { message: Message },
    /// Remove a message from the live view
    MessageRetracted { message_id: String },
    /// System line shown inline, e.g. a recall notice
    Notice { text: String },
    DebugLog { entry: Value },
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    event_tx: mpsc::Sender<Event>,
}

impl SessionHandle {
    pub fn new(event_tx: mpsc::Sender<Event>) -> Self {
        Self { event_tx }
    }

    /// Queue an event for the executor. Returns false once the runtime has
    /// stopped.
    pub async fn send(&self, event: Event) -> bool {
        match self.event_tx.send(event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(event = e.0.name(), "Session runtime has stopped, dropping event");
                false
            }
        }
    }
}

/// Notice shown when the actor recalls a message
pub fn recall_notice(actor_name: &str) -> String {
    format!("\"{actor_name}\" recalled a message")
}

/// Lock shared component state. A panic while holding the lock leaves the
/// data usable, so poisoning is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
