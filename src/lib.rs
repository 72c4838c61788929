//! Rin client core
//!
//! Local-first engine behind a chat interface: keeps a local copy of a
//! conversation in sync with the message server, replays the remote actor's
//! typing and sending with human pacing, and turns emotion annotations into
//! a mood color.

#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

pub mod client;
pub mod config;
pub mod db;
pub mod emotion;
pub mod playback;
pub mod runtime;
pub mod state_machine;
pub mod store;
pub mod wire;

pub use client::{load_or_create_conversation_id, ChatClient};
pub use config::{ClientConfig, ConfigError};
pub use db::{Database, DbError, Message, MessageType};
pub use emotion::{ColorSet, EmotionMap, EmotionTheme};
pub use playback::{Action, ActionPlan, PlaybackError, PlaybackReport};
pub use runtime::{ClientEvent, DatabaseStorage, LocalStorage, WebSocketTransport};
pub use state_machine::ConnectionStatus;
