//! Sync session state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions. The
//! runtime executor owns the state, feeds events in, and performs the effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::{Effect, MergeOrigin};
pub use event::Event;
pub use state::{ConnectionStatus, SessionContext, SessionState};
pub use transition::{transition, TransitionError, TransitionResult};
