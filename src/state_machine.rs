//! Per-conversation turn state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.
//! The runtime owns the I/O: it executes the returned effects and feeds their
//! outcomes back in as events.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::Event;
pub use state::{ConvContext, ConvState};
pub use transition::{transition, TransitionError, TransitionResult, INTERRUPTED_MARKER};
