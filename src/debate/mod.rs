//! Conversation model for a debate: messages, lifecycle phases and the
//! canonical state owned by the turn scheduler.

mod message;
mod phase;
mod state;

pub use message::{Message, MessageKind, Speaker};
pub use phase::{Phase, PhaseHistoryEntry, PhaseTracker, StopReason};
pub use state::{ConversationState, Directive, Note};
