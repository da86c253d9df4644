//! Foundation types shared across the domain layer.
//!
//! Strongly-typed identifiers, timestamps, validation errors, and the
//! state-machine trait used by entity lifecycle statuses.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::ValidationError;
pub use ids::{AckId, CallId, ConversationId, MessageId, NotificationId, SocketId, UserId};
pub use state_machine::{StateMachine, TransitionError};
pub use timestamp::Timestamp;
