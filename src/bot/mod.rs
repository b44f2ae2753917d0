//! Operator-facing bot: commands, conversation state machine, reply
//! confirmation and the service that ties it all together.

pub mod commands;
pub mod confirm;
pub mod controller;
pub mod messages;
pub mod service;
pub mod state;

pub use commands::{parse_command, Action, Command};
pub use confirm::{AcceptOutcome, ReplyConfirmWorkflow, StageOutcome};
pub use controller::ConversationController;
pub use service::{RelayService, ServiceSettings};
pub use state::{
    AuthStatus, ConfirmationLimits, ConversationRegistry, ConversationState, InputMode,
    PendingConfirmations,
};
