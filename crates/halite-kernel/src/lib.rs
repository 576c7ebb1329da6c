//! # halite-kernel: the deterministic chat state machine
//!
//! The kernel applies committed commands to produce new state, a reply for
//! the submitting client, and effects. It is completely pure: no IO, no
//! clocks, no randomness. Every replica that applies the same committed
//! log prefix holds an identical kernel state.
//!
//! # Example
//!
//! ```ignore
//! let state = ChatState::new();
//! let cmd = Command::CreateAccount { name: "alice".into(), credential };
//!
//! let (new_state, reply, effects) = apply_committed(state, cmd);
//! // Runtime routes the reply to the waiting client and executes effects...
//! ```

mod command;
mod effects;
mod kernel;
mod state;

#[cfg(test)]
mod tests;

pub use command::Command;
pub use halite_types::CommandKind;
pub use effects::Effect;
pub use kernel::{apply_committed, ApplyReply, KernelError};
pub use state::{Account, ChatState, MailboxCounts};
