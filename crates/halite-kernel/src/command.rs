//! Replicated commands and their wire encoding.
//!
//! Commands travel through the replicated log as a `(CommandKind, payload)`
//! pair: the kind is a closed sum tag visible to the consensus layer, the
//! payload is an opaque byte blob decoded into a typed case here, inside
//! the kernel. Dispatch is a single match in [`super::kernel::apply_committed`].

use bytes::Bytes;
pub use halite_types::CommandKind;
use halite_types::{Credential, MessageId};
use serde::{Deserialize, Serialize};

use crate::kernel::KernelError;

/// A replicated command, decoded.
///
/// Only mutations are commands; queries are served from local applied
/// state and never enter the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Register a new account with a precomputed credential blob.
    ///
    /// The KDF runs at the submitting node before the command is enqueued,
    /// so apply stays deterministic (no salt generation in the kernel).
    CreateAccount { name: String, credential: Credential },

    /// Remove an account and drop its mailboxes.
    DeleteAccount { name: String },

    /// Deliver a message to `recipient`.
    ///
    /// `deliver_read` is the online hint: it is computed by the submitting
    /// leader from its local session table and carried in the replicated
    /// payload, never derived at apply time.
    SendMessage {
        sender: String,
        recipient: String,
        content: String,
        deliver_read: bool,
    },

    /// Move up to `count` messages from unread to read (`count < 0` = all).
    PopUnread { name: String, count: i64 },

    /// Remove messages by id from both mailboxes. Unknown ids are ignored.
    DeleteMessages { name: String, ids: Vec<MessageId> },
}

impl Command {
    /// Returns the kind tag for this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::CreateAccount { .. } => CommandKind::CreateAccount,
            Command::DeleteAccount { .. } => CommandKind::DeleteAccount,
            Command::SendMessage { .. } => CommandKind::SendMessage,
            Command::PopUnread { .. } => CommandKind::PopUnread,
            Command::DeleteMessages { .. } => CommandKind::DeleteMessages,
        }
    }

    /// Encodes the command into the opaque log payload.
    pub fn encode_payload(&self) -> Bytes {
        let bytes = postcard::to_allocvec(self)
            .expect("command serialization cannot fail: all fields are serializable");
        Bytes::from(bytes)
    }

    /// Decodes a log payload back into a typed command.
    ///
    /// The kind tag must match the decoded variant; a mismatch means the
    /// log entry was corrupted or produced by an incompatible writer.
    pub fn decode(kind: CommandKind, payload: &[u8]) -> Result<Self, KernelError> {
        let cmd: Command =
            postcard::from_bytes(payload).map_err(|_| KernelError::CommandShape { kind })?;
        if cmd.kind() != kind {
            return Err(KernelError::CommandShape { kind });
        }
        Ok(cmd)
    }
}
