//! The kernel - pure functional core of the chat service.
//!
//! [`apply_committed`] is the single transition function the apply pipeline
//! calls for every committed log entry, in index order, exactly once per
//! node lifetime. It is deterministic: the reply and the new state depend
//! only on the prior state and the command.
//!
//! Unlike storage failures, *semantic* failures (name taken, unknown
//! recipient) are normal outcomes of a committed entry: the entry still
//! consumes its log index on every replica, the state transition is a
//! no-op, and the error is routed back to the submitting client.

use halite_types::{ChatMessage, ErrorKind, MessageId};

use crate::command::{Command, CommandKind};
use crate::effects::Effect;
use crate::state::ChatState;

/// The reply produced by applying a committed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyReply {
    AccountCreated,
    AccountDeleted,
    MessageSent {
        id: MessageId,
        delivered_read: bool,
    },
    UnreadPopped {
        messages: Vec<ChatMessage>,
    },
    MessagesDeleted,
}

/// Applies a committed command, producing new state, a reply, and effects.
///
/// Takes ownership of state, returns new state. No cloning of the maps.
pub fn apply_committed(
    state: ChatState,
    cmd: Command,
) -> (ChatState, Result<ApplyReply, KernelError>, Vec<Effect>) {
    match cmd {
        Command::CreateAccount { name, credential } => {
            if name.is_empty() {
                return (state, Err(KernelError::AccountNameEmpty), Vec::new());
            }
            if state.account_exists(&name) {
                return (state, Err(KernelError::AccountTaken(name)), Vec::new());
            }
            let new_state = state.with_account(name, credential);
            (new_state, Ok(ApplyReply::AccountCreated), Vec::new())
        }

        Command::DeleteAccount { name } => {
            // Idempotent: deleting a missing account is still a success.
            let existed = state.account_exists(&name);
            let new_state = state.without_account(&name);
            let effects = if existed {
                vec![Effect::DropSubscriptions { name }]
            } else {
                Vec::new()
            };
            (new_state, Ok(ApplyReply::AccountDeleted), effects)
        }

        Command::SendMessage {
            sender,
            recipient,
            content,
            deliver_read,
        } => {
            if !state.account_exists(&recipient) {
                return (
                    state,
                    Err(KernelError::AccountNotFound(recipient)),
                    Vec::new(),
                );
            }
            let (new_state, id) =
                state.with_message(&recipient, sender.clone(), content.clone(), deliver_read);
            let effects = vec![Effect::NotifySubscribers {
                recipient,
                message: ChatMessage {
                    id,
                    sender,
                    content,
                },
            }];
            (
                new_state,
                Ok(ApplyReply::MessageSent {
                    id,
                    delivered_read: deliver_read,
                }),
                effects,
            )
        }

        Command::PopUnread { name, count } => {
            if !state.account_exists(&name) {
                return (state, Err(KernelError::AccountNotFound(name)), Vec::new());
            }
            let (new_state, messages) = state.with_popped_unread(&name, count);
            (new_state, Ok(ApplyReply::UnreadPopped { messages }), Vec::new())
        }

        Command::DeleteMessages { name, ids } => {
            if !state.account_exists(&name) {
                return (state, Err(KernelError::AccountNotFound(name)), Vec::new());
            }
            let new_state = state.without_messages(&name, &ids);
            (new_state, Ok(ApplyReply::MessagesDeleted), Vec::new())
        }
    }
}

/// Errors produced by applying commands (or decoding their payloads).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("account name must not be empty")]
    AccountNameEmpty,

    #[error("account '{0}' already exists")]
    AccountTaken(String),

    #[error("account '{0}' not found")]
    AccountNotFound(String),

    #[error("log payload does not decode as a {kind:?} command")]
    CommandShape { kind: CommandKind },

    #[error("snapshot blob is corrupt")]
    SnapshotCorrupt,
}

impl KernelError {
    /// Maps the kernel error onto the client-visible taxonomy.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            KernelError::AccountNameEmpty => ErrorKind::InvalidArgument,
            KernelError::AccountTaken(_) => ErrorKind::AlreadyExists,
            KernelError::AccountNotFound(_) => ErrorKind::NotFound,
            KernelError::CommandShape { .. } | KernelError::SnapshotCorrupt => ErrorKind::Internal,
        }
    }
}
