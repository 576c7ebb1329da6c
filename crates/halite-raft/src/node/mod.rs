//! The consensus node state machine.
//!
//! Handlers follow one shape: consume `self`, return `(Self,
//! RaftOutput)`. The output carries outgoing messages and effects; the
//! caller executes effects **before** sending messages, so nothing
//! derived from un-persisted state ever leaves the node.

mod apply;
mod election;
mod replication;
mod state;

pub use state::{RaftOptions, RaftState, RecoveryError, Role, SubmitError};

use bytes::Bytes;
use halite_kernel::{ApplyReply, KernelError};
use halite_types::{HardState, LogEntry, LogIndex, NodeId};

use crate::message::{Message, MessagePayload};

// ============================================================================
// Raft Output
// ============================================================================

/// Output produced by one step of the consensus state machine.
///
/// The runtime is responsible for:
/// 1. Executing the effects, in order — durability effects halt the node
///    on failure, and nothing later in the output may happen first
/// 2. Sending the outgoing messages
/// 3. Resetting the election timer if `election_reset` is set
#[derive(Debug, Default)]
pub struct RaftOutput {
    /// Messages to send to peers.
    pub messages: Vec<Message>,

    /// Effects to execute (storage writes, client replies, fan-out).
    pub effects: Vec<Effect>,

    /// The election timer must be reset (valid leader contact, vote
    /// granted, or a new election started).
    pub election_reset: bool,
}

impl RaftOutput {
    /// Creates an empty output.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates output with only messages.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Returns true if the output carries nothing at all.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.effects.is_empty() && !self.election_reset
    }

    /// Merges another output into this one (its messages and effects
    /// come after ours).
    pub fn merge(&mut self, other: RaftOutput) {
        self.messages.extend(other.messages);
        self.effects.extend(other.effects);
        self.election_reset |= other.election_reset;
    }
}

// ============================================================================
// Effects
// ============================================================================

/// A side effect the runtime must execute on the core's behalf.
///
/// Durability effects (`SaveHardState`, `AppendLog`, `TruncateLog`,
/// `PersistSnapshot`) are fatal on failure: the node halts rather than
/// proceed, because acknowledging un-persisted state breaks log
/// matching after a crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Persist the new hard state before anything derived from it is
    /// sent.
    SaveHardState(HardState),

    /// Append entries to the durable log, in index order.
    AppendLog(Vec<LogEntry>),

    /// Drop durable entries with index ≥ `from` (conflict truncation).
    TruncateLog { from: LogIndex },

    /// Deliver the apply outcome for the entry at `index` to whatever
    /// client is waiting on it (leaders only have waiters; other nodes
    /// ignore this).
    Respond {
        index: LogIndex,
        reply: Result<ApplyReply, KernelError>,
    },

    /// A chat state machine effect (subscriber fan-out).
    Chat(halite_kernel::Effect),

    /// Checkpoint the state machine: enough log bytes have been applied
    /// since the last snapshot.
    PersistSnapshot { last_applied: LogIndex, state: Bytes },
}

// ============================================================================
// Timeouts
// ============================================================================

/// Timer events the runtime feeds back into the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// The election window elapsed without leader contact.
    Election,

    /// The heartbeat interval elapsed (leaders only).
    Heartbeat,
}

// ============================================================================
// Event Dispatch
// ============================================================================

impl RaftState {
    /// Processes one incoming peer message.
    pub fn on_message(self, msg: Message) -> (Self, RaftOutput) {
        let from = msg.from;
        let seq = msg.seq;
        match msg.payload {
            MessagePayload::RequestVote(req) => self.on_request_vote(from, seq, req),
            MessagePayload::RequestVoteReply(reply) => self.on_request_vote_reply(from, reply),
            MessagePayload::AppendEntries(req) => self.on_append_entries(from, seq, req),
            MessagePayload::AppendEntriesReply(reply) => {
                self.on_append_entries_reply(from, seq, reply)
            }
        }
    }

    /// Processes a fired timer.
    pub fn on_timeout(self, kind: TimeoutKind) -> (Self, RaftOutput) {
        match kind {
            TimeoutKind::Election => self.on_election_timeout(),
            TimeoutKind::Heartbeat => self.on_heartbeat_tick(),
        }
    }
}

/// Builds a targeted message from `from` to `to`.
pub(crate) fn msg_to(from: NodeId, to: NodeId, seq: u64, payload: MessagePayload) -> Message {
    Message::to(from, to, seq, payload)
}
