//! # halite-types: Core types for Halite
//!
//! This crate contains shared types used across the Halite system:
//! - Entity IDs ([`NodeId`], [`Term`], [`LogIndex`], [`MessageId`], [`RequestId`])
//! - Replicated log records ([`LogEntry`], [`CommandKind`], [`HardState`])
//! - Chat messages ([`ChatMessage`]) and stored credentials ([`Credential`])
//! - Consensus timing parameters ([`TimingParams`])
//! - The client-visible error taxonomy ([`ErrorKind`])

use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs - All Copy (cheap scalar values)
// ============================================================================

/// Unique identifier for a cluster node.
///
/// Node ids are assigned in the cluster configuration and are stable for
/// the lifetime of the cluster (the peer set is fixed at start).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u32 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// A consensus term: a monotonically increasing epoch number.
///
/// Every leader belongs to at most one term. Terms never decrease on any
/// node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Term(u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub const fn new(term: u64) -> Self {
        Self(term)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next term.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Term {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Term> for u64 {
    fn from(term: Term) -> Self {
        term.0
    }
}

/// Position of an entry in the replicated log.
///
/// Log indexes are 1-based and dense: the first entry has index 1 and
/// every appended entry takes the next index. Index 0 is reserved for
/// "before the first entry" in consistency checks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct LogIndex(u64);

impl LogIndex {
    pub const ZERO: LogIndex = LogIndex(0);

    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the previous index, saturating at zero.
    pub const fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Display for LogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for LogIndex {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<LogIndex> for u64 {
    fn from(index: LogIndex) -> Self {
        index.0
    }
}

/// Unique identifier for a chat message.
///
/// Assigned by the state machine at apply time from a replicated counter,
/// so ids are cluster-wide unique and strictly increasing in assignment
/// order. Ids are never reused, even after the message is deleted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct MessageId(u64);

impl MessageId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<MessageId> for u64 {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// Client-assigned request identifier, echoed in the matching response.
///
/// Id 0 is reserved for server-pushed notification frames.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RequestId(u64);

impl RequestId {
    /// Reserved id for unsolicited server-pushed frames.
    pub const NOTIFICATION: RequestId = RequestId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ============================================================================
// Chat Messages
// ============================================================================

/// A chat message as stored and delivered.
///
/// Created when a send command applies; lives in exactly one of the
/// recipient's unread or read mailboxes until deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: String,
    pub content: String,
}

// ============================================================================
// Credentials
// ============================================================================

/// A stored credential record: KDF output plus the salt it was derived with.
///
/// The KDF itself is opaque to everything except the session layer, which
/// both derives new credentials (account creation) and verifies supplied
/// passwords (login). The state machine only stores and returns the blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Derived key bytes.
    pub hash: Bytes,
    /// Random salt the key was derived with.
    pub salt: Bytes,
}

// ============================================================================
// Replicated Log
// ============================================================================

/// Closed tag for the replicated command set.
///
/// The consensus layer sees only this tag plus an opaque payload; the
/// payload is decoded into a typed command inside the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    CreateAccount,
    DeleteAccount,
    SendMessage,
    PopUnread,
    DeleteMessages,
}

/// One entry of the replicated log. Never mutated after write.
///
/// `(index, term)` uniquely identifies an entry: if two nodes hold entries
/// with the same `(index, term)` they hold identical payloads and all
/// prior entries match (Log Matching).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: LogIndex,
    pub term: Term,
    pub kind: CommandKind,
    pub payload: Bytes,
}

/// The consensus state that must survive crashes.
///
/// Persisted atomically before any message derived from the new values
/// leaves the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HardState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
}

// ============================================================================
// Consensus Timing
// ============================================================================

/// Timing parameters for leader election and replication.
///
/// The election timeout is drawn uniformly from
/// `[election_min, election_max]` on every reset; the heartbeat interval
/// must be well below `election_min` so a healthy leader always suppresses
/// elections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingParams {
    pub election_min: Duration,
    pub election_max: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for TimingParams {
    fn default() -> Self {
        Self {
            election_min: Duration::from_millis(150),
            election_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
        }
    }
}

// ============================================================================
// Error Taxonomy
// ============================================================================

/// The client-visible error taxonomy.
///
/// Every error surfaced over the client RPC maps to exactly one of these
/// kinds; transient peer RPC failures are absorbed by the replication
/// layer and never reach clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Mutation targeted a non-leader; retry at the leader hint.
    NotLeader,
    /// Leader unknown or the cluster cannot currently make progress.
    Unavailable,
    /// Malformed input (empty username, unknown command shape).
    InvalidArgument,
    /// Account name already taken.
    AlreadyExists,
    /// Unknown recipient or message.
    NotFound,
    /// Operation requires a bound session.
    Unauthenticated,
    /// Deadline elapsed before commit/apply; the command may still commit.
    Timeout,
    /// Unrecoverable internal failure.
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotLeader => "not leader",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::NotFound => "not found",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_index_is_one_based() {
        let first = LogIndex::ZERO.next();
        assert_eq!(first.as_u64(), 1);
        assert_eq!(first.prev(), LogIndex::ZERO);
        assert_eq!(LogIndex::ZERO.prev(), LogIndex::ZERO);
    }

    #[test]
    fn term_ordering() {
        let t1 = Term::new(1);
        let t2 = t1.next();
        assert!(t2 > t1);
        assert_eq!(t2.as_u64(), 2);
    }

    #[test]
    fn default_timing_is_sane() {
        let timing = TimingParams::default();
        assert!(timing.heartbeat_interval < timing.election_min);
        assert!(timing.election_min < timing.election_max);
    }
}
