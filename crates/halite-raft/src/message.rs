//! Consensus protocol messages.
//!
//! Two RPC pairs make up the whole peer surface:
//!
//! - [`RequestVote`] / [`RequestVoteReply`] — candidate soliciting votes
//! - [`AppendEntries`] / [`AppendEntriesReply`] — leader replicating log
//!   entries (an empty entry list is a heartbeat)
//!
//! Messages travel in a [`Message`] envelope carrying the sender, the
//! target, and a sequence number. The sequence number gives replies RPC
//! correlation: a reply echoes the request's `seq`, and the sender drops
//! replies whose `seq` no longer matches its in-flight probe for that
//! peer. Without this, a duplicate success reply from a retransmitted
//! probe could be credited to a newer, longer batch and advance
//! `match_index` past what the follower actually holds.

use halite_types::{LogEntry, LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};

// ============================================================================
// Message Envelope
// ============================================================================

/// A consensus message with routing information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The node that sent this message.
    pub from: NodeId,

    /// The intended recipient.
    pub to: NodeId,

    /// Request correlation: chosen by the sender for requests, echoed
    /// back in the matching reply.
    pub seq: u64,

    /// The message payload.
    pub payload: MessagePayload,
}

impl Message {
    /// Creates a targeted message.
    pub fn to(from: NodeId, to: NodeId, seq: u64, payload: MessagePayload) -> Self {
        Self {
            from,
            to,
            seq,
            payload,
        }
    }

    /// The term carried by the payload.
    pub fn term(&self) -> Term {
        match &self.payload {
            MessagePayload::RequestVote(m) => m.term,
            MessagePayload::RequestVoteReply(m) => m.term,
            MessagePayload::AppendEntries(m) => m.term,
            MessagePayload::AppendEntriesReply(m) => m.term,
        }
    }
}

/// The payload of a consensus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    RequestVote(RequestVote),
    RequestVoteReply(RequestVoteReply),
    AppendEntries(AppendEntries),
    AppendEntriesReply(AppendEntriesReply),
}

// ============================================================================
// RequestVote
// ============================================================================

/// Candidate → All: vote for me in this term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVote {
    /// Candidate's term (already incremented for this election).
    pub term: Term,
    /// The candidate requesting the vote.
    pub candidate_id: NodeId,
    /// Index of the candidate's last log entry.
    pub last_log_index: LogIndex,
    /// Term of the candidate's last log entry.
    pub last_log_term: Term,
}

/// Voter → Candidate: the verdict.
///
/// A vote is granted only if the candidate's term is current, its log is
/// at least as up-to-date as the voter's, and the voter has not already
/// voted for someone else this term. Re-requesting is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteReply {
    /// The voter's current term (for the candidate to update itself).
    pub term: Term,
    /// Whether the vote was granted.
    pub vote_granted: bool,
}

// ============================================================================
// AppendEntries
// ============================================================================

/// Leader → Follower: replicate entries (empty = heartbeat).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntries {
    /// Leader's term.
    pub term: Term,
    /// The leader's id, recorded by followers as the redirect hint.
    pub leader_id: NodeId,
    /// Index of the entry immediately preceding the new ones (0 = none).
    pub prev_log_index: LogIndex,
    /// Term of the entry at `prev_log_index` (0 when index is 0).
    pub prev_log_term: Term,
    /// Entries to append, in index order. Empty for a heartbeat.
    pub entries: Vec<LogEntry>,
    /// The leader's commit index.
    pub leader_commit: LogIndex,
}

/// Follower → Leader: consistency check verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    /// The follower's current term.
    pub term: Term,
    /// True when the entries were appended (or already present).
    pub success: bool,
    /// On failure, where the leader should back off to: the follower's
    /// first index of the conflicting term, or one past its last entry
    /// when its log is too short.
    pub conflict_index: Option<LogIndex>,
}
