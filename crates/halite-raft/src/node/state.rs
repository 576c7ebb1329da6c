//! Consensus node state structure.
//!
//! [`RaftState`] holds everything one node knows: the persistent bundle
//! (term, vote, log — mirrored in memory, durable via effects), the
//! volatile bookkeeping (role, commit/apply cursors, per-peer
//! replication progress), and the embedded chat state machine committed
//! entries are applied to.

use std::collections::{HashMap, HashSet};

use halite_kernel::ChatState;
use halite_types::{HardState, LogEntry, LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};

use crate::config::ClusterConfig;

// ============================================================================
// Roles
// ============================================================================

/// The three consensus roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Passive: accepts entries from the leader, votes in elections.
    Follower,
    /// Soliciting votes after an election timeout.
    Candidate,
    /// Serializes client writes and replicates them.
    Leader,
}

// ============================================================================
// Options
// ============================================================================

/// Tuning knobs for the consensus core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaftOptions {
    /// Applied log bytes between snapshot checkpoints (0 disables
    /// snapshotting).
    pub snapshot_threshold_bytes: u64,
    /// Maximum entries per AppendEntries batch.
    pub max_append_batch: usize,
}

impl Default for RaftOptions {
    fn default() -> Self {
        Self {
            snapshot_threshold_bytes: 4 * 1024 * 1024,
            max_append_batch: 64,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// A client command could not be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// This node is not the leader; retry at the hint if present.
    #[error("not the leader (hint: {leader_hint:?})")]
    NotLeader { leader_hint: Option<NodeId> },
}

/// Recovered storage state was internally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    #[error("log is not dense: expected index {expected}, found {found}")]
    NonDenseLog { expected: LogIndex, found: LogIndex },

    #[error("snapshot covers index {snapshot} but the log ends at {log_end}")]
    SnapshotAheadOfLog { snapshot: LogIndex, log_end: LogIndex },

    #[error("snapshot blob does not decode: {0}")]
    SnapshotCorrupt(halite_kernel::KernelError),
}

// ============================================================================
// Leader Replication Progress
// ============================================================================

/// The probe currently outstanding to one peer.
///
/// At most one AppendEntries is in flight per peer; retransmits reuse
/// the same `seq` and the same entry range, so duplicate replies are
/// idempotent and a stale reply can never be credited to a newer batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Inflight {
    pub seq: u64,
    pub prev: LogIndex,
    pub count: u64,
}

// ============================================================================
// Raft State
// ============================================================================

/// The full state of one consensus node.
#[derive(Debug, Clone)]
pub struct RaftState {
    // ========================================================================
    // Identity
    // ========================================================================
    pub(crate) id: NodeId,
    pub(crate) cluster: ClusterConfig,
    pub(crate) opts: RaftOptions,

    // ========================================================================
    // Persistent State (mirrored; durable via effects)
    // ========================================================================
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<NodeId>,
    /// Full in-memory mirror of the durable log. `log[0]` has index 1.
    pub(crate) log: Vec<LogEntry>,

    // ========================================================================
    // Volatile State
    // ========================================================================
    pub(crate) role: Role,
    pub(crate) leader_hint: Option<NodeId>,
    pub(crate) commit_index: LogIndex,
    pub(crate) last_applied: LogIndex,

    // Candidate bookkeeping
    pub(crate) votes_received: HashSet<NodeId>,

    // Leader bookkeeping
    pub(crate) next_index: HashMap<NodeId, LogIndex>,
    pub(crate) match_index: HashMap<NodeId, LogIndex>,
    pub(crate) inflight: HashMap<NodeId, Inflight>,

    /// Sequence counter for outgoing request correlation.
    pub(crate) next_seq: u64,

    // ========================================================================
    // Application State
    // ========================================================================
    pub(crate) chat: ChatState,
    /// Applied payload bytes since the last snapshot checkpoint.
    pub(crate) bytes_since_snapshot: u64,
}

impl RaftState {
    /// Creates a fresh node (empty log, term 0).
    pub fn new(id: NodeId, cluster: ClusterConfig, opts: RaftOptions) -> Self {
        Self {
            id,
            cluster,
            opts,
            current_term: Term::ZERO,
            voted_for: None,
            log: Vec::new(),
            role: Role::Follower,
            leader_hint: None,
            commit_index: LogIndex::ZERO,
            last_applied: LogIndex::ZERO,
            votes_received: HashSet::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            inflight: HashMap::new(),
            next_seq: 0,
            chat: ChatState::new(),
            bytes_since_snapshot: 0,
        }
    }

    /// Rebuilds a node from recovered storage state.
    ///
    /// `snapshot` is the optional checkpoint `(last_applied, blob)`;
    /// `entries` is the full durable log in index order. Entries at or
    /// below the snapshot index are already reflected in the blob and
    /// are treated as committed; everything above waits for the next
    /// leader to re-establish commitment.
    pub fn recover(
        id: NodeId,
        cluster: ClusterConfig,
        opts: RaftOptions,
        hard_state: HardState,
        snapshot: Option<(LogIndex, &[u8])>,
        entries: Vec<LogEntry>,
    ) -> Result<Self, RecoveryError> {
        let mut expected = LogIndex::new(1);
        for entry in &entries {
            if entry.index != expected {
                return Err(RecoveryError::NonDenseLog {
                    expected,
                    found: entry.index,
                });
            }
            expected = expected.next();
        }
        let log_end = expected.prev();

        let (last_applied, chat) = match snapshot {
            Some((index, blob)) => {
                if index > log_end {
                    return Err(RecoveryError::SnapshotAheadOfLog {
                        snapshot: index,
                        log_end,
                    });
                }
                let chat = ChatState::restore(blob).map_err(RecoveryError::SnapshotCorrupt)?;
                (index, chat)
            }
            None => (LogIndex::ZERO, ChatState::new()),
        };

        let mut state = Self::new(id, cluster, opts);
        state.current_term = hard_state.current_term;
        state.voted_for = hard_state.voted_for;
        state.log = entries;
        state.chat = chat;
        state.last_applied = last_applied;
        // The snapshot only covers committed entries, so the commit
        // cursor restarts there; anything later is re-learned from the
        // next leader's commit index.
        state.commit_index = last_applied;
        Ok(state)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    /// Last known leader, for client redirects.
    pub fn leader_hint(&self) -> Option<NodeId> {
        self.leader_hint
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    /// The applied chat state (for local reads).
    pub fn chat(&self) -> &ChatState {
        &self.chat
    }

    /// Index of the last log entry (zero when empty).
    pub fn last_log_index(&self) -> LogIndex {
        LogIndex::new(self.log.len() as u64)
    }

    /// Term of the last log entry (zero when empty).
    pub fn last_log_term(&self) -> Term {
        self.log.last().map_or(Term::ZERO, |e| e.term)
    }

    /// The entry at `index`, if present (1-based).
    pub fn entry(&self, index: LogIndex) -> Option<&LogEntry> {
        if index.is_zero() {
            return None;
        }
        self.log.get(index.as_u64() as usize - 1)
    }

    /// Term of the entry at `index`; zero for index 0, `None` when the
    /// log has no such entry.
    pub(crate) fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index.is_zero() {
            return Some(Term::ZERO);
        }
        self.entry(index).map(|e| e.term)
    }

    /// The current persistent bundle, for `SaveHardState` effects (and
    /// the runtime's shutdown flush).
    pub fn hard_state(&self) -> HardState {
        HardState {
            current_term: self.current_term,
            voted_for: self.voted_for,
        }
    }

    /// Allocates the next request correlation number.
    pub(crate) fn take_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    // ========================================================================
    // Role Transitions (shared)
    // ========================================================================

    /// Adopts a higher term and falls back to follower.
    ///
    /// Clears the vote (new term, new ballot) and all leader/candidate
    /// bookkeeping. The caller emits the `SaveHardState` effect.
    pub(crate) fn adopt_term(&mut self, term: Term) {
        debug_assert!(term > self.current_term);
        self.current_term = term;
        self.voted_for = None;
        self.step_down();
    }

    /// Falls back to follower in the current term (e.g. a candidate
    /// discovering a legitimate leader).
    pub(crate) fn step_down(&mut self) {
        self.role = Role::Follower;
        self.votes_received.clear();
        self.next_index.clear();
        self.match_index.clear();
        self.inflight.clear();
    }

    /// Debug invariant: apply cursor ≤ commit cursor ≤ log length.
    pub(crate) fn assert_cursor_invariant(&self) {
        debug_assert!(
            self.last_applied <= self.commit_index && self.commit_index <= self.last_log_index(),
            "cursor invariant violated: applied={} commit={} log={}",
            self.last_applied,
            self.commit_index,
            self.last_log_index(),
        );
    }
}
