//! Leader election handlers.
//!
//! A follower whose election window expires becomes a candidate: it
//! increments the term, votes for itself, persists the new hard state,
//! and solicits votes. Votes are granted at most once per term, and only
//! to candidates whose log is at least as up-to-date as the voter's —
//! this is what keeps committed entries on whoever wins.

use halite_types::NodeId;

use crate::message::{MessagePayload, RequestVote, RequestVoteReply};

use super::state::Role;
use super::{msg_to, Effect, RaftOutput, RaftState};

impl RaftState {
    // ========================================================================
    // Election Timeout
    // ========================================================================

    /// The election window elapsed without hearing from a leader.
    pub(crate) fn on_election_timeout(mut self) -> (Self, RaftOutput) {
        if self.role == Role::Leader {
            // A leader keeps no election timer; a stray timeout is noise.
            return (self, RaftOutput::empty());
        }

        self.current_term = self.current_term.next();
        self.role = Role::Candidate;
        self.voted_for = Some(self.id);
        self.leader_hint = None;
        self.votes_received.clear();
        self.votes_received.insert(self.id);

        tracing::info!(
            node = %self.id,
            term = %self.current_term,
            "election timeout, starting election"
        );

        let mut output = RaftOutput {
            effects: vec![Effect::SaveHardState(self.hard_state())],
            election_reset: true,
            ..RaftOutput::default()
        };

        if self.votes_received.len() >= self.cluster.quorum_size() {
            // Single-node cluster: the self-vote is already a majority.
            return self.become_leader(output);
        }

        let request = RequestVote {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        };
        let peers: Vec<NodeId> = self.cluster.peers(self.id).collect();
        for peer in peers {
            let seq = self.take_seq();
            output.messages.push(msg_to(
                self.id,
                peer,
                seq,
                MessagePayload::RequestVote(request),
            ));
        }
        (self, output)
    }

    // ========================================================================
    // RequestVote Handler (voter side)
    // ========================================================================

    /// Decides whether to grant a vote.
    pub(crate) fn on_request_vote(
        mut self,
        from: NodeId,
        seq: u64,
        req: RequestVote,
    ) -> (Self, RaftOutput) {
        let mut output = RaftOutput::empty();
        let mut dirty = false;

        if req.term > self.current_term {
            self.adopt_term(req.term);
            dirty = true;
        }

        // Up-to-date check: compare (last term, last index) lexicographically.
        let log_ok = (req.last_log_term, req.last_log_index)
            >= (self.last_log_term(), self.last_log_index());
        let vote_free = self.voted_for.is_none() || self.voted_for == Some(req.candidate_id);
        let granted = req.term == self.current_term && vote_free && log_ok;

        if granted {
            // Re-granting to the same candidate is idempotent; recording
            // a fresh vote must hit disk before the reply leaves.
            if self.voted_for.is_none() {
                self.voted_for = Some(req.candidate_id);
                dirty = true;
            }
            output.election_reset = true;
            tracing::debug!(
                node = %self.id,
                candidate = %req.candidate_id,
                term = %self.current_term,
                "granting vote"
            );
        }

        if dirty {
            output.effects.push(Effect::SaveHardState(self.hard_state()));
        }
        output.messages.push(msg_to(
            self.id,
            from,
            seq,
            MessagePayload::RequestVoteReply(RequestVoteReply {
                term: self.current_term,
                vote_granted: granted,
            }),
        ));
        (self, output)
    }

    // ========================================================================
    // RequestVoteReply Handler (candidate side)
    // ========================================================================

    /// Tallies a vote.
    pub(crate) fn on_request_vote_reply(
        mut self,
        from: NodeId,
        reply: RequestVoteReply,
    ) -> (Self, RaftOutput) {
        if reply.term > self.current_term {
            self.adopt_term(reply.term);
            let hard_state = self.hard_state();
            return (
                self,
                RaftOutput {
                    effects: vec![Effect::SaveHardState(hard_state)],
                    ..RaftOutput::default()
                },
            );
        }

        // Replies from dead elections (or after we already won/lost)
        // carry no information.
        if self.role != Role::Candidate || reply.term < self.current_term || !reply.vote_granted {
            return (self, RaftOutput::empty());
        }

        self.votes_received.insert(from);
        if self.votes_received.len() >= self.cluster.quorum_size() {
            return self.become_leader(RaftOutput::empty());
        }
        (self, RaftOutput::empty())
    }

    // ========================================================================
    // Leadership
    // ========================================================================

    /// Transitions to leader and announces with an immediate heartbeat.
    pub(crate) fn become_leader(mut self, mut output: RaftOutput) -> (Self, RaftOutput) {
        tracing::info!(
            node = %self.id,
            term = %self.current_term,
            last_log = %self.last_log_index(),
            "won election, becoming leader"
        );

        self.role = Role::Leader;
        self.leader_hint = Some(self.id);
        self.votes_received.clear();
        self.inflight.clear();
        self.next_index.clear();
        self.match_index.clear();
        let next = self.last_log_index().next();
        let peers: Vec<NodeId> = self.cluster.peers(self.id).collect();
        for peer in &peers {
            self.next_index.insert(*peer, next);
            self.match_index.insert(*peer, halite_types::LogIndex::ZERO);
        }

        // Immediate empty AppendEntries claims the floor before any
        // rival's election timer fires again.
        for peer in peers {
            let msg = self.build_append(peer);
            output.messages.push(msg);
        }
        (self, output)
    }
}
