//! Log replication handlers.
//!
//! The leader keeps one AppendEntries probe outstanding per peer.
//! Success advances `match_index`/`next_index` and may advance the
//! commit index; failure backs `next_index` off to the follower's
//! conflict hint and retries immediately. Retransmits (driven by the
//! heartbeat tick) reuse the probe's sequence number and entry range,
//! so duplicate replies are harmless.
//!
//! On the follower side, the consistency check plus suffix truncation
//! makes AppendEntries arrivals commutative within a leader's term: any
//! interleaving of duplicated or reordered probes converges to the
//! leader's log.

use halite_kernel::Command;
use halite_types::{LogEntry, LogIndex, NodeId};

use crate::message::{AppendEntries, AppendEntriesReply, Message, MessagePayload};

use super::state::{Inflight, Role, SubmitError};
use super::{msg_to, Effect, RaftOutput, RaftState};

impl RaftState {
    // ========================================================================
    // AppendEntries Handler (follower side)
    // ========================================================================

    /// Handles a replication probe (or heartbeat) from a leader.
    pub(crate) fn on_append_entries(
        mut self,
        from: NodeId,
        seq: u64,
        req: AppendEntries,
    ) -> (Self, RaftOutput) {
        let mut output = RaftOutput::empty();

        // Stale leader: reject with our term so it steps down.
        if req.term < self.current_term {
            output.messages.push(msg_to(
                self.id,
                from,
                seq,
                MessagePayload::AppendEntriesReply(AppendEntriesReply {
                    term: self.current_term,
                    success: false,
                    conflict_index: None,
                }),
            ));
            return (self, output);
        }

        if req.term > self.current_term {
            self.adopt_term(req.term);
            output.effects.push(Effect::SaveHardState(self.hard_state()));
        } else if self.role == Role::Leader {
            // Two leaders in one term would mean a vote was double-counted.
            tracing::error!(
                node = %self.id,
                term = %self.current_term,
                rival = %req.leader_id,
                "AppendEntries from a rival leader in our own term"
            );
            return (self, output);
        } else if self.role == Role::Candidate {
            // A legitimate leader exists for this term; concede.
            self.step_down();
        }

        self.leader_hint = Some(req.leader_id);
        output.election_reset = true;

        // Consistency check: our entry at prev_log_index must match.
        match self.term_at(req.prev_log_index) {
            None => {
                // Log too short: tell the leader where our log ends.
                let conflict = self.last_log_index().next();
                tracing::debug!(
                    node = %self.id,
                    prev = %req.prev_log_index,
                    conflict = %conflict,
                    "AppendEntries gap, rejecting"
                );
                output.messages.push(msg_to(
                    self.id,
                    from,
                    seq,
                    MessagePayload::AppendEntriesReply(AppendEntriesReply {
                        term: self.current_term,
                        success: false,
                        conflict_index: Some(conflict),
                    }),
                ));
                return (self, output);
            }
            Some(term) if term != req.prev_log_term => {
                // Conflicting entry: hint the first index of its term so
                // the leader skips the whole run in one round trip.
                let conflict = self.first_index_of_term_run(req.prev_log_index);
                output.messages.push(msg_to(
                    self.id,
                    from,
                    seq,
                    MessagePayload::AppendEntriesReply(AppendEntriesReply {
                        term: self.current_term,
                        success: false,
                        conflict_index: Some(conflict),
                    }),
                ));
                return (self, output);
            }
            Some(_) => {}
        }

        // The highest index this request vouches for. Commit must never
        // run past it: an empty heartbeat from a new leader says nothing
        // about entries it hasn't checked, and our tail past this point
        // may be a stale suffix awaiting truncation.
        let last_new = LogIndex::new(req.prev_log_index.as_u64() + req.entries.len() as u64);

        // Append new entries, truncating a conflicting suffix first.
        let mut fresh: Vec<LogEntry> = Vec::new();
        for entry in req.entries {
            match self.term_at(entry.index) {
                Some(term) if term == entry.term => {
                    // Already have it: log matching says it's identical.
                }
                Some(_) => {
                    // A deposed leader's uncommitted suffix; drop it.
                    debug_assert!(
                        entry.index > self.commit_index,
                        "attempted truncation of committed entry {}",
                        entry.index
                    );
                    self.log.truncate(entry.index.as_u64() as usize - 1);
                    output.effects.push(Effect::TruncateLog { from: entry.index });
                    self.log.push(entry.clone());
                    fresh.push(entry);
                }
                None => {
                    debug_assert_eq!(entry.index, self.last_log_index().next());
                    self.log.push(entry.clone());
                    fresh.push(entry);
                }
            }
        }
        if !fresh.is_empty() {
            output.effects.push(Effect::AppendLog(fresh));
        }

        // Advance the commit cursor and apply.
        let commit_target = req.leader_commit.min(last_new);
        if commit_target > self.commit_index {
            self.commit_index = commit_target;
            self.apply_committed_entries(&mut output);
        }
        self.assert_cursor_invariant();

        output.messages.push(msg_to(
            self.id,
            from,
            seq,
            MessagePayload::AppendEntriesReply(AppendEntriesReply {
                term: self.current_term,
                success: true,
                conflict_index: None,
            }),
        ));
        (self, output)
    }

    /// First index of the contiguous run of entries sharing the term at
    /// `index`. This is the conflict hint: the leader can skip the whole
    /// run instead of probing one entry at a time.
    fn first_index_of_term_run(&self, index: LogIndex) -> LogIndex {
        let run_term = match self.term_at(index) {
            Some(term) => term,
            None => return index,
        };
        let mut first = index;
        while first.as_u64() > 1 && self.term_at(first.prev()) == Some(run_term) {
            first = first.prev();
        }
        first
    }

    // ========================================================================
    // AppendEntriesReply Handler (leader side)
    // ========================================================================

    /// Handles a follower's verdict on an outstanding probe.
    pub(crate) fn on_append_entries_reply(
        mut self,
        from: NodeId,
        seq: u64,
        reply: AppendEntriesReply,
    ) -> (Self, RaftOutput) {
        if reply.term > self.current_term {
            tracing::info!(
                node = %self.id,
                term = %self.current_term,
                newer = %reply.term,
                "reply carries a higher term, stepping down"
            );
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

        if self.role != Role::Leader || reply.term < self.current_term {
            return (self, RaftOutput::empty());
        }

        // Only the reply to the probe we currently have outstanding for
        // this peer counts; anything else is a late duplicate.
        let inflight = match self.inflight.get(&from) {
            Some(inflight) if inflight.seq == seq => *inflight,
            _ => return (self, RaftOutput::empty()),
        };
        self.inflight.remove(&from);

        let mut output = RaftOutput::empty();
        if reply.success {
            let matched = LogIndex::new(inflight.prev.as_u64() + inflight.count);
            let known = self.match_index.entry(from).or_insert(LogIndex::ZERO);
            if matched > *known {
                *known = matched;
            }
            self.next_index.insert(from, matched.next());

            if self.advance_commit() {
                self.apply_committed_entries(&mut output);
            }

            // More entries accumulated while this probe was in flight.
            if self.next_index[&from] <= self.last_log_index() {
                let msg = self.build_append(from);
                output.messages.push(msg);
            }
        } else {
            // Back off to the follower's hint and retry immediately.
            let fallback = inflight.prev;
            let conflict = reply.conflict_index.unwrap_or(fallback);
            let next = conflict.max(LogIndex::new(1)).min(self.last_log_index().next());
            self.next_index.insert(from, next);
            let msg = self.build_append(from);
            output.messages.push(msg);
        }
        self.assert_cursor_invariant();
        (self, output)
    }

    /// Leader commit rule: the largest index replicated on a majority
    /// whose entry is from the **current** term. Prior-term entries are
    /// never committed by count alone; they become committed when a
    /// current-term entry lands on top of them.
    fn advance_commit(&mut self) -> bool {
        let mut acked: Vec<LogIndex> = self
            .cluster
            .peers(self.id)
            .map(|peer| self.match_index.get(&peer).copied().unwrap_or(LogIndex::ZERO))
            .collect();
        acked.push(self.last_log_index());
        acked.sort_unstable_by(|a, b| b.cmp(a));

        let candidate = acked[self.cluster.quorum_size() - 1];
        if candidate > self.commit_index && self.term_at(candidate) == Some(self.current_term) {
            tracing::debug!(
                node = %self.id,
                from = %self.commit_index,
                to = %candidate,
                "advancing commit index"
            );
            self.commit_index = candidate;
            return true;
        }
        false
    }

    // ========================================================================
    // Heartbeat / Probe Construction
    // ========================================================================

    /// The heartbeat interval elapsed: contact every peer.
    ///
    /// Peers with an outstanding probe get the same probe again (lost
    /// request or lost reply — either way the retransmit is idempotent);
    /// idle peers get a fresh probe, empty if they are caught up.
    pub(crate) fn on_heartbeat_tick(mut self) -> (Self, RaftOutput) {
        if self.role != Role::Leader {
            return (self, RaftOutput::empty());
        }
        let mut output = RaftOutput::empty();
        let peers: Vec<NodeId> = self.cluster.peers(self.id).collect();
        for peer in peers {
            let msg = match self.inflight.get(&peer) {
                Some(inflight) => self.rebuild_append(peer, *inflight),
                None => self.build_append(peer),
            };
            output.messages.push(msg);
        }
        (self, output)
    }

    /// Builds a fresh probe for `peer` from its `next_index`, capped at
    /// the batch limit, and records it as in flight.
    pub(crate) fn build_append(&mut self, peer: NodeId) -> Message {
        let next = self
            .next_index
            .get(&peer)
            .copied()
            .unwrap_or_else(|| self.last_log_index().next());
        let prev = next.prev();
        let prev_term = self
            .term_at(prev)
            .expect("next_index never runs past the log end + 1");

        let start = next.as_u64() as usize - 1;
        let end = (start + self.opts.max_append_batch).min(self.log.len());
        let entries: Vec<LogEntry> = self.log[start..end].to_vec();

        let seq = self.take_seq();
        self.inflight.insert(
            peer,
            Inflight {
                seq,
                prev,
                count: entries.len() as u64,
            },
        );
        msg_to(
            self.id,
            peer,
            seq,
            MessagePayload::AppendEntries(AppendEntries {
                term: self.current_term,
                leader_id: self.id,
                prev_log_index: prev,
                prev_log_term: prev_term,
                entries,
                leader_commit: self.commit_index,
            }),
        )
    }

    /// Retransmits the outstanding probe for `peer`: same seq, same
    /// entry range, current commit index.
    fn rebuild_append(&self, peer: NodeId, inflight: Inflight) -> Message {
        let prev_term = self
            .term_at(inflight.prev)
            .expect("inflight range is within our log");
        let start = inflight.prev.as_u64() as usize;
        let end = start + inflight.count as usize;
        let entries: Vec<LogEntry> = self.log[start..end].to_vec();
        msg_to(
            self.id,
            peer,
            inflight.seq,
            MessagePayload::AppendEntries(AppendEntries {
                term: self.current_term,
                leader_id: self.id,
                prev_log_index: inflight.prev,
                prev_log_term: prev_term,
                entries,
                leader_commit: self.commit_index,
            }),
        )
    }

    // ========================================================================
    // Client Command Submission
    // ========================================================================

    /// Accepts a client command for replication (leaders only).
    ///
    /// On success the command occupies the returned log index; the
    /// caller parks the client until the apply pipeline emits the
    /// [`Effect::Respond`] for that index (or leadership is lost).
    pub fn submit_command(
        mut self,
        command: &Command,
    ) -> (Self, Result<LogIndex, SubmitError>, RaftOutput) {
        if self.role != Role::Leader {
            let hint = self.leader_hint;
            return (
                self,
                Err(SubmitError::NotLeader { leader_hint: hint }),
                RaftOutput::empty(),
            );
        }

        let index = self.last_log_index().next();
        let entry = LogEntry {
            index,
            term: self.current_term,
            kind: command.kind(),
            payload: command.encode_payload(),
        };
        self.log.push(entry.clone());

        let mut output = RaftOutput {
            effects: vec![Effect::AppendLog(vec![entry])],
            ..RaftOutput::default()
        };

        // Push to idle peers right away; busy peers pick the entry up
        // when their outstanding probe completes.
        let idle: Vec<NodeId> = self
            .cluster
            .peers(self.id)
            .filter(|peer| !self.inflight.contains_key(peer))
            .collect();
        for peer in idle {
            let msg = self.build_append(peer);
            output.messages.push(msg);
        }

        // A single-node cluster commits on its own ack.
        if self.advance_commit() {
            self.apply_committed_entries(&mut output);
        }
        self.assert_cursor_invariant();
        (self, Ok(index), output)
    }
}
