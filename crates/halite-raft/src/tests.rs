//! Integration tests for halite-raft.
//!
//! These drive the pure consensus core directly: events in, messages
//! and effects out, with every exchange scripted by hand. No sockets,
//! no clocks — the multi-node scenarios with timing and partitions live
//! in `tests/cluster.rs`.

use bytes::Bytes;
use halite_kernel::{ApplyReply, Command};
use halite_types::{Credential, LogIndex, NodeId, Term};

use crate::message::{Message, MessagePayload};
use crate::node::{Effect, RaftOutput, RaftState, Role, SubmitError, TimeoutKind};
use crate::ClusterConfig;

// ============================================================================
// Helper Functions
// ============================================================================

const A: NodeId = NodeId::new(0);
const B: NodeId = NodeId::new(1);
const C: NodeId = NodeId::new(2);

fn cluster3() -> ClusterConfig {
    ClusterConfig::new(vec![A, B, C])
}

fn node(id: NodeId) -> RaftState {
    RaftState::new(id, cluster3(), crate::RaftOptions::default())
}

fn test_command(name: &str) -> Command {
    Command::CreateAccount {
        name: name.to_string(),
        credential: Credential {
            hash: Bytes::from_static(b"h"),
            salt: Bytes::from_static(b"s"),
        },
    }
}

fn msgs_to(output: &RaftOutput, to: NodeId) -> Vec<Message> {
    output
        .messages
        .iter()
        .filter(|m| m.to == to)
        .cloned()
        .collect()
}

fn has_hard_state_save(output: &RaftOutput) -> bool {
    output
        .effects
        .iter()
        .any(|e| matches!(e, Effect::SaveHardState(_)))
}

fn responses(output: &RaftOutput) -> Vec<(LogIndex, Result<ApplyReply, halite_kernel::KernelError>)> {
    output
        .effects
        .iter()
        .filter_map(|e| match e {
            Effect::Respond { index, reply } => Some((*index, reply.clone())),
            _ => None,
        })
        .collect()
}

/// Runs a full election: `candidate` times out, the `voters` grant, and
/// the candidate's immediate heartbeats are returned alongside.
fn elect(
    candidate: RaftState,
    voters: Vec<RaftState>,
) -> (RaftState, Vec<RaftState>, RaftOutput) {
    let (mut candidate, request_out) = candidate.on_timeout(TimeoutKind::Election);
    let mut heartbeat_out = RaftOutput::empty();
    let mut granted = Vec::new();
    for voter in voters {
        let req = msgs_to(&request_out, voter.id())
            .pop()
            .expect("candidate solicits every voter");
        let (voter, reply_out) = voter.on_message(req);
        let reply = msgs_to(&reply_out, candidate.id())
            .pop()
            .expect("voter answers the candidate");
        let (next, out) = candidate.on_message(reply);
        candidate = next;
        heartbeat_out.merge(out);
        granted.push(voter);
    }
    (candidate, granted, heartbeat_out)
}

/// Feeds every message in `output` addressed to `node`, returning the
/// node and its merged output.
fn deliver(output: &RaftOutput, mut node: RaftState) -> (RaftState, RaftOutput) {
    let mut merged = RaftOutput::empty();
    for msg in msgs_to(output, node.id()) {
        let (next, out) = node.on_message(msg);
        node = next;
        merged.merge(out);
    }
    (node, merged)
}

/// Completes the new leader's initial empty probe with `peer`, freeing
/// that peer's probe slot so a later submit pushes to it immediately.
fn settle(leader: RaftState, peer: RaftState, heartbeats: &RaftOutput) -> (RaftState, RaftState) {
    let (peer, ack) = deliver(heartbeats, peer);
    let (leader, _) = deliver(&ack, leader);
    (leader, peer)
}

// ============================================================================
// Elections
// ============================================================================

#[test]
fn election_timeout_starts_election() {
    let (a, output) = node(A).on_timeout(TimeoutKind::Election);

    assert_eq!(a.role(), Role::Candidate);
    assert_eq!(a.current_term(), Term::new(1));
    assert!(output.election_reset);
    assert!(has_hard_state_save(&output), "vote for self must persist");
    assert_eq!(msgs_to(&output, B).len(), 1);
    assert_eq!(msgs_to(&output, C).len(), 1);
}

#[test]
fn majority_elects_leader_with_immediate_heartbeat() {
    let (a, _, heartbeats) = elect(node(A), vec![node(B)]);

    assert_eq!(a.role(), Role::Leader);
    assert_eq!(a.leader_hint(), Some(A));
    // The new leader claims the floor to every peer at once.
    assert_eq!(msgs_to(&heartbeats, B).len(), 1);
    assert_eq!(msgs_to(&heartbeats, C).len(), 1);
    match &msgs_to(&heartbeats, B)[0].payload {
        MessagePayload::AppendEntries(req) => assert!(req.entries.is_empty()),
        other => panic!("expected heartbeat, got {other:?}"),
    }
}

#[test]
fn vote_denied_when_already_voted_this_term() {
    let (a, vote_req_out) = node(A).on_timeout(TimeoutKind::Election);
    let (c_state, vote_req_out2) = node(C).on_timeout(TimeoutKind::Election);

    // B grants A first.
    let (b, reply_out) = node(B).on_message(msgs_to(&vote_req_out, B).pop().unwrap());
    match &msgs_to(&reply_out, A)[0].payload {
        MessagePayload::RequestVoteReply(r) => assert!(r.vote_granted),
        other => panic!("unexpected payload {other:?}"),
    }

    // C's rival request in the same term is denied.
    let (_b, reply_out2) = b.on_message(msgs_to(&vote_req_out2, B).pop().unwrap());
    match &msgs_to(&reply_out2, C)[0].payload {
        MessagePayload::RequestVoteReply(r) => assert!(!r.vote_granted),
        other => panic!("unexpected payload {other:?}"),
    }
    drop((a, c_state));
}

#[test]
fn duplicate_vote_request_is_regranted() {
    let (a, vote_req_out) = node(A).on_timeout(TimeoutKind::Election);
    let req = msgs_to(&vote_req_out, B).pop().unwrap();

    let (b, first) = node(B).on_message(req.clone());
    let (_b, second) = b.on_message(req);
    for out in [first, second] {
        match &msgs_to(&out, A)[0].payload {
            MessagePayload::RequestVoteReply(r) => assert!(r.vote_granted),
            other => panic!("unexpected payload {other:?}"),
        }
    }
    drop(a);
}

#[test]
fn vote_denied_to_stale_log() {
    // A leads and commits one entry with B's ack.
    let (a, voters, heartbeats) = elect(node(A), vec![node(B)]);
    let b = voters.into_iter().next().unwrap();
    let (a, b) = settle(a, b, &heartbeats);
    let (a, submitted, out) = a.submit_command(&test_command("alice"));
    submitted.unwrap();
    let (b, _) = deliver(&out, b);

    // C (empty log) now asks B for a vote in a higher term.
    let (c_state, out1) = node(C).on_timeout(TimeoutKind::Election);
    let (c_state, out2) = c_state.on_timeout(TimeoutKind::Election);
    assert_eq!(c_state.current_term(), Term::new(2));
    drop(out1);

    let (_b, reply_out) = b.on_message(msgs_to(&out2, B).pop().unwrap());
    match &msgs_to(&reply_out, C)[0].payload {
        MessagePayload::RequestVoteReply(r) => {
            assert!(!r.vote_granted, "stale log must not win votes");
            assert_eq!(r.term, Term::new(2));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    drop((a, c_state));
}

#[test]
fn leader_steps_down_on_higher_term_reply() {
    let (a, _, heartbeats) = elect(node(A), vec![node(B)]);
    assert_eq!(a.role(), Role::Leader);

    // C has meanwhile moved two terms ahead; its rejection carries the
    // higher term.
    let (c_state, _) = node(C).on_timeout(TimeoutKind::Election);
    let (c_state, _) = c_state.on_timeout(TimeoutKind::Election);
    let hb = msgs_to(&heartbeats, C).pop().unwrap();
    let (c_state, reply_out) = c_state.on_message(hb);
    let reply = msgs_to(&reply_out, A).pop().unwrap();

    let (a, out) = a.on_message(reply);
    assert_eq!(a.role(), Role::Follower);
    assert_eq!(a.current_term(), c_state.current_term());
    assert!(has_hard_state_save(&out));
}

// ============================================================================
// Replication & Commit
// ============================================================================

#[test]
fn command_replicates_commits_and_responds() {
    let (a, voters, heartbeats) = elect(node(A), vec![node(B)]);
    let b = voters.into_iter().next().unwrap();
    let (a, b) = settle(a, b, &heartbeats);

    let (a, submitted, out) = a.submit_command(&test_command("alice"));
    assert_eq!(submitted, Ok(LogIndex::new(1)));
    assert!(out
        .effects
        .iter()
        .any(|e| matches!(e, Effect::AppendLog(entries) if entries.len() == 1)));

    // Nothing is committed before a majority acks.
    assert_eq!(a.commit_index(), LogIndex::ZERO);

    let (b, reply_out) = deliver(&out, b);
    // The follower persisted the entry before replying.
    assert!(reply_out
        .effects
        .iter()
        .any(|e| matches!(e, Effect::AppendLog(_))));

    let (a, commit_out) = deliver(&reply_out, a);
    assert_eq!(a.commit_index(), LogIndex::new(1));
    assert_eq!(a.last_applied(), LogIndex::new(1));
    let replies = responses(&commit_out);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, LogIndex::new(1));
    assert_eq!(replies[0].1, Ok(ApplyReply::AccountCreated));
    assert!(a.chat().account_exists("alice"));

    // The follower learns the commit index on the next heartbeat.
    let (a, tick_out) = a.on_timeout(TimeoutKind::Heartbeat);
    let (b, _) = deliver(&tick_out, b);
    assert_eq!(b.commit_index(), LogIndex::new(1));
    assert!(b.chat().account_exists("alice"));
    drop(a);
}

#[test]
fn submit_on_follower_returns_not_leader_with_hint() {
    let (a, voters, heartbeats) = elect(node(A), vec![node(B)]);
    let b = voters.into_iter().next().unwrap();
    let (b, _) = deliver(&heartbeats, b);

    let (_b, submitted, out) = b.submit_command(&test_command("x"));
    assert_eq!(
        submitted,
        Err(SubmitError::NotLeader {
            leader_hint: Some(A)
        })
    );
    assert!(out.is_empty());
    drop(a);
}

#[test]
fn append_entries_from_lower_term_rejected() {
    // B reaches term 2; a stale leader at term 1 then contacts it.
    let (b, _) = node(B).on_timeout(TimeoutKind::Election);
    let (b, _) = b.on_timeout(TimeoutKind::Election);
    assert_eq!(b.current_term(), Term::new(2));

    let (a, _, heartbeats) = elect(node(A), vec![node(C)]);
    assert_eq!(a.current_term(), Term::new(1));
    let (b, reply_out) = b.on_message(msgs_to(&heartbeats, B).pop().unwrap());
    assert_eq!(b.current_term(), Term::new(2), "stale probe changes nothing");
    assert!(!reply_out.election_reset);

    let (a, _) = deliver(&reply_out, a);
    assert_eq!(a.role(), Role::Follower, "rejected leader steps down");
    assert_eq!(a.current_term(), Term::new(2));
}

#[test]
fn conflict_hint_backs_off_in_one_round_trip() {
    // Leader A commits three entries with B's acks; C saw none of them.
    let (a, voters, heartbeats) = elect(node(A), vec![node(B)]);
    let b = voters.into_iter().next().unwrap();
    let (mut a, mut b) = settle(a, b, &heartbeats);
    for name in ["u1", "u2", "u3"] {
        let (a2, submitted, out) = a.submit_command(&test_command(name));
        submitted.unwrap();
        let (b2, reply_out) = deliver(&out, b);
        let (a3, _) = deliver(&reply_out, a2);
        a = a3;
        b = b2;
    }
    assert_eq!(a.commit_index(), LogIndex::new(3));

    // A dies; B wins term 2 (its full log beats C's empty one) and its
    // immediate heartbeat probes C at prev=3.
    let (b, _, heartbeats) = elect(b, vec![node(C)]);
    assert_eq!(b.current_term(), Term::new(2));
    let probe = msgs_to(&heartbeats, C).pop().unwrap();
    let (c_state, reject_out) = node(C).on_message(probe);
    match &msgs_to(&reject_out, B)[0].payload {
        MessagePayload::AppendEntriesReply(r) => {
            assert!(!r.success);
            assert_eq!(
                r.conflict_index,
                Some(LogIndex::new(1)),
                "hint points one past C's empty log"
            );
        }
        other => panic!("unexpected payload {other:?}"),
    }

    // The retry carries everything from index 1; one more round trip
    // catches C up completely.
    let (b, retry_out) = deliver(&reject_out, b);
    let (c_state, _ack) = deliver(&retry_out, c_state);
    assert_eq!(c_state.last_log_index(), LogIndex::new(3));
    drop((a, b));
}

#[test]
fn prior_term_entry_commits_only_under_current_term_entry() {
    // A leads term 1 and replicates entry 1 to B, but dies before
    // committing it.
    let (a, voters, heartbeats) = elect(node(A), vec![node(B)]);
    let b = voters.into_iter().next().unwrap();
    let (a, b) = settle(a, b, &heartbeats);
    let (_a_dead, submitted, out) = a.submit_command(&test_command("orphan"));
    submitted.unwrap();
    let (b, _) = deliver(&out, b);
    assert_eq!(b.last_log_index(), LogIndex::new(1));
    assert_eq!(b.commit_index(), LogIndex::ZERO);

    // B wins term 2 with C's vote.
    let (b, voters, _) = elect(b, vec![node(C)]);
    let mut c_state = voters.into_iter().next().unwrap();
    assert_eq!(b.role(), Role::Leader);
    assert_eq!(b.current_term(), Term::new(2));

    // B replicates the term-1 entry to C via probe/backoff.
    let (mut b, tick_out) = b.on_timeout(TimeoutKind::Heartbeat);
    let mut pending = tick_out;
    for _ in 0..4 {
        let (next_c, from_c) = deliver(&pending, c_state);
        c_state = next_c;
        let (next_b, from_b) = deliver(&from_c, b);
        b = next_b;
        pending = from_b;
        if c_state.last_log_index() == LogIndex::new(1) {
            break;
        }
    }
    assert_eq!(c_state.last_log_index(), LogIndex::new(1));

    // Majority holds entry 1, but it is from term 1: not committed.
    assert_eq!(
        b.commit_index(),
        LogIndex::ZERO,
        "prior-term entry must not commit by count alone"
    );

    // A current-term entry on top commits both.
    let (mut b, submitted, out) = b.submit_command(&test_command("fresh"));
    submitted.unwrap();
    let mut pending = out;
    for _ in 0..4 {
        let (next_c, from_c) = deliver(&pending, c_state);
        c_state = next_c;
        let (next_b, from_b) = deliver(&from_c, b);
        b = next_b;
        pending = from_b;
        if b.commit_index() == LogIndex::new(2) {
            break;
        }
    }
    assert_eq!(b.commit_index(), LogIndex::new(2));
    assert!(b.chat().account_exists("orphan"));
    assert!(b.chat().account_exists("fresh"));
}

#[test]
fn deposed_leader_suffix_is_truncated() {
    // A leads term 1 and appends an entry nobody ever sees.
    let (a, _, _) = elect(node(A), vec![node(B)]);
    let (a, submitted, _dropped) = a.submit_command(&test_command("lost"));
    submitted.unwrap();
    assert_eq!(a.last_log_index(), LogIndex::new(1));

    // B wins term 2 from C (both logs empty; A is partitioned away).
    let (b, _) = node(B).on_timeout(TimeoutKind::Election);
    let (b, vote_out) = b.on_timeout(TimeoutKind::Election);
    assert_eq!(b.current_term(), Term::new(2));
    let (c_state, reply_out) = deliver(&vote_out, node(C));
    let (b, hb_out) = deliver(&reply_out, b);
    assert_eq!(b.role(), Role::Leader);
    // Let the immediate heartbeat round-trip with C so its probe slot
    // frees up (A stays partitioned: its probe goes unanswered).
    let (c_state, ack0) = deliver(&hb_out, c_state);
    let (b, _) = deliver(&ack0, b);

    // B commits a different entry at index 1 with C's ack.
    let (b, submitted, out) = b.submit_command(&test_command("kept"));
    submitted.unwrap();
    let (c_state, ack_out) = deliver(&out, c_state);
    let (b, _) = deliver(&ack_out, b);
    assert_eq!(b.commit_index(), LogIndex::new(1));

    // The partition heals. The heartbeat retransmits A's outstanding
    // empty probe (prev=0): A adopts term 2 and steps down, but its
    // stale entry must NOT commit — the empty probe vouches for nothing
    // past index 0.
    let (b, tick_out) = b.on_timeout(TimeoutKind::Heartbeat);
    let probe = msgs_to(&tick_out, A).pop().unwrap();
    let (a, first_reply) = a.on_message(probe);
    assert_eq!(a.role(), Role::Follower);
    assert_eq!(a.current_term(), Term::new(2));
    assert_eq!(a.commit_index(), LogIndex::ZERO, "stale suffix not committed");
    assert!(!a.chat().account_exists("lost"));

    // B advances to match 0 and immediately sends the real entry, which
    // conflicts with A's 1@1: truncate, append, and commit B's entry.
    let (b, retry_out) = deliver(&first_reply, b);
    let (a, ack) = deliver(&retry_out, a);

    assert!(ack
        .effects
        .iter()
        .any(|e| matches!(e, Effect::TruncateLog { from } if *from == LogIndex::new(1))));
    assert_eq!(a.last_log_index(), LogIndex::new(1));
    assert_eq!(
        a.entry(LogIndex::new(1)).unwrap().term,
        Term::new(2),
        "A now holds the term-2 entry"
    );
    assert_eq!(a.commit_index(), LogIndex::new(1));
    assert!(a.chat().account_exists("kept"));
    assert!(!a.chat().account_exists("lost"));
    drop((b, c_state));
}

#[test]
fn stale_reply_with_old_seq_is_ignored() {
    let (a, voters, heartbeats) = elect(node(A), vec![node(B)]);
    let b = voters.into_iter().next().unwrap();
    let (a, b) = settle(a, b, &heartbeats);

    let (a, submitted, first_out) = a.submit_command(&test_command("x"));
    submitted.unwrap();
    let first_probe = msgs_to(&first_out, B).pop().unwrap();

    // The heartbeat retransmits the same probe with the same seq.
    let (a, tick_out) = a.on_timeout(TimeoutKind::Heartbeat);
    let resent_probe = msgs_to(&tick_out, B).pop().unwrap();
    assert_eq!(first_probe.seq, resent_probe.seq, "retransmit reuses seq");

    // B answers both copies; the second ack must be a no-op.
    let (b, ack1) = b.on_message(first_probe);
    let (_b, ack2) = b.on_message(resent_probe);
    let (a, out1) = deliver(&ack1, a);
    assert_eq!(a.commit_index(), LogIndex::new(1));
    let commit_before = a.commit_index();
    let (a, out2) = deliver(&ack2, a);
    assert_eq!(a.commit_index(), commit_before);
    assert!(responses(&out2).is_empty(), "no double apply");
    drop(out1);
}

#[test]
fn single_node_cluster_commits_immediately() {
    let cluster = ClusterConfig::new(vec![A]);
    let solo = RaftState::new(A, cluster, crate::RaftOptions::default());
    let (solo, out) = solo.on_timeout(TimeoutKind::Election);
    assert_eq!(solo.role(), Role::Leader);
    assert!(out.messages.is_empty());

    let (solo, submitted, out) = solo.submit_command(&test_command("only"));
    assert_eq!(submitted, Ok(LogIndex::new(1)));
    assert_eq!(solo.commit_index(), LogIndex::new(1));
    assert_eq!(responses(&out).len(), 1);
    assert!(solo.chat().account_exists("only"));
}
