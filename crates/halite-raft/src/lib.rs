//! # halite-raft: consensus core
//!
//! This crate implements the Raft-style consensus protocol driving the
//! replicated chat log as a pure, deterministic state machine:
//!
//! - Takes events as input (peer messages, timeouts, client commands)
//! - Produces new state, outgoing messages, and effects as output
//! - No I/O, no clocks, no randomness
//!
//! The runtime that owns a [`RaftState`] is responsible for executing
//! the effects (storage writes first — a node that cannot persist must
//! halt), then sending the messages, then rearming timers. Keeping the
//! core pure makes the whole protocol drivable from deterministic tests:
//! the cluster harness in `tests/` runs full elections, replication, and
//! failover scenarios without a socket or a real clock in sight.
//!
//! # Protocol Overview
//!
//! ```text
//! Client ──Command──► Leader
//!                       │
//!                       ├──AppendEntries──► Follower₁
//!                       ├──AppendEntries──► Follower₂
//!                       │                     │
//!                       │◄────success─────────┤
//!                       │◄────success─────────┘
//!                       │  (majority: commit, apply, reply)
//! Client ◄──Reply──────┘
//! ```
//!
//! Elections are driven by randomized timeouts: a follower that hears
//! nothing within its election window becomes a candidate, increments
//! the term, and solicits votes; a candidate with a majority becomes
//! leader and suppresses further elections with heartbeats.

mod config;
mod message;
mod node;
mod timer;

#[cfg(test)]
mod tests;

pub use config::ClusterConfig;
pub use message::{
    AppendEntries, AppendEntriesReply, Message, MessagePayload, RequestVote, RequestVoteReply,
};
pub use node::{
    Effect, RaftOptions, RaftOutput, RaftState, RecoveryError, Role, SubmitError, TimeoutKind,
};
pub use timer::TimerDriver;
