//! Election and heartbeat timer driver.
//!
//! The consensus core is pure, so all timing lives here: the runtime
//! owns a [`TimerDriver`], passes `now` in from its clock source, and
//! feeds expirations back into the core as [`TimeoutKind`] events. Tests
//! drive the same driver with a virtual clock, which makes election
//! races fully deterministic.
//!
//! The election deadline is drawn uniformly from the configured
//! `[election_min, election_max]` window on every reset; the jitter is
//! what breaks split-vote symmetry. The RNG is seedable so a test
//! schedule replays identically.

use std::time::{Duration, Instant};

use halite_types::TimingParams;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::node::{Role, TimeoutKind};

/// Drives the two consensus timers off an externally supplied clock.
#[derive(Debug)]
pub struct TimerDriver {
    timing: TimingParams,
    rng: SmallRng,
    election_deadline: Option<Instant>,
    heartbeat_deadline: Option<Instant>,
}

impl TimerDriver {
    /// Creates a driver with the given timing window and RNG seed.
    pub fn new(timing: TimingParams, seed: u64) -> Self {
        Self {
            timing,
            rng: SmallRng::seed_from_u64(seed),
            election_deadline: None,
            heartbeat_deadline: None,
        }
    }

    /// Restarts the election window from `now` with fresh jitter.
    pub fn reset_election(&mut self, now: Instant) {
        self.election_deadline = Some(now + self.random_election_timeout());
    }

    /// Aligns the armed timers with the node's role.
    ///
    /// Leaders run only the heartbeat timer; everyone else runs only the
    /// election timer. An already armed election timer is left alone —
    /// resets happen on valid leader contact, not on every event.
    pub fn sync_role(&mut self, role: Role, now: Instant) {
        match role {
            Role::Leader => {
                self.election_deadline = None;
                if self.heartbeat_deadline.is_none() {
                    self.heartbeat_deadline = Some(now + self.timing.heartbeat_interval);
                }
            }
            Role::Follower | Role::Candidate => {
                self.heartbeat_deadline = None;
                if self.election_deadline.is_none() {
                    self.reset_election(now);
                }
            }
        }
    }

    /// The earliest armed deadline, for the poll timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.election_deadline, self.heartbeat_deadline) {
            (Some(e), Some(h)) => Some(e.min(h)),
            (deadline, None) | (None, deadline) => deadline,
        }
    }

    /// Fires and rearms every timer whose deadline has passed.
    pub fn poll_expired(&mut self, now: Instant) -> Vec<TimeoutKind> {
        let mut fired = Vec::new();
        if let Some(deadline) = self.election_deadline {
            if now >= deadline {
                fired.push(TimeoutKind::Election);
                self.reset_election(now);
            }
        }
        if let Some(deadline) = self.heartbeat_deadline {
            if now >= deadline {
                fired.push(TimeoutKind::Heartbeat);
                self.heartbeat_deadline = Some(now + self.timing.heartbeat_interval);
            }
        }
        fired
    }

    fn random_election_timeout(&mut self) -> Duration {
        let min = self.timing.election_min.as_millis() as u64;
        let max = self.timing.election_max.as_millis() as u64;
        Duration::from_millis(self.rng.gen_range(min..=max.max(min)))
    }
}
