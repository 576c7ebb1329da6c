//! Cluster membership configuration.
//!
//! The member set is fixed at startup; there is no runtime
//! reconfiguration. Quorum is a strict majority of the full member set,
//! counting unreachable members.

use halite_types::NodeId;
use serde::{Deserialize, Serialize};

/// The fixed set of consensus members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    members: Vec<NodeId>,
}

impl ClusterConfig {
    /// Creates a cluster configuration from the member list.
    ///
    /// # Panics
    ///
    /// Panics if the member list is empty or contains duplicates; both
    /// are configuration errors caught before the node starts.
    pub fn new(mut members: Vec<NodeId>) -> Self {
        assert!(!members.is_empty(), "cluster must have at least one member");
        members.sort_unstable();
        members.dedup();
        Self { members }
    }

    /// Total number of members.
    pub fn cluster_size(&self) -> usize {
        self.members.len()
    }

    /// Votes/acks required for a majority.
    pub fn quorum_size(&self) -> usize {
        self.members.len() / 2 + 1
    }

    /// Number of simultaneous member failures the cluster tolerates.
    pub fn max_failures(&self) -> usize {
        (self.members.len() - 1) / 2
    }

    /// All members, in id order.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    /// All members except `me`.
    pub fn peers(&self, me: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().copied().filter(move |&id| id != me)
    }

    /// Returns true if `id` is a member.
    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }
}
