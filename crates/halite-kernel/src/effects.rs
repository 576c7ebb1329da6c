//! Effects produced by the kernel.
//!
//! Effects represent side effects that the runtime must execute after a
//! command is applied. The kernel is pure - it produces effects but never
//! executes them directly.

use halite_types::ChatMessage;
use serde::{Deserialize, Serialize};

/// An effect to be executed by the runtime.
///
/// Produced by [`super::kernel::apply_committed`] and describing actions
/// that happen outside the pure kernel. Delivery is node-local: each node
/// executes the effect against its own live sessions, so subscribers on
/// followers see messages in that node's apply order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Push a freshly applied message to the recipient's live subscribers.
    NotifySubscribers {
        recipient: String,
        message: ChatMessage,
    },

    /// Tear down any live subscriptions for a deleted account.
    DropSubscriptions { name: String },
}
