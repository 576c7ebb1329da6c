//! Kernel state management.
//!
//! [`ChatState`] is the in-memory model the replicated log is applied to:
//! accounts with credential records, per-user unread/read mailboxes, the
//! message table, and the monotonic message id counter. State transitions
//! take ownership and return the new state (the builder pattern used
//! throughout the kernel), which supports the functional core without
//! cloning the maps.

use std::collections::BTreeMap;

use bytes::Bytes;
use halite_types::{ChatMessage, Credential, MessageId};
use serde::{Deserialize, Serialize};

use crate::kernel::KernelError;

// ============================================================================
// Accounts
// ============================================================================

/// A registered account with its mailboxes.
///
/// Mailboxes hold message ids in delivery order; the message bodies live
/// in the state-wide message table. A message id is in exactly one of
/// `unread` or `read` until deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub credential: Credential,
    pub unread: Vec<MessageId>,
    pub read: Vec<MessageId>,
}

impl Account {
    fn new(credential: Credential) -> Self {
        Self {
            credential,
            unread: Vec::new(),
            read: Vec::new(),
        }
    }
}

/// Unread/read totals for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxCounts {
    pub unread: usize,
    pub read: usize,
}

/// A message body in the state-wide table (id lives in the mailbox lists).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredMessage {
    sender: String,
    content: String,
}

// ============================================================================
// Chat State
// ============================================================================

/// The kernel's in-memory state.
///
/// Uses `BTreeMap` so iteration order (and therefore snapshot bytes) is
/// deterministic across replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChatState {
    accounts: BTreeMap<String, Account>,
    messages: BTreeMap<MessageId, StoredMessage>,
    /// Highest message id assigned so far; the next send gets `last + 1`.
    last_message_id: MessageId,
}

impl ChatState {
    /// Creates a new empty state.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Queries (read-only, served from local applied state)
    // ========================================================================

    /// Returns true if an account with the given name exists.
    pub fn account_exists(&self, name: &str) -> bool {
        self.accounts.contains_key(name)
    }

    /// Returns the stored credential for an account, if it exists.
    pub fn credential(&self, name: &str) -> Option<&Credential> {
        self.accounts.get(name).map(|a| &a.credential)
    }

    /// Returns unread/read totals for an account.
    pub fn counts(&self, name: &str) -> Option<MailboxCounts> {
        self.accounts.get(name).map(|a| MailboxCounts {
            unread: a.unread.len(),
            read: a.read.len(),
        })
    }

    /// Lists account names matching a `*` wildcard pattern, paged.
    ///
    /// An empty pattern matches everything. `offset` skips from the start
    /// of the (sorted) match list; `limit < 0` means no limit.
    pub fn list_users(&self, pattern: &str, offset: usize, limit: i64) -> Vec<String> {
        let matches = self
            .accounts
            .keys()
            .filter(|name| wildcard_match(pattern, name))
            .skip(offset);
        if limit < 0 {
            matches.cloned().collect()
        } else {
            matches.take(limit as usize).cloned().collect()
        }
    }

    /// Returns a page of read messages in mailbox order.
    ///
    /// `offset` skips that many messages from the oldest end, then up to
    /// `limit` messages are returned (`limit < 0` returns everything
    /// from the offset on).
    pub fn read_messages(&self, name: &str, offset: usize, limit: i64) -> Option<Vec<ChatMessage>> {
        let account = self.accounts.get(name)?;
        let n = account.read.len();
        let start = offset.min(n);
        let end = if limit < 0 {
            n
        } else {
            (start + limit as usize).min(n)
        };
        Some(
            account.read[start..end]
                .iter()
                .filter_map(|id| self.chat_message(*id))
                .collect(),
        )
    }

    /// Highest message id assigned so far.
    pub fn last_message_id(&self) -> MessageId {
        self.last_message_id
    }

    fn chat_message(&self, id: MessageId) -> Option<ChatMessage> {
        self.messages.get(&id).map(|m| ChatMessage {
            id,
            sender: m.sender.clone(),
            content: m.content.clone(),
        })
    }

    // ========================================================================
    // Transitions (internal to the kernel; external code goes through
    // apply_committed, which handles validation, replies, and effects)
    // ========================================================================

    pub(crate) fn with_account(mut self, name: String, credential: Credential) -> Self {
        self.accounts.insert(name, Account::new(credential));
        self
    }

    /// Removes an account, dropping its messages from the table.
    pub(crate) fn without_account(mut self, name: &str) -> Self {
        if let Some(account) = self.accounts.remove(name) {
            for id in account.unread.iter().chain(account.read.iter()) {
                self.messages.remove(id);
            }
        }
        self
    }

    /// Stores a new message and appends its id to the recipient's mailbox.
    ///
    /// The caller has validated that the recipient exists.
    pub(crate) fn with_message(
        mut self,
        recipient: &str,
        sender: String,
        content: String,
        deliver_read: bool,
    ) -> (Self, MessageId) {
        let id = self.last_message_id.next();
        self.last_message_id = id;
        self.messages.insert(id, StoredMessage { sender, content });
        let account = self
            .accounts
            .get_mut(recipient)
            .expect("recipient validated by apply_committed");
        if deliver_read {
            account.read.push(id);
        } else {
            account.unread.push(id);
        }
        (self, id)
    }

    /// Moves up to `count` head entries of unread into read, in order.
    pub(crate) fn with_popped_unread(
        mut self,
        name: &str,
        count: i64,
    ) -> (Self, Vec<ChatMessage>) {
        let account = self
            .accounts
            .get_mut(name)
            .expect("account validated by apply_committed");
        let take = if count < 0 {
            account.unread.len()
        } else {
            (count as usize).min(account.unread.len())
        };
        let moved: Vec<MessageId> = account.unread.drain(..take).collect();
        account.read.extend_from_slice(&moved);
        let messages = moved
            .into_iter()
            .filter_map(|id| self.chat_message(id))
            .collect();
        (self, messages)
    }

    /// Removes the given ids from both mailboxes and the message table.
    pub(crate) fn without_messages(mut self, name: &str, ids: &[MessageId]) -> Self {
        let account = self
            .accounts
            .get_mut(name)
            .expect("account validated by apply_committed");
        account.unread.retain(|id| !ids.contains(id));
        account.read.retain(|id| !ids.contains(id));
        for id in ids {
            self.messages.remove(id);
        }
        self
    }

    // ========================================================================
    // Snapshot / Restore
    // ========================================================================

    /// Serializes the full state into a snapshot blob.
    ///
    /// `BTreeMap` iteration order makes the output deterministic:
    /// snapshot → restore → snapshot is byte-identical.
    pub fn snapshot(&self) -> Bytes {
        let bytes = postcard::to_allocvec(self)
            .expect("state serialization cannot fail: all fields are serializable");
        Bytes::from(bytes)
    }

    /// Rebuilds a state from a snapshot blob, replacing everything.
    pub fn restore(blob: &[u8]) -> Result<Self, KernelError> {
        postcard::from_bytes(blob).map_err(|_| KernelError::SnapshotCorrupt)
    }
}

// ============================================================================
// Wildcard Matching
// ============================================================================

/// Matches a name against a pattern where `*` matches any run of characters.
///
/// An empty pattern matches everything (the original list-users contract).
pub(crate) fn wildcard_match(pattern: &str, name: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with '*' (last part empty) or every literal was consumed.
    true
}
