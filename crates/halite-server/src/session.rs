//! Session layer and notification fan-out.
//!
//! Process-local, never replicated: which connection is logged in as
//! whom, and which connections are subscribed to which account's
//! messages. Each subscribed connection owns a bounded notification
//! mailbox (drop-oldest on overflow) that the apply pipeline feeds and
//! the write path drains.

use std::collections::{HashMap, HashSet};

use crossbeam_queue::ArrayQueue;
use halite_types::ChatMessage;
use mio::Token;

/// A bounded FIFO of fresh messages for one subscribed connection.
///
/// Overflow drops the oldest entry: a subscriber that cannot keep up
/// sees the newest traffic and the drop counter, never unbounded memory.
#[derive(Debug)]
pub struct NotificationMailbox {
    queue: ArrayQueue<ChatMessage>,
    dropped: u64,
}

impl NotificationMailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            dropped: 0,
        }
    }

    /// Enqueues a message, displacing the oldest one when full.
    pub fn push(&mut self, message: ChatMessage) {
        if self.queue.force_push(message).is_some() {
            self.dropped += 1;
        }
    }

    pub fn pop(&mut self) -> Option<ChatMessage> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Messages dropped to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Maps live connections to principals and subscriptions.
#[derive(Debug, Default)]
pub struct SessionTable {
    /// Connection → logged-in account.
    accounts: HashMap<Token, String>,
    /// Account → subscribed connections.
    subscribers: HashMap<String, HashSet<Token>>,
    /// Subscribed connection → its notification mailbox.
    mailboxes: HashMap<Token, NotificationMailbox>,
    mailbox_capacity: usize,
}

impl SessionTable {
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            mailbox_capacity,
            ..Self::default()
        }
    }

    /// Binds a connection to an account (login). Rebinding replaces the
    /// previous binding and drops its subscription.
    pub fn bind(&mut self, token: Token, account: &str) {
        self.unbind(token);
        self.accounts.insert(token, account.to_string());
    }

    /// Clears a connection's binding and subscription (logout).
    pub fn unbind(&mut self, token: Token) {
        if let Some(account) = self.accounts.remove(&token) {
            if let Some(subs) = self.subscribers.get_mut(&account) {
                subs.remove(&token);
                if subs.is_empty() {
                    self.subscribers.remove(&account);
                }
            }
        }
        self.mailboxes.remove(&token);
    }

    /// The account a connection is logged in as.
    pub fn account(&self, token: Token) -> Option<&str> {
        self.accounts.get(&token).map(String::as_str)
    }

    /// Subscribes a logged-in connection to its account's messages.
    ///
    /// Returns false when the connection has no session.
    pub fn subscribe(&mut self, token: Token) -> bool {
        let Some(account) = self.accounts.get(&token).cloned() else {
            return false;
        };
        self.subscribers.entry(account).or_default().insert(token);
        self.mailboxes
            .entry(token)
            .or_insert_with(|| NotificationMailbox::new(self.mailbox_capacity));
        true
    }

    /// Does any live connection on this node subscribe to `account`?
    ///
    /// This is the leader's "online hint" for routing a send straight
    /// into the read mailbox.
    pub fn has_subscribers(&self, account: &str) -> bool {
        self.subscribers
            .get(account)
            .is_some_and(|subs| !subs.is_empty())
    }

    /// Fans a freshly applied message out to the recipient's local
    /// subscribers. Returns the tokens whose mailboxes received it.
    pub fn notify(&mut self, recipient: &str, message: &ChatMessage) -> Vec<Token> {
        let Some(subs) = self.subscribers.get(recipient) else {
            return Vec::new();
        };
        let tokens: Vec<Token> = subs.iter().copied().collect();
        for token in &tokens {
            if let Some(mailbox) = self.mailboxes.get_mut(token) {
                let before = mailbox.dropped();
                mailbox.push(message.clone());
                if mailbox.dropped() > before {
                    tracing::warn!(
                        token = token.0,
                        recipient,
                        dropped_total = mailbox.dropped(),
                        "subscriber mailbox overflow, oldest notification dropped"
                    );
                }
            }
        }
        tokens
    }

    /// Pops one pending notification for a connection.
    pub fn pop_notification(&mut self, token: Token) -> Option<ChatMessage> {
        self.mailboxes.get_mut(&token).and_then(NotificationMailbox::pop)
    }

    /// Drains a connection's pending notifications.
    pub fn drain_mailbox(&mut self, token: Token) -> Vec<ChatMessage> {
        let Some(mailbox) = self.mailboxes.get_mut(&token) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(mailbox.len());
        while let Some(msg) = mailbox.pop() {
            out.push(msg);
        }
        out
    }

    /// Tears down every session and subscription for `account` (the
    /// account was deleted). Returns the affected connections.
    pub fn drop_account(&mut self, account: &str) -> Vec<Token> {
        let tokens: Vec<Token> = self
            .accounts
            .iter()
            .filter(|(_, a)| a.as_str() == account)
            .map(|(t, _)| *t)
            .collect();
        for token in &tokens {
            self.unbind(*token);
        }
        tokens
    }

    /// Removes all state for a disconnected connection.
    pub fn disconnect(&mut self, token: Token) {
        self.unbind(token);
    }
}
