//! Client-facing request/response protocol.
//!
//! Mutations are routed through the replicated log by the leader; reads
//! are served from the local applied state of whichever replica the
//! client is connected to. Either way the shape on the wire is the same:
//! a [`Request`] with a client-chosen id, answered by exactly one
//! [`Response`] carrying that id. Subscribed connections additionally
//! receive unsolicited [`ResponsePayload::Notification`] frames under the
//! reserved id 0.

use std::net::SocketAddr;

use halite_types::{ChatMessage, ErrorKind, MessageId, NodeId, RequestId};
use serde::{Deserialize, Serialize};

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub payload: RequestPayload,
}

/// Client operations.
///
/// Account-scoped operations act on the connection's logged-in account;
/// the server rejects them with `Unauthenticated` when no session is
/// bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPayload {
    /// Register a new account. Does not log the connection in.
    CreateAccount { name: String, password: String },
    /// Bind this connection to an account.
    Login { name: String, password: String },
    /// Clear this connection's session binding.
    Logout,
    /// Delete the logged-in account.
    DeleteAccount,
    /// List account names matching a `*` wildcard pattern, paged.
    ListUsers {
        pattern: String,
        offset: u64,
        limit: i64,
    },
    /// Send a message from the logged-in account.
    SendMessage { recipient: String, content: String },
    /// Unread/read totals for the logged-in account.
    GetCounts,
    /// Page of read messages, oldest first.
    GetReadMessages { offset: u64, limit: i64 },
    /// Move up to `count` unread messages into read (`count < 0` = all).
    PopUnread { count: i64 },
    /// Delete messages by id from both mailboxes.
    DeleteMessages { ids: Vec<MessageId> },
    /// Start streaming notifications for the logged-in account.
    Subscribe,
    /// Ask this replica who it believes the leader is.
    GetLeader,
}

/// A server response, correlated to the request by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn new(id: RequestId, payload: ResponsePayload) -> Self {
        Self { id, payload }
    }

    pub fn error(id: RequestId, code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(ErrorResponse {
                code,
                message: message.into(),
                leader_hint: None,
            }),
        }
    }

    /// An unsolicited notification frame (reserved id 0).
    pub fn notification(message: ChatMessage) -> Self {
        Self {
            id: RequestId::NOTIFICATION,
            payload: ResponsePayload::Notification { message },
        }
    }
}

/// Response payloads, one success shape per operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsePayload {
    AccountCreated,
    LoggedIn,
    LoggedOut,
    AccountDeleted,
    Users { names: Vec<String> },
    MessageSent { id: MessageId, delivered_read: bool },
    Counts { unread: u64, read: u64 },
    ReadMessages { messages: Vec<ChatMessage> },
    UnreadPopped { messages: Vec<ChatMessage> },
    MessagesDeleted,
    Subscribed,
    Leader { node: Option<(NodeId, SocketAddr)> },
    /// Server-pushed message notification (subscribed connections only).
    Notification { message: ChatMessage },
    Error(ErrorResponse),
}

/// A structured error with the taxonomy code and an optional leader hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorKind,
    pub message: String,
    /// Where the leader is believed to be, for `NotLeader` redirects.
    pub leader_hint: Option<SocketAddr>,
}
