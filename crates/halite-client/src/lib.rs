//! # halite-client: client library for the Halite chat service
//!
//! A blocking TCP client over the binary wire protocol. Every operation
//! retries across the server list on transport failures, follows
//! `NotLeader` redirects (using the leader hint when it maps into the
//! known server list), and backs off with a capped delay. Per-call
//! deadlines surface as [`ClientError::Timeout`]; a command that timed
//! out may still commit (at-least-once is the contract — a retried send
//! can deliver twice, with two distinct message ids).

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use bytes::BytesMut;
use halite_types::{ChatMessage, ErrorKind, MessageId, NodeId, RequestId};
use halite_wire::{
    decode_frame, encode_frame, Request, RequestPayload, Response, ResponsePayload,
};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Client-side errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure after exhausting retries.
    #[error("no reachable server (last error: {0})")]
    Unreachable(String),

    /// The server answered with a structured error.
    #[error("{code}: {message}")]
    Server { code: ErrorKind, message: String },

    /// The per-call deadline elapsed. The command may still commit.
    #[error("request timed out (the command may still commit)")]
    Timeout,

    /// The server sent something the protocol does not allow here.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl ClientError {
    /// The taxonomy code, when the server produced one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Server { code, .. } => Some(*code),
            ClientError::Timeout => Some(ErrorKind::Timeout),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Connection and retry settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    /// Per-call deadline while waiting for the response.
    pub request_timeout: Duration,
    /// Attempts across the server list before giving up.
    pub max_retries: usize,
    /// Backoff base; attempt `n` sleeps `n * backoff`, capped at 1s.
    pub backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_secs(5),
            max_retries: 8,
            backoff: Duration::from_millis(100),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// A connection-managing chat client.
pub struct ChatClient {
    servers: Vec<SocketAddr>,
    config: ClientConfig,
    stream: Option<TcpStream>,
    read_buf: BytesMut,
    /// Which server we are (or will next be) connected to.
    current: usize,
    next_request: u64,
    /// Notification frames that arrived while waiting for a response.
    pending_notifications: VecDeque<ChatMessage>,
}

impl ChatClient {
    /// Creates a client for the given server list (connects lazily).
    pub fn new(servers: Vec<SocketAddr>, config: ClientConfig) -> Self {
        assert!(!servers.is_empty(), "server list must not be empty");
        Self {
            servers,
            config,
            stream: None,
            read_buf: BytesMut::new(),
            current: 0,
            next_request: 0,
            pending_notifications: VecDeque::new(),
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub fn create_account(&mut self, name: &str, password: &str) -> Result<(), ClientError> {
        match self.request(RequestPayload::CreateAccount {
            name: name.to_string(),
            password: password.to_string(),
        })? {
            ResponsePayload::AccountCreated => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub fn login(&mut self, name: &str, password: &str) -> Result<(), ClientError> {
        match self.request(RequestPayload::Login {
            name: name.to_string(),
            password: password.to_string(),
        })? {
            ResponsePayload::LoggedIn => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub fn logout(&mut self) -> Result<(), ClientError> {
        match self.request(RequestPayload::Logout)? {
            ResponsePayload::LoggedOut => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub fn delete_account(&mut self) -> Result<(), ClientError> {
        match self.request(RequestPayload::DeleteAccount)? {
            ResponsePayload::AccountDeleted => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub fn list_users(
        &mut self,
        pattern: &str,
        offset: u64,
        limit: i64,
    ) -> Result<Vec<String>, ClientError> {
        match self.request(RequestPayload::ListUsers {
            pattern: pattern.to_string(),
            offset,
            limit,
        })? {
            ResponsePayload::Users { names } => Ok(names),
            other => Err(unexpected(&other)),
        }
    }

    /// Sends a message; returns its id and whether the recipient was
    /// online (delivered straight to the read mailbox).
    pub fn send_message(
        &mut self,
        recipient: &str,
        content: &str,
    ) -> Result<(MessageId, bool), ClientError> {
        match self.request(RequestPayload::SendMessage {
            recipient: recipient.to_string(),
            content: content.to_string(),
        })? {
            ResponsePayload::MessageSent { id, delivered_read } => Ok((id, delivered_read)),
            other => Err(unexpected(&other)),
        }
    }

    /// Unread and read totals for the logged-in account.
    pub fn get_counts(&mut self) -> Result<(u64, u64), ClientError> {
        match self.request(RequestPayload::GetCounts)? {
            ResponsePayload::Counts { unread, read } => Ok((unread, read)),
            other => Err(unexpected(&other)),
        }
    }

    pub fn get_read_messages(
        &mut self,
        offset: u64,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        match self.request(RequestPayload::GetReadMessages { offset, limit })? {
            ResponsePayload::ReadMessages { messages } => Ok(messages),
            other => Err(unexpected(&other)),
        }
    }

    /// Moves up to `count` unread messages into read (`count < 0` = all)
    /// and returns them.
    pub fn pop_unread(&mut self, count: i64) -> Result<Vec<ChatMessage>, ClientError> {
        match self.request(RequestPayload::PopUnread { count })? {
            ResponsePayload::UnreadPopped { messages } => Ok(messages),
            other => Err(unexpected(&other)),
        }
    }

    pub fn delete_messages(&mut self, ids: Vec<MessageId>) -> Result<(), ClientError> {
        match self.request(RequestPayload::DeleteMessages { ids })? {
            ResponsePayload::MessagesDeleted => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Starts the notification stream for the logged-in account.
    pub fn subscribe(&mut self) -> Result<(), ClientError> {
        match self.request(RequestPayload::Subscribe)? {
            ResponsePayload::Subscribed => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Who the connected replica believes leads.
    pub fn get_leader(&mut self) -> Result<Option<(NodeId, SocketAddr)>, ClientError> {
        match self.request(RequestPayload::GetLeader)? {
            ResponsePayload::Leader { node } => Ok(node),
            other => Err(unexpected(&other)),
        }
    }

    /// Waits up to `timeout` for the next pushed notification.
    ///
    /// Returns `Ok(None)` when the deadline passes quietly. Requires a
    /// prior [`subscribe`](Self::subscribe) on this connection.
    pub fn next_notification(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ChatMessage>, ClientError> {
        if let Some(message) = self.pending_notifications.pop_front() {
            return Ok(Some(message));
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ClientError::Protocol("not connected; subscribe first".to_string()))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;

        match read_response(stream, &mut self.read_buf) {
            Ok(response) if response.id == RequestId::NOTIFICATION => match response.payload {
                ResponsePayload::Notification { message } => Ok(Some(message)),
                other => Err(unexpected(&other)),
            },
            Ok(response) => Err(ClientError::Protocol(format!(
                "unsolicited response for request {}",
                response.id
            ))),
            Err(ReadError::Timeout) => Ok(None),
            Err(ReadError::Transport(e)) => {
                self.disconnect();
                Err(ClientError::Unreachable(e))
            }
            Err(ReadError::Protocol(e)) => Err(ClientError::Protocol(e)),
        }
    }

    // ========================================================================
    // Request Plumbing
    // ========================================================================

    fn request(&mut self, payload: RequestPayload) -> Result<ResponsePayload, ClientError> {
        let mut last_error = String::from("no attempt made");
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self
                    .config
                    .backoff
                    .saturating_mul(attempt as u32)
                    .min(Duration::from_secs(1));
                std::thread::sleep(delay);
            }

            match self.try_request(&payload) {
                Ok(ResponsePayload::Error(e)) if e.code == ErrorKind::NotLeader => {
                    tracing::debug!(hint = ?e.leader_hint, "redirected: not the leader");
                    self.redirect(e.leader_hint);
                    last_error = e.message;
                }
                Ok(ResponsePayload::Error(e)) if e.code == ErrorKind::Unavailable => {
                    self.rotate();
                    last_error = e.message;
                }
                Ok(ResponsePayload::Error(e)) => {
                    return Err(ClientError::Server {
                        code: e.code,
                        message: e.message,
                    })
                }
                Ok(payload) => return Ok(payload),
                Err(ReadError::Timeout) => return Err(ClientError::Timeout),
                Err(ReadError::Protocol(e)) => return Err(ClientError::Protocol(e)),
                Err(ReadError::Transport(e)) => {
                    tracing::debug!(error = %e, "transport failure, trying next server");
                    self.disconnect();
                    self.rotate();
                    last_error = e;
                }
            }
        }
        Err(ClientError::Unreachable(last_error))
    }

    fn try_request(&mut self, payload: &RequestPayload) -> Result<ResponsePayload, ReadError> {
        self.ensure_connected()?;
        self.next_request += 1;
        let id = RequestId::new(self.next_request);
        let request = Request {
            id,
            payload: payload.clone(),
        };

        let stream = self.stream.as_mut().expect("connected");
        let mut out = BytesMut::new();
        encode_frame(&request, &mut out).map_err(|e| ReadError::Protocol(e.to_string()))?;
        stream
            .write_all(&out)
            .map_err(|e| ReadError::Transport(e.to_string()))?;

        // Read until our response arrives; notifications that slip in
        // between are buffered for next_notification().
        loop {
            let response = read_response(stream, &mut self.read_buf)?;
            if response.id == id {
                return Ok(response.payload);
            }
            if response.id == RequestId::NOTIFICATION {
                if let ResponsePayload::Notification { message } = response.payload {
                    self.pending_notifications.push_back(message);
                    continue;
                }
            }
            return Err(ReadError::Protocol(format!(
                "response for unknown request {}",
                response.id
            )));
        }
    }

    fn ensure_connected(&mut self) -> Result<(), ReadError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addr = self.servers[self.current];
        let stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout)
            .map_err(|e| ReadError::Transport(format!("connect {addr}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ReadError::Transport(e.to_string()))?;
        stream
            .set_read_timeout(Some(self.config.request_timeout))
            .map_err(|e| ReadError::Transport(e.to_string()))?;
        tracing::debug!(%addr, "connected");
        self.read_buf.clear();
        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stream = None;
        self.read_buf.clear();
    }

    /// Follows a leader hint when it maps into the server list,
    /// otherwise falls back to round-robin.
    fn redirect(&mut self, hint: Option<SocketAddr>) {
        self.disconnect();
        match hint.and_then(|addr| self.servers.iter().position(|s| *s == addr)) {
            Some(index) => self.current = index,
            None => self.rotate(),
        }
    }

    fn rotate(&mut self) {
        self.disconnect();
        self.current = (self.current + 1) % self.servers.len();
    }
}

fn unexpected(payload: &ResponsePayload) -> ClientError {
    ClientError::Protocol(format!("unexpected response payload: {payload:?}"))
}

// ============================================================================
// Frame Reading
// ============================================================================

enum ReadError {
    Timeout,
    Transport(String),
    Protocol(String),
}

fn read_response(stream: &mut TcpStream, buf: &mut BytesMut) -> Result<Response, ReadError> {
    loop {
        if let Some(response) =
            decode_frame::<Response>(buf).map_err(|e| ReadError::Protocol(e.to_string()))?
        {
            return Ok(response);
        }
        let mut chunk = [0u8; 8 * 1024];
        match stream.read(&mut chunk) {
            Ok(0) => return Err(ReadError::Transport("connection closed".to_string())),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(ReadError::Timeout)
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(ReadError::Transport(e.to_string())),
        }
    }
}
