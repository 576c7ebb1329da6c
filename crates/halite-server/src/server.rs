//! The node runtime: one mio poll loop owning everything.
//!
//! A single thread drives peer I/O, client I/O, consensus timers, the
//! apply pipeline, and subscription fan-out. The consensus core is pure;
//! this loop feeds it events and executes its outputs — durability
//! effects first (halting on failure), then outgoing messages, then
//! timer rearming. Because one thread owns all state, nothing is ever
//! held "across" I/O: each step is snapshot → compute → persist → send.
//!
//! Shutdown is signal-driven (SIGINT/SIGTERM): outstanding waiters get
//! `Unavailable`, the state machine is checkpointed, and the process
//! exits 0.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_mio::v1_0::Signals;

use halite_config::HaliteConfig;
use halite_raft::{
    ClusterConfig, Effect, Message, RaftOptions, RaftOutput, RaftState, Role, SubmitError,
    TimerDriver,
};
use halite_storage::{DiskStore, Snapshot};
use halite_types::{ErrorKind, LogIndex, NodeId, RequestId};
use halite_wire::{ErrorResponse, Request, Response, ResponsePayload};

use crate::clock::Clock;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::handler::{self, Action};
use crate::peers::PeerLinks;
use crate::session::SessionTable;

const CLIENT_LISTENER: Token = Token(0);
const PEER_LISTENER: Token = Token(1);
const SIGNAL_TOKEN: Token = Token(2);
const PEER_LINK_BASE: usize = 3;

/// Cap on parked mutations; beyond it new mutations get `Unavailable`.
const MAX_WAITERS: usize = 1024;

/// Parked mutations older than this complete with `Timeout` (the client
/// has almost certainly given up; the command may still commit).
const WAITER_TTL: Duration = Duration::from_secs(30);

/// A client parked on a log index, waiting for commit + apply.
#[derive(Debug)]
struct Waiter {
    token: Token,
    request: RequestId,
    since: Instant,
}

/// The Halite node server.
pub struct Server<C: Clock> {
    config: HaliteConfig,
    me: NodeId,
    clock: C,
    poll: Poll,
    client_listener: TcpListener,
    peer_listener: TcpListener,
    signals: Signals,
    store: DiskStore,
    raft: Option<RaftState>,
    timers: TimerDriver,
    sessions: SessionTable,
    links: PeerLinks,
    /// Accepted client connections.
    clients: HashMap<Token, Connection>,
    /// Accepted inbound peer connections (receive-only).
    peer_in: HashMap<Token, Connection>,
    waiters: HashMap<LogIndex, Waiter>,
    next_token: usize,
    shutdown: bool,
}

impl<C: Clock> Server<C> {
    /// Builds the server: recovers durable state, binds listeners,
    /// registers everything with the poll.
    pub fn new(config: HaliteConfig, me: NodeId, clock: C) -> ServerResult<Self> {
        config.validate()?;
        let entry = config.node(me)?.clone();

        // Recover durable state.
        let store = DiskStore::open(
            config.node_data_dir(me),
            config.storage.segment_max_bytes,
        )?;
        let hard_state = store.load_hard_state()?;
        let snapshot = store.load_snapshot()?;
        let entries = store
            .log()
            .read_from(LogIndex::new(1))
            .collect::<Result<Vec<_>, _>>()?;
        let cluster = ClusterConfig::new(config.member_ids());
        let opts = RaftOptions {
            snapshot_threshold_bytes: config.storage.snapshot_threshold_bytes,
            ..RaftOptions::default()
        };
        let raft = RaftState::recover(
            me,
            cluster.clone(),
            opts,
            hard_state,
            snapshot.as_ref().map(|s| (s.last_applied, s.state.as_ref())),
            entries,
        )?;
        tracing::info!(
            node = %me,
            term = %raft.current_term(),
            log = %raft.last_log_index(),
            applied = %raft.last_applied(),
            "recovered durable state"
        );

        let poll = Poll::new()?;
        let mut client_listener =
            TcpListener::bind(entry.client_addr).map_err(|source| ServerError::BindFailed {
                addr: entry.client_addr,
                source,
            })?;
        let mut peer_listener =
            TcpListener::bind(entry.peer_addr).map_err(|source| ServerError::BindFailed {
                addr: entry.peer_addr,
                source,
            })?;
        poll.registry()
            .register(&mut client_listener, CLIENT_LISTENER, Interest::READABLE)?;
        poll.registry()
            .register(&mut peer_listener, PEER_LISTENER, Interest::READABLE)?;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        poll.registry()
            .register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)?;

        let timing = config.timing.to_params();
        let now = clock.now();
        let peers: Vec<(NodeId, SocketAddr, Token)> = cluster
            .peers(me)
            .enumerate()
            .map(|(i, peer)| {
                let addr = config
                    .node(peer)
                    .expect("cluster built from config")
                    .peer_addr;
                (peer, addr, Token(PEER_LINK_BASE + i))
            })
            .collect();
        let next_token = PEER_LINK_BASE + peers.len();
        let links = PeerLinks::new(peers, timing.heartbeat_interval, now);

        // Seed the election jitter from the node id so a cluster of
        // identically configured nodes still desynchronizes.
        let timers = TimerDriver::new(timing, u64::from(me.as_u32()).wrapping_mul(0x9e37_79b9) + 1);

        Ok(Self {
            sessions: SessionTable::new(config.session.mailbox_capacity),
            config,
            me,
            clock,
            poll,
            client_listener,
            peer_listener,
            signals,
            store,
            raft: Some(raft),
            timers,
            links,
            clients: HashMap::new(),
            peer_in: HashMap::new(),
            waiters: HashMap::new(),
            next_token,
            shutdown: false,
        })
    }

    fn raft(&self) -> &RaftState {
        self.raft.as_ref().expect("raft state present")
    }

    /// Runs the event loop until shutdown. Fatal errors end the process.
    pub fn run(&mut self) -> ServerResult<()> {
        tracing::info!(node = %self.me, "halite node running");
        let mut events = Events::with_capacity(256);
        let now = self.clock.now();
        let role = self.raft().role();
        self.timers.sync_role(role, now);

        while !self.shutdown {
            let now = self.clock.now();
            self.links.maybe_connect(self.poll.registry(), now);

            let timeout = self.poll_timeout(now);
            match self.poll.poll(&mut events, Some(timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let ready: Vec<(Token, bool, bool)> = events
                .iter()
                .map(|e| (e.token(), e.is_readable(), e.is_writable()))
                .collect();
            for (token, readable, writable) in ready {
                self.on_event(token, readable, writable)?;
            }

            let now = self.clock.now();
            for kind in self.timers.poll_expired(now) {
                self.step(|state| state.on_timeout(kind))?;
            }

            self.sweep_waiters(now);
            self.sweep_closed();
        }

        self.flush_and_close();
        tracing::info!(node = %self.me, "clean shutdown");
        Ok(())
    }

    fn poll_timeout(&self, now: Instant) -> Duration {
        let heartbeat = self.config.timing.to_params().heartbeat_interval;
        match self.timers.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(now).min(heartbeat),
            None => heartbeat,
        }
    }

    // ========================================================================
    // Event Dispatch
    // ========================================================================

    fn on_event(&mut self, token: Token, readable: bool, writable: bool) -> ServerResult<()> {
        match token {
            CLIENT_LISTENER => self.accept_clients(),
            PEER_LISTENER => self.accept_peers(),
            SIGNAL_TOKEN => {
                let signals: Vec<i32> = self.signals.pending().collect();
                if !signals.is_empty() {
                    tracing::info!(node = %self.me, ?signals, "shutdown signal received");
                    self.shutdown = true;
                }
                Ok(())
            }
            token if self.links.peer_for(token).is_some() => {
                let now = self.clock.now();
                self.links
                    .on_ready(self.poll.registry(), now, token, readable, writable);
                Ok(())
            }
            token if self.peer_in.contains_key(&token) => self.on_peer_readable(token),
            token if self.clients.contains_key(&token) => {
                if readable {
                    self.on_client_readable(token)?;
                }
                if writable {
                    if let Some(conn) = self.clients.get_mut(&token) {
                        conn.flush();
                    }
                    self.pump_notifications(token);
                    self.refresh_interest(token);
                }
                Ok(())
            }
            _ => Ok(()), // raced with a close
        }
    }

    fn accept_clients(&mut self) -> ServerResult<()> {
        loop {
            match self.client_listener.accept() {
                Ok((mut stream, addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    self.poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)?;
                    tracing::debug!(node = %self.me, %addr, token = token.0, "client connected");
                    self.clients.insert(token, Connection::new(token, stream));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "client accept failed");
                    return Ok(());
                }
            }
        }
    }

    fn accept_peers(&mut self) -> ServerResult<()> {
        loop {
            match self.peer_listener.accept() {
                Ok((mut stream, addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    self.poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)?;
                    tracing::debug!(node = %self.me, %addr, "peer connected");
                    self.peer_in.insert(token, Connection::new(token, stream));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "peer accept failed");
                    return Ok(());
                }
            }
        }
    }

    fn on_peer_readable(&mut self, token: Token) -> ServerResult<()> {
        let conn = self.peer_in.get_mut(&token).expect("peer conn exists");
        let messages = match conn.read_frames::<Message>() {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "malformed peer frame, dropping connection");
                conn.closed = true;
                return Ok(());
            }
        };
        for msg in messages {
            self.step(|state| state.on_message(msg))?;
        }
        Ok(())
    }

    fn on_client_readable(&mut self, token: Token) -> ServerResult<()> {
        let conn = self.clients.get_mut(&token).expect("client conn exists");
        let requests = match conn.read_frames::<Request>() {
            Ok(requests) => requests,
            Err(e) => {
                tracing::debug!(error = %e, token = token.0, "malformed client frame, closing");
                conn.closed = true;
                return Ok(());
            }
        };
        for request in requests {
            self.handle_request(token, request)?;
        }
        Ok(())
    }

    // ========================================================================
    // Client Requests
    // ========================================================================

    fn handle_request(&mut self, token: Token, request: Request) -> ServerResult<()> {
        let Request { id, payload } = request;
        let action = handler::route(payload, token, self.raft(), &self.sessions);
        match action {
            Action::Reply(payload) => {
                self.respond(token, Response::new(id, payload));
            }
            Action::Bind(name) => {
                if let Some(conn) = self.clients.get_mut(&token) {
                    conn.subscribed = false;
                }
                self.sessions.bind(token, &name);
                self.respond(token, Response::new(id, ResponsePayload::LoggedIn));
            }
            Action::Unbind => {
                self.sessions.unbind(token);
                if let Some(conn) = self.clients.get_mut(&token) {
                    conn.subscribed = false;
                }
                self.respond(token, Response::new(id, ResponsePayload::LoggedOut));
            }
            Action::Subscribe => {
                self.sessions.subscribe(token);
                if let Some(conn) = self.clients.get_mut(&token) {
                    conn.subscribed = true;
                }
                self.respond(token, Response::new(id, ResponsePayload::Subscribed));
            }
            Action::LeaderQuery => {
                let node = self.leader_client_addr();
                self.respond(token, Response::new(id, ResponsePayload::Leader { node }));
            }
            Action::Mutate(command) => return self.submit_mutation(token, id, command),
        }
        Ok(())
    }

    fn submit_mutation(
        &mut self,
        token: Token,
        id: RequestId,
        command: halite_kernel::Command,
    ) -> ServerResult<()> {
        if self.waiters.len() >= MAX_WAITERS {
            self.respond(
                token,
                Response::error(id, ErrorKind::Unavailable, "too many requests in flight"),
            );
            return Ok(());
        }

        let state = self.raft.take().expect("raft state present");
        let (state, submitted, output) = state.submit_command(&command);
        self.raft = Some(state);

        match submitted {
            Ok(index) => {
                self.waiters.insert(
                    index,
                    Waiter {
                        token,
                        request: id,
                        since: self.clock.now(),
                    },
                );
                self.run_raft_output(output)?;
            }
            Err(SubmitError::NotLeader { leader_hint }) => {
                let hint_addr = leader_hint.and_then(|h| self.client_addr_of(h));
                self.respond(
                    token,
                    Response {
                        id,
                        payload: ResponsePayload::Error(ErrorResponse {
                            code: ErrorKind::NotLeader,
                            message: "this node is not the leader".to_string(),
                            leader_hint: hint_addr,
                        }),
                    },
                );
            }
        }
        Ok(())
    }

    // ========================================================================
    // Consensus Stepping & Effects
    // ========================================================================

    fn step<F>(&mut self, f: F) -> ServerResult<()>
    where
        F: FnOnce(RaftState) -> (RaftState, RaftOutput),
    {
        let state = self.raft.take().expect("raft state present");
        let (state, output) = f(state);
        self.raft = Some(state);
        self.run_raft_output(output)
    }

    /// Executes one output: effects in order (durability is fatal on
    /// failure), then messages, then timers and waiter bookkeeping.
    fn run_raft_output(&mut self, output: RaftOutput) -> ServerResult<()> {
        for effect in output.effects {
            match effect {
                Effect::SaveHardState(hs) => self.store.save_hard_state(&hs)?,
                Effect::AppendLog(entries) => self.store.log_mut().append(&entries)?,
                Effect::TruncateLog { from } => self.store.log_mut().truncate_suffix(from)?,
                Effect::PersistSnapshot {
                    last_applied,
                    state,
                } => self.store.save_snapshot(&Snapshot {
                    last_applied,
                    state,
                })?,
                Effect::Respond { index, reply } => {
                    if let Some(waiter) = self.waiters.remove(&index) {
                        self.respond(
                            waiter.token,
                            Response::new(waiter.request, handler::reply_to_payload(reply)),
                        );
                    }
                }
                Effect::Chat(halite_kernel::Effect::NotifySubscribers { recipient, message }) => {
                    let tokens = self.sessions.notify(&recipient, &message);
                    for token in tokens {
                        self.pump_notifications(token);
                        self.refresh_interest(token);
                    }
                }
                Effect::Chat(halite_kernel::Effect::DropSubscriptions { name }) => {
                    for token in self.sessions.drop_account(&name) {
                        if let Some(conn) = self.clients.get_mut(&token) {
                            conn.subscribed = false;
                        }
                    }
                }
            }
        }

        let now = self.clock.now();
        for msg in &output.messages {
            self.links.send(self.poll.registry(), now, msg);
        }

        if output.election_reset {
            self.timers.reset_election(now);
        }
        let role = self.raft().role();
        self.timers.sync_role(role, now);

        // Leadership lost: every parked mutation ends with a redirect.
        if role != Role::Leader && !self.waiters.is_empty() {
            let hint = self.leader_client_addr().map(|(_, addr)| addr);
            let waiters: Vec<Waiter> = self.waiters.drain().map(|(_, w)| w).collect();
            for waiter in waiters {
                self.respond(
                    waiter.token,
                    Response {
                        id: waiter.request,
                        payload: ResponsePayload::Error(ErrorResponse {
                            code: ErrorKind::NotLeader,
                            message: "leadership lost while waiting for commit".to_string(),
                            leader_hint: hint,
                        }),
                    },
                );
            }
        }
        Ok(())
    }

    // ========================================================================
    // Responses & Notifications
    // ========================================================================

    fn respond(&mut self, token: Token, response: Response) {
        if let Some(conn) = self.clients.get_mut(&token) {
            if conn.queue(&response).is_err() {
                conn.closed = true;
            }
        }
        self.refresh_interest(token);
    }

    /// Moves queued notifications into the connection's write buffer,
    /// stopping at the high-water mark (the bounded mailbox absorbs the
    /// rest, dropping oldest if the client never catches up).
    fn pump_notifications(&mut self, token: Token) {
        let Some(conn) = self.clients.get_mut(&token) else {
            return;
        };
        if !conn.subscribed {
            return;
        }
        while conn.below_high_water() {
            let Some(message) = self.sessions.pop_notification(token) else {
                break;
            };
            if conn.queue(&Response::notification(message)).is_err() {
                conn.closed = true;
                break;
            }
        }
    }

    fn refresh_interest(&mut self, token: Token) {
        if let Some(conn) = self.clients.get_mut(&token) {
            if !conn.closed {
                let interests = conn.interests();
                let _ = self
                    .poll
                    .registry()
                    .reregister(&mut conn.stream, token, interests);
            }
        }
    }

    fn leader_client_addr(&self) -> Option<(NodeId, SocketAddr)> {
        let hint = self.raft().leader_hint()?;
        Some((hint, self.client_addr_of(hint)?))
    }

    fn client_addr_of(&self, id: NodeId) -> Option<SocketAddr> {
        self.config.node(id).ok().map(|n| n.client_addr)
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    fn sweep_waiters(&mut self, now: Instant) {
        let expired: Vec<LogIndex> = self
            .waiters
            .iter()
            .filter(|(_, w)| now.duration_since(w.since) > WAITER_TTL)
            .map(|(i, _)| *i)
            .collect();
        for index in expired {
            if let Some(waiter) = self.waiters.remove(&index) {
                self.respond(
                    waiter.token,
                    Response::error(
                        waiter.request,
                        ErrorKind::Timeout,
                        "deadline elapsed before commit; the command may still apply",
                    ),
                );
            }
        }
    }

    fn sweep_closed(&mut self) {
        let closed_clients: Vec<Token> = self
            .clients
            .iter()
            .filter(|(_, c)| c.closed)
            .map(|(t, _)| *t)
            .collect();
        for token in closed_clients {
            if let Some(mut conn) = self.clients.remove(&token) {
                let _ = self.poll.registry().deregister(&mut conn.stream);
            }
            self.sessions.disconnect(token);
            self.waiters.retain(|_, w| w.token != token);
            tracing::debug!(node = %self.me, token = token.0, "client disconnected");
        }

        let closed_peers: Vec<Token> = self
            .peer_in
            .iter()
            .filter(|(_, c)| c.closed)
            .map(|(t, _)| *t)
            .collect();
        for token in closed_peers {
            if let Some(mut conn) = self.peer_in.remove(&token) {
                let _ = self.poll.registry().deregister(&mut conn.stream);
            }
        }
    }

    /// Final flush: waiters answered, state checkpointed.
    fn flush_and_close(&mut self) {
        let waiters: Vec<Waiter> = self.waiters.drain().map(|(_, w)| w).collect();
        for waiter in waiters {
            self.respond(
                waiter.token,
                Response::error(waiter.request, ErrorKind::Unavailable, "node shutting down"),
            );
        }
        let raft = self.raft.as_ref().expect("raft state present");
        if let Err(e) = self.store.save_hard_state(&raft.hard_state()) {
            tracing::error!(error = %e, "failed to flush hard state at shutdown");
        }
        let snapshot = Snapshot {
            last_applied: raft.last_applied(),
            state: raft.chat().snapshot(),
        };
        if let Err(e) = self.store.save_snapshot(&snapshot) {
            tracing::error!(error = %e, "failed to checkpoint at shutdown");
        }
    }
}
