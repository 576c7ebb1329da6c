//! Outbound peer links.
//!
//! Each node keeps one outbound TCP connection per peer for sending
//! consensus messages; inbound peer connections only receive. A link
//! that fails reconnects with backoff capped at the heartbeat interval,
//! so a recovering peer is never more than one heartbeat away from
//! fresh traffic. Messages to a disconnected peer are dropped — the
//! consensus layer's heartbeat-driven retransmits are the retry path.

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use halite_raft::Message;
use halite_types::NodeId;
use halite_wire::encode_frame;

/// Initial reconnect delay; doubles up to the configured cap.
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug)]
enum LinkState {
    Disconnected { retry_at: Instant },
    Connecting,
    Connected,
}

/// One outbound link to a peer.
#[derive(Debug)]
pub struct PeerLink {
    pub peer: NodeId,
    pub addr: SocketAddr,
    pub token: Token,
    state: LinkState,
    stream: Option<TcpStream>,
    write_buf: BytesMut,
    backoff: Duration,
}

impl PeerLink {
    fn disconnect(&mut self, registry: &Registry, now: Instant, max_backoff: Duration) {
        if let Some(mut stream) = self.stream.take() {
            let _ = registry.deregister(&mut stream);
        }
        self.write_buf.clear();
        self.state = LinkState::Disconnected {
            retry_at: now + self.backoff,
        };
        self.backoff = (self.backoff * 2).min(max_backoff);
    }

    fn flush(&mut self) -> io::Result<()> {
        let stream = self.stream.as_mut().expect("flush requires a stream");
        while !self.write_buf.is_empty() {
            match stream.write(&self.write_buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// The full set of outbound links for this node.
#[derive(Debug)]
pub struct PeerLinks {
    links: HashMap<NodeId, PeerLink>,
    by_token: HashMap<Token, NodeId>,
    max_backoff: Duration,
}

impl PeerLinks {
    /// Creates links (initially disconnected, due immediately).
    pub fn new(peers: Vec<(NodeId, SocketAddr, Token)>, max_backoff: Duration, now: Instant) -> Self {
        let mut links = HashMap::new();
        let mut by_token = HashMap::new();
        for (peer, addr, token) in peers {
            by_token.insert(token, peer);
            links.insert(
                peer,
                PeerLink {
                    peer,
                    addr,
                    token,
                    state: LinkState::Disconnected { retry_at: now },
                    stream: None,
                    write_buf: BytesMut::new(),
                    backoff: INITIAL_BACKOFF,
                },
            );
        }
        Self {
            links,
            by_token,
            max_backoff,
        }
    }

    /// The peer a poll token belongs to, if it is an outbound link.
    pub fn peer_for(&self, token: Token) -> Option<NodeId> {
        self.by_token.get(&token).copied()
    }

    /// Starts connection attempts for every link whose retry time has
    /// come.
    pub fn maybe_connect(&mut self, registry: &Registry, now: Instant) {
        for link in self.links.values_mut() {
            let LinkState::Disconnected { retry_at } = link.state else {
                continue;
            };
            if now < retry_at {
                continue;
            }
            match TcpStream::connect(link.addr) {
                Ok(mut stream) => {
                    if registry
                        .register(
                            &mut stream,
                            link.token,
                            Interest::READABLE | Interest::WRITABLE,
                        )
                        .is_ok()
                    {
                        link.stream = Some(stream);
                        link.state = LinkState::Connecting;
                    } else {
                        link.state = LinkState::Disconnected {
                            retry_at: now + link.backoff,
                        };
                    }
                }
                Err(e) => {
                    tracing::debug!(peer = %link.peer, error = %e, "peer connect failed");
                    link.state = LinkState::Disconnected {
                        retry_at: now + link.backoff,
                    };
                    link.backoff = (link.backoff * 2).min(self.max_backoff);
                }
            }
        }
    }

    /// Queues a consensus message to its target, dropping it if the
    /// link is down (retransmits are the consensus layer's job).
    pub fn send(&mut self, registry: &Registry, now: Instant, msg: &Message) {
        let max_backoff = self.max_backoff;
        let Some(link) = self.links.get_mut(&msg.to) else {
            tracing::warn!(to = %msg.to, "message addressed to unknown peer");
            return;
        };
        match link.state {
            LinkState::Disconnected { .. } => {}
            LinkState::Connecting | LinkState::Connected => {
                if encode_frame(msg, &mut link.write_buf).is_err() {
                    return;
                }
                if matches!(link.state, LinkState::Connected) && link.flush().is_err() {
                    tracing::debug!(peer = %link.peer, "peer link write failed, reconnecting");
                    link.disconnect(registry, now, max_backoff);
                }
            }
        }
    }

    /// Handles poll readiness for an outbound link.
    ///
    /// Writable on a connecting link means the connect resolved (check
    /// the error state); readable with EOF means the peer went away.
    pub fn on_ready(
        &mut self,
        registry: &Registry,
        now: Instant,
        token: Token,
        readable: bool,
        writable: bool,
    ) {
        let max_backoff = self.max_backoff;
        let Some(peer) = self.by_token.get(&token).copied() else {
            return;
        };
        let link = self.links.get_mut(&peer).expect("token maps to a link");

        if writable {
            if matches!(link.state, LinkState::Connecting) {
                let connected = link
                    .stream
                    .as_ref()
                    .and_then(|s| s.take_error().ok())
                    .map_or(false, |e| e.is_none());
                if connected {
                    tracing::debug!(peer = %link.peer, addr = %link.addr, "peer link up");
                    link.state = LinkState::Connected;
                    link.backoff = INITIAL_BACKOFF;
                } else {
                    link.disconnect(registry, now, max_backoff);
                    return;
                }
            }
            if matches!(link.state, LinkState::Connected) && link.flush().is_err() {
                link.disconnect(registry, now, max_backoff);
                return;
            }
        }

        if readable {
            // Outbound links carry no inbound payload; readable data or
            // EOF both mean the other side closed on us.
            if let Some(stream) = link.stream.as_mut() {
                let mut probe = [0u8; 64];
                match io::Read::read(stream, &mut probe) {
                    Ok(0) => link.disconnect(registry, now, max_backoff),
                    Ok(_) => {} // stray bytes: ignore
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(_) => link.disconnect(registry, now, max_backoff),
                }
            }
        }
    }
}
