//! Per-connection context.
//!
//! A [`Connection`] owns the transport side of one session: its socket and
//! the peer address.  Together with the negotiated [`SessionParams`], the
//! [`ControlSeq`] counter and the engine that holds the file and the
//! [`crate::window::Window`], it forms the complete state of one
//! connection.  Nothing here is shared across connections.
//!
//! The engines above this module only use four primitives: [`Connection::send`],
//! [`Connection::wait`] (blocking with a timeout), [`Connection::poll`]
//! (never blocks) and, during the handshake, [`Connection::wait_any`].

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use crate::packet::{Flag, Packet, SetupRequest, MAX_PAYLOAD};
use crate::socket::Socket;
use crate::window::MAX_WINDOW;

/// Window and chunk size agreed during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub window_size: u32,
    pub chunk_size: usize,
}

impl SessionParams {
    /// Accept a peer's request if both values are within protocol limits.
    pub fn from_request(req: SetupRequest) -> Option<Self> {
        let window_size = u32::try_from(req.window_size).ok()?;
        let chunk_size = usize::try_from(req.chunk_size).ok()?;
        let params = Self {
            window_size,
            chunk_size,
        };
        params.is_valid().then_some(params)
    }

    pub fn to_request(self) -> SetupRequest {
        SetupRequest {
            window_size: self.window_size as i32,
            chunk_size: self.chunk_size as i32,
        }
    }

    pub fn is_valid(&self) -> bool {
        (1..=MAX_WINDOW).contains(&self.window_size) && (1..=MAX_PAYLOAD).contains(&self.chunk_size)
    }
}

/// Counter tagging handshake and acknowledgment packets.
///
/// Distinct from the data sequence, which numbers file chunks from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlSeq(u32);

impl ControlSeq {
    /// Return the current value and advance.
    pub fn next(&mut self) -> u32 {
        let seq = self.0;
        self.0 = self.0.wrapping_add(1);
        seq
    }

    /// Build a control packet tagged with the next control sequence.
    pub fn packet(&mut self, flag: Flag, payload: Vec<u8>) -> Packet {
        Packet::new(self.next(), flag, payload)
    }
}

/// One received datagram.  `packet` is `None` when it failed to decode.
#[derive(Debug)]
pub struct Inbound {
    pub packet: Option<Packet>,
    pub from: SocketAddr,
}

/// Socket plus peer address for a single session.
#[derive(Debug)]
pub struct Connection {
    socket: Socket,
    /// Remote peer.  The initiator replaces it with the responder's
    /// per-connection address once SETUP_ACK arrives.
    pub peer: SocketAddr,
}

impl Connection {
    pub fn new(socket: Socket, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Serialise `packet` (checksum included) and send it to the peer.
    pub async fn send(&self, packet: &Packet) -> io::Result<()> {
        log::debug!(
            "[conn {}] → {} seq={} len={}",
            self.local_addr(),
            packet.flag(),
            packet.seq(),
            packet.payload.len()
        );
        self.socket.send_to(packet, self.peer).await
    }

    /// Wait up to `limit` for a datagram from the peer.
    ///
    /// Datagrams from any other address are discarded without extending
    /// the deadline.  `Ok(None)` means the wait timed out.
    pub async fn wait(&self, limit: Duration) -> io::Result<Option<Inbound>> {
        self.wait_filtered(limit, true).await
    }

    /// Like [`wait`](Self::wait) but accepts a datagram from any address.
    pub async fn wait_any(&self, limit: Duration) -> io::Result<Option<Inbound>> {
        self.wait_filtered(limit, false).await
    }

    async fn wait_filtered(&self, limit: Duration, peer_only: bool) -> io::Result<Option<Inbound>> {
        let deadline = Instant::now() + limit;
        loop {
            let Ok(result) = timeout_at(deadline, self.socket.recv_from()).await else {
                return Ok(None);
            };
            let (packet, from) = result?;
            if peer_only && from != self.peer {
                log::debug!("[conn {}] ignoring datagram from {from}", self.local_addr());
                continue;
            }
            self.log_inbound(&packet, from);
            return Ok(Some(Inbound { packet, from }));
        }
    }

    /// Non-blocking check for a datagram from the peer.
    pub fn poll(&self) -> io::Result<Option<Inbound>> {
        while let Some((packet, from)) = self.socket.try_recv_from()? {
            if from != self.peer {
                continue;
            }
            self.log_inbound(&packet, from);
            return Ok(Some(Inbound { packet, from }));
        }
        Ok(None)
    }

    fn log_inbound(&self, packet: &Option<Packet>, from: SocketAddr) {
        match packet {
            Some(p) => log::debug!(
                "[conn {}] ← {} seq={} len={} from {from}",
                self.local_addr(),
                p.flag(),
                p.seq(),
                p.payload.len()
            ),
            None => log::debug!("[conn {}] ← corrupt datagram from {from}", self.local_addr()),
        }
    }
}
