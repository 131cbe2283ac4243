//! File server: one listening socket, one task per connection.
//!
//! ```text
//!   listener (bind addr)                 per-connection task
//!   ────────────────────                 ─────────────────────────────────
//!   SETUP_REQUEST from P ──spawn──▶  bind new socket (port 0)
//!                                    handshake::respond  ─▶  Sender::run
//!   SETUP_REQUEST from P again ─▶ dropped while P's task is alive
//! ```
//!
//! Each task owns its socket, window and file; nothing is shared between
//! tasks except the read-only [`ServerConfig`].

use std::collections::HashMap;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::TransferError;
use crate::handshake::{self, Responder, Response};
use crate::packet::{Flag, Packet};
use crate::sender::Sender;
use crate::simulator::Simulator;
use crate::socket::Socket;

/// How a single connection ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The whole file was acknowledged.
    Sent { packets: u32, bytes: u64 },
    /// The requested file could not be opened.
    Rejected { code: i32 },
}

pub struct Server {
    listener: Socket,
    config: Arc<ServerConfig>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, TransferError> {
        // The listener never sends, so faults are applied per connection.
        let listener = Socket::bind(config.bind, Simulator::transparent()).await?;
        log::info!("[server] listening on {}", listener.local_addr);
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr
    }

    /// Accept connections until an I/O error on the listening socket.
    pub async fn run(self) -> Result<(), TransferError> {
        let mut live: HashMap<SocketAddr, JoinHandle<()>> = HashMap::new();
        let mut accepted: u64 = 0;

        loop {
            let (packet, peer) = self.listener.recv_from().await?;
            let Some(setup) = packet else {
                log::debug!("[server] corrupt datagram from {peer}");
                continue;
            };
            if setup.flag() != Flag::SetupRequest {
                log::debug!("[server] ignoring {} from {peer} on listener", setup.flag());
                continue;
            }

            live.retain(|_, task| !task.is_finished());
            if live.contains_key(&peer) {
                log::debug!("[server] {peer} already has a live connection");
                continue;
            }

            accepted += 1;
            let id = accepted;
            let config = Arc::clone(&self.config);
            let task = tokio::spawn(async move {
                match serve_connection(setup, peer, &config, id).await {
                    Ok(ConnectionOutcome::Sent { packets, bytes }) => log::info!(
                        "[server #{id}] sent {bytes} bytes in {packets} packets to {peer}"
                    ),
                    Ok(ConnectionOutcome::Rejected { code }) => {
                        log::info!("[server #{id}] {peer} rejected with errno {code}")
                    }
                    Err(e @ TransferError::FinalAckLost { .. }) => log::warn!(
                        "[server #{id}] {peer}: {e}; the receiver has probably finished"
                    ),
                    Err(e) => log::error!("[server #{id}] connection with {peer} failed: {e}"),
                }
            });
            live.insert(peer, task);
        }
    }
}

/// Run one connection from its SETUP_REQUEST to completion.
///
/// `id` distinguishes connections in logs and in the simulator seed.
pub async fn serve_connection(
    setup: Packet,
    peer: SocketAddr,
    config: &ServerConfig,
    id: u64,
) -> Result<ConnectionOutcome, TransferError> {
    let responder = Responder::from_setup(&setup, &config.root)?;
    let params = responder.params();

    let local = SocketAddr::new(config.bind.ip(), 0);
    let socket = Socket::bind(local, config.simulator(id)).await?;
    let conn = Connection::new(socket, peer);
    log::info!(
        "[server #{id}] {peer} → {} window={} chunk={}",
        conn.local_addr(),
        params.window_size,
        params.chunk_size
    );

    match handshake::respond(&conn, responder, &config.timers).await? {
        Response::Rejected { code } => Ok(ConnectionOutcome::Rejected { code }),
        Response::Established {
            file,
            window,
            params,
        } => {
            let sender = Sender::new(BufReader::new(file), window, params.chunk_size);
            let summary = sender.run(&conn, &config.timers).await?;
            Ok(ConnectionOutcome::Sent {
                packets: summary.packets,
                bytes: summary.bytes,
            })
        }
    }
}
