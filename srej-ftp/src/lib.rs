//! `srej-ftp` is a selective-repeat file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!   rcopy (client)                                   server
//!  ┌──────────────────┐                        ┌──────────────────────┐
//!  │ handshake        │ ── SETUP / FILENAME ─▶ │ dispatcher           │
//!  │   ::initiate     │ ◀─ SETUP_ACK ───────── │  └─ task per peer    │
//!  ├──────────────────┤                        │     handshake        │
//!  │ Receiver         │ ◀─ DATA / FINAL ────── │       ::respond      │
//!  │ (RR, SREJ)       │ ── RR / SREJ ────────▶ │     Sender           │
//!  └───────┬──────────┘                        └───────┬──────────────┘
//!          │ Window (ring of slots)                    │ Window
//!  ┌───────▼──────────────────────────────────────────▼──────────────┐
//!  │ Connection ─ Socket ─ Simulator ─ tokio UdpSocket               │
//!  └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      9-byte header, checksum, payload codecs
//! - [`window`]      sequence-indexed ring buffer with SREJ markers
//! - [`state`]       state enums, events and the `Step` result type
//! - [`handshake`]   initiator and responder setup machines
//! - [`sender`]      windowed, pipelined send engine
//! - [`receiver`]    reassembly, RR and SREJ generation
//! - [`connection`]  per-session socket, peer and control counter
//! - [`socket`]      async UDP socket speaking [`packet::Packet`]
//! - [`simulator`]   loss and corruption injection
//! - [`timer`]       timeouts and retry budgets
//! - [`config`]      validated client and server settings
//! - [`error`]       connection-fatal error kinds
//! - [`client`] / [`server`] role drivers

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod window;
