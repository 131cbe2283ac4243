//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Packet`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O and the outgoing fault model.
//!
//! Receive methods return `Option<Packet>`: a datagram that fails to decode
//! is reported as `None` together with its source, so the caller can treat it
//! exactly like a lost packet.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::packet::{Packet, MAX_DATAGRAM};
use crate::simulator::Simulator;

/// An async, packet-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared if needed.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    simulator: Simulator,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port. An IPv6 address
    /// yields a dual-stack socket, so `[::]` also accepts IPv4 peers (seen as
    /// IPv4-mapped addresses).
    pub async fn bind(local_addr: SocketAddr, simulator: Simulator) -> io::Result<Self> {
        let inner = UdpSocket::from_std(bind_std(local_addr)?)?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            simulator,
        })
    }

    /// Encode `packet` and send it to `dest` through the simulator.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> io::Result<()> {
        for datagram in self.simulator.transmit(packet.encode()) {
            self.inner.send_to(&datagram, dest).await?;
        }
        Ok(())
    }

    /// Receive the next datagram and try to decode it.
    pub async fn recv_from(&self) -> io::Result<(Option<Packet>, SocketAddr)> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.inner.recv_from(&mut buf).await {
                Ok((n, addr)) => return Ok((Packet::verify_and_unwrap(&buf[..n]), addr)),
                Err(e) if is_transient(&e) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Non-blocking receive: `Ok(None)` when nothing is queued right now.
    pub fn try_recv_from(&self) -> io::Result<Option<(Option<Packet>, SocketAddr)>> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.inner.try_recv_from(&mut buf) {
                Ok((n, addr)) => return Ok(Some((Packet::verify_and_unwrap(&buf[..n]), addr))),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if is_transient(&e) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

fn bind_std(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    use socket2::{Domain, Protocol, Type};

    let socket =
        socket2::Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// ICMP-driven errors some platforms report on unconnected UDP sockets.
/// They say nothing about the next datagram, so they count as loss.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}
