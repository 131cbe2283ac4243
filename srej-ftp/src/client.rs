//! `rcopy`: download one file from a server.

use std::fs::File;
use std::io::BufWriter;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::TransferError;
use crate::handshake;
use crate::receiver::{Receiver, TransferSummary};
use crate::socket::Socket;
use crate::window::Window;

/// Fetch `config.remote_file` into `config.local_file`.
///
/// The output file is created before any network activity and removed if
/// the transfer fails, so a partial download is never left behind.
pub async fn run(config: &ClientConfig) -> Result<TransferSummary, TransferError> {
    let output = File::create(&config.local_file).map_err(|source| TransferError::OutputFile {
        path: config.local_file.clone(),
        source,
    })?;

    let result = download(config, output).await;
    if result.is_err() {
        if let Err(e) = std::fs::remove_file(&config.local_file) {
            log::warn!("[client] cannot remove {}: {e}", config.local_file.display());
        }
    }
    result
}

async fn download(config: &ClientConfig, output: File) -> Result<TransferSummary, TransferError> {
    let window = Window::new(config.window_size)?;

    let local = if config.remote.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };
    let socket = Socket::bind(local, config.simulator()).await?;
    let mut conn = Connection::new(socket, config.remote);
    log::debug!("[client] bound {} → {}", conn.local_addr(), config.remote);

    let (control, first) =
        handshake::initiate(&mut conn, config.params(), &config.remote_file, &config.timers)
            .await?;

    let receiver = Receiver::new(BufWriter::new(output), window, control);
    receiver.run(&conn, &config.timers, first).await
}
