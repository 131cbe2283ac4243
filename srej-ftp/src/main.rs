//! Entry point for `srej-ftp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **rcopy**
//! mode.  All protocol work is delegated to the library; `main.rs` owns only
//! process setup (logging, argument parsing, name resolution).

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use srej_ftp::config::{parse_error_rate, ClientConfig, ServerConfig};
use srej_ftp::server::Server;
use srej_ftp::timer::TimerConfig;

/// Selective-repeat file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve files to rcopy clients.
    Server {
        /// Probability (0..1) of dropping, and of corrupting, each sent datagram.
        #[arg(value_parser = parse_error_rate)]
        error_rate: f64,
        /// UDP port to listen on; 0 lets the OS choose.
        #[arg(default_value_t = 0)]
        port: u16,
        /// Directory requested file names are resolved against.
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Seed the fault simulator for reproducible runs.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Download a file from a server.
    Rcopy {
        local_file: PathBuf,
        remote_file: String,
        window_size: u32,
        /// Payload bytes per data packet (at most 1400).
        chunk_size: usize,
        #[arg(value_parser = parse_error_rate)]
        error_rate: f64,
        remote_host: String,
        remote_port: u16,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            error_rate,
            port,
            root,
            seed,
        } => {
            let config = ServerConfig {
                bind: SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
                error_rate,
                root,
                timers: TimerConfig::default(),
                seed,
            };
            config.validate()?;
            // Dual-stack first; hosts without IPv6 fall back to IPv4 only.
            let server = match Server::bind(config.clone()).await {
                Ok(server) => server,
                Err(e) => {
                    log::warn!("cannot bind {}: {e}; falling back to IPv4", config.bind);
                    let config = ServerConfig {
                        bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
                        ..config
                    };
                    Server::bind(config).await.context("cannot bind server socket")?
                }
            };
            println!("Server is using port {}", server.local_addr().port());
            server.run().await?;
        }
        Mode::Rcopy {
            local_file,
            remote_file,
            window_size,
            chunk_size,
            error_rate,
            remote_host,
            remote_port,
            seed,
        } => {
            let remote = tokio::net::lookup_host((remote_host.as_str(), remote_port))
                .await
                .with_context(|| format!("cannot resolve {remote_host}"))?
                .next()
                .with_context(|| format!("{remote_host} has no addresses"))?;

            let config = ClientConfig {
                local_file,
                remote_file,
                window_size,
                chunk_size,
                error_rate,
                remote,
                timers: TimerConfig::default(),
                seed,
            };
            config.validate()?;

            let summary = srej_ftp::client::run(&config)
                .await
                .with_context(|| format!("transfer of {:?} failed", config.remote_file))?;
            if !summary.completed {
                log::warn!(
                    "sender went quiet before FINAL_DATA arrived; \
                     assuming {} bytes is the whole file",
                    summary.bytes_written
                );
            } else {
                log::info!(
                    "received {} bytes in {} packets",
                    summary.bytes_written,
                    summary.packets_delivered
                );
            }
        }
    }
    Ok(())
}
