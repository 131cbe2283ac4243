//! Validated client and server configuration.
//!
//! Both configs are plain structs filled in by `main.rs` from the command
//! line (or directly by tests).  [`ClientConfig::validate`] and
//! [`ServerConfig::validate`] reject bad values before any socket is opened.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::connection::SessionParams;
use crate::packet::MAX_PAYLOAD;
use crate::simulator::{Simulator, SimulatorConfig};
use crate::timer::TimerConfig;
use crate::window::MAX_WINDOW;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("window size must be between 1 and {max}, got {got}", max = MAX_WINDOW)]
    WindowSize { got: u32 },

    #[error("chunk size must be between 1 and {max}, got {got}", max = MAX_PAYLOAD)]
    ChunkSize { got: usize },

    #[error("error rate must be in [0, 1), got {0}")]
    ErrorRate(f64),

    #[error("remote file name must be 1 to {max} bytes", max = MAX_PAYLOAD - 1)]
    RemoteFileName,
}

/// Everything `rcopy` needs for one download.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Created (truncated) before the handshake; removed again on failure.
    pub local_file: PathBuf,
    pub remote_file: String,
    pub window_size: u32,
    pub chunk_size: usize,
    /// Probability of dropping, and independently of corrupting, each
    /// outgoing datagram.
    pub error_rate: f64,
    pub remote: SocketAddr,
    pub timers: TimerConfig,
    /// Fixed seed for the fault simulator.
    pub seed: Option<u64>,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_WINDOW).contains(&self.window_size) {
            return Err(ConfigError::WindowSize {
                got: self.window_size,
            });
        }
        if !(1..=MAX_PAYLOAD).contains(&self.chunk_size) {
            return Err(ConfigError::ChunkSize {
                got: self.chunk_size,
            });
        }
        // The name and its NUL terminator must fit in one payload.
        if self.remote_file.is_empty()
            || self.remote_file.len() >= MAX_PAYLOAD
            || self.remote_file.contains('\0')
        {
            return Err(ConfigError::RemoteFileName);
        }
        check_rate(self.error_rate)
    }

    pub fn params(&self) -> SessionParams {
        SessionParams {
            window_size: self.window_size,
            chunk_size: self.chunk_size,
        }
    }

    pub fn simulator(&self) -> Simulator {
        simulator(self.error_rate, self.seed)
    }
}

/// Everything the server needs to accept connections.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub error_rate: f64,
    /// Directory requested names are resolved against.
    pub root: PathBuf,
    pub timers: TimerConfig,
    pub seed: Option<u64>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_rate(self.error_rate)
    }

    /// A fresh simulator for one socket.  Seeded configs derive a distinct
    /// seed per connection so concurrent sessions do not share a fault
    /// pattern.
    pub fn simulator(&self, connection: u64) -> Simulator {
        simulator(
            self.error_rate,
            self.seed.map(|s| s.wrapping_add(connection)),
        )
    }
}

fn check_rate(rate: f64) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&rate) {
        Ok(())
    } else {
        Err(ConfigError::ErrorRate(rate))
    }
}

fn simulator(rate: f64, seed: Option<u64>) -> Simulator {
    let mut config = SimulatorConfig::uniform(rate);
    config.seed = seed;
    Simulator::new(config)
}

/// `clap` value parser for the command-line error rate, which must lie
/// strictly between 0 and 1.
pub fn parse_error_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{s:?} is not a number: {e}"))?;
    if rate > 0.0 && rate < 1.0 {
        Ok(rate)
    } else {
        Err(format!("error rate must be strictly between 0 and 1, got {rate}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientConfig {
        ClientConfig {
            local_file: "out.bin".into(),
            remote_file: "in.bin".into(),
            window_size: 8,
            chunk_size: 1000,
            error_rate: 0.0,
            remote: "127.0.0.1:9000".parse().unwrap(),
            timers: TimerConfig::default(),
            seed: None,
        }
    }

    #[test]
    fn valid_client_passes() {
        assert_eq!(client().validate(), Ok(()));
        assert_eq!(
            client().params(),
            SessionParams {
                window_size: 8,
                chunk_size: 1000
            }
        );
    }

    #[test]
    fn window_and_chunk_bounds() {
        let mut c = client();
        c.window_size = 0;
        assert_eq!(c.validate(), Err(ConfigError::WindowSize { got: 0 }));
        c.window_size = MAX_WINDOW + 1;
        assert!(matches!(c.validate(), Err(ConfigError::WindowSize { .. })));

        let mut c = client();
        c.chunk_size = 1401;
        assert_eq!(c.validate(), Err(ConfigError::ChunkSize { got: 1401 }));
        c.chunk_size = 1400;
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn remote_name_must_fit() {
        let mut c = client();
        c.remote_file = String::new();
        assert_eq!(c.validate(), Err(ConfigError::RemoteFileName));
        c.remote_file = "x".repeat(MAX_PAYLOAD);
        assert_eq!(c.validate(), Err(ConfigError::RemoteFileName));
        c.remote_file = "x".repeat(MAX_PAYLOAD - 1);
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn library_accepts_zero_rate_but_not_one() {
        let mut c = client();
        c.error_rate = 1.0;
        assert_eq!(c.validate(), Err(ConfigError::ErrorRate(1.0)));
        c.error_rate = -0.1;
        assert!(c.validate().is_err());
    }

    #[test]
    fn cli_rate_is_open_interval() {
        assert_eq!(parse_error_rate("0.25"), Ok(0.25));
        assert!(parse_error_rate("0").is_err());
        assert!(parse_error_rate("1").is_err());
        assert!(parse_error_rate("abc").is_err());
    }

    #[test]
    fn server_seed_differs_per_connection() {
        let server = ServerConfig {
            bind: "0.0.0.0:0".parse().unwrap(),
            error_rate: 0.5,
            root: ".".into(),
            timers: TimerConfig::default(),
            seed: Some(10),
        };
        assert_eq!(server.simulator(3).config().seed, Some(13));
        assert_eq!(server.simulator(4).config().seed, Some(14));
    }
}
