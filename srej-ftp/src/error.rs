//! Connection-level error kinds.
//!
//! Transport anomalies (loss, corruption, reordering, duplication) never
//! reach this type: the engines recover from them internally.  Everything
//! here terminates the connection.

use std::path::PathBuf;

use thiserror::Error;

use crate::packet::Flag;

#[derive(Error, Debug)]
pub enum TransferError {
    /// A bounded wait ran out of tries; the peer is presumed gone.
    #[error("no response from peer while {stage}; retries exhausted")]
    RetriesExhausted { stage: &'static str },

    /// The responder could not open the requested file.
    #[error("remote file error: {}", os_error(.code))]
    RemoteFile { code: i32 },

    /// A flag arrived that is not valid at this handshake stage.
    #[error("protocol violation while {stage}: unexpected {flag} packet")]
    ProtocolViolation { stage: &'static str, flag: Flag },

    /// The peer requested parameters this side refuses to honour.
    #[error("invalid session parameters: window {window_size}, chunk {chunk_size}")]
    BadParameters { window_size: i32, chunk_size: i32 },

    #[error("cannot allocate a window of {slots} slots")]
    WindowAlloc { slots: u32 },

    #[error("cannot open output file {}: {source}", .path.display())]
    OutputFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// FINAL_DATA went out but its acknowledgment never came back.  The
    /// receiver stops as soon as it writes FINAL_DATA, so this usually means
    /// only the last RR was lost.
    #[error("FINAL_DATA sent but never acknowledged ({packets} packets, {bytes} bytes)")]
    FinalAckLost { packets: u32, bytes: u64 },

    /// The receiver's idle timer expired before a single byte arrived.
    #[error("timed out waiting for data; nothing was received")]
    IdleTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn os_error(code: &i32) -> std::io::Error {
    std::io::Error::from_raw_os_error(*code)
}
