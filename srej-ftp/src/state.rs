//! Finite-state-machine types shared by every role.
//!
//! Each role is an explicit state enum plus one transition function,
//! `step(state, event) -> Step`, implemented in its own module.  A step never
//! touches the network: it returns the next state and the packets the driver
//! must send.  The drivers perform the waits that turn socket activity into
//! [`Event`]s, which keeps every transition unit-testable with synthetic
//! events.
//!
//! ```text
//!  Initiator:  SendSetup ─▶ WaitSetupAck ─▶ SendFilename ─▶ WaitFilenameResponse
//!                 ▲  timeout/corrupt │         ▲  timeout/corrupt │
//!                 └──────────────────┘         └──────────────────┤
//!                                                DATA ─▶ DataPhase │ FILENAME_ERROR ─▶ Aborted
//!
//!  Responder:  SendSetupAck ─▶ WaitFilename ─▶ Established
//!                                   │ open failed
//!                                   ▼
//!              SendFilenameError ⇄ WaitEndConnection ─END─▶ Rejected
//!
//!  Sender:     Prepare ⇄ Send ─▶ CheckForAck (poll) ─▶ Prepare
//!                          └───▶ WaitForAck (block) ─RR past last─▶ Done
//!
//!  Receiver:   WaitOnData ─FINAL flushed / idle─▶ Done
//! ```

use crate::packet::Packet;

/// What a driver observed before calling `step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// No wait was needed; the state acts on its own.
    Proceed,
    /// A datagram arrived.  `None` when it failed its checksum.
    Arrived(Option<Packet>),
    /// The wait (or non-blocking poll) came back empty.
    Quiet,
}

/// Result of one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<S> {
    pub next: S,
    /// Packets to send, in order, before entering `next`.
    pub outgoing: Vec<Packet>,
}

impl<S> Step<S> {
    pub fn to(next: S) -> Self {
        Self {
            next,
            outgoing: Vec::new(),
        }
    }

    pub fn send(next: S, packet: Packet) -> Self {
        Self {
            next,
            outgoing: vec![packet],
        }
    }

    pub fn with(next: S, outgoing: Vec<Packet>) -> Self {
        Self { next, outgoing }
    }
}

/// Client side of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiatorState {
    SendSetup,
    WaitSetupAck,
    SendFilename,
    WaitFilenameResponse,
    /// The first data packet arrived; it is the filename's acceptance.
    DataPhase(Packet),
    /// The responder reported an OS error opening the file.
    Aborted { code: i32 },
}

/// Server side of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    SendSetupAck,
    WaitFilename,
    SendFilenameError { code: i32 },
    WaitEndConnection { code: i32 },
    /// File is open; data flow starts.
    Established,
    /// The initiator acknowledged the filename error.
    Rejected { code: i32 },
}

/// Server-side data engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Prepare,
    Send,
    /// Zero-timeout poll for RR/SREJ between sends.
    CheckForAck,
    /// Blocking wait for RR/SREJ; a timeout resends the lowest unacked chunk.
    WaitForAck,
    Done,
}

/// Client-side data engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    WaitOnData,
    /// `completed` is false when the idle timer, not FINAL_DATA, ended the
    /// transfer.
    Done { completed: bool },
}

impl std::fmt::Display for SenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
