//! Connection setup for both roles.
//!
//! The exchange negotiates window and chunk size, then names the file:
//!
//! ```text
//!   Initiator                                   Responder
//!       │ ── SETUP_REQUEST {window, chunk} ──────────▶ │  allocate window
//!       │ ◀───────────────────────────── SETUP_ACK ─── │  (per-connection port)
//!       │ ── FILENAME_REQUEST "name\0" ──────────────▶ │  open file
//!       │ ◀──────────────────────────── DATA seq=0 ─── │  success: data flows
//!       │           or                                 │
//!       │ ◀─────────────────── FILENAME_ERROR errno ─── │  open failed
//!       │ ── END_CONNECTION ─────────────────────────▶ │
//! ```
//!
//! There is no explicit "filename accepted" message: the first data packet
//! is the acceptance, and the initiator hands it to the receiver engine.
//!
//! Each side is a pure transition function ([`Initiator::step`],
//! [`Responder::step`]) plus an async driver ([`initiate`], [`respond`]) that
//! turns socket waits into [`Event`]s and enforces the retry budgets.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::connection::{Connection, ControlSeq, SessionParams};
use crate::error::TransferError;
use crate::packet::{
    decode_error_code, decode_filename, encode_error_code, encode_filename, Flag, Packet,
    SetupRequest,
};
use crate::state::{Event, InitiatorState, ResponderState, Step};
use crate::timer::{RetryBudget, TimerConfig};
use crate::window::Window;

/// Reported when the responder cannot tell why an open failed.
const EIO: i32 = 5;
const EACCES: i32 = 13;
const ENOENT: i32 = 2;

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

/// Client half of the handshake.
#[derive(Debug)]
pub struct Initiator {
    params: SessionParams,
    remote_file: String,
    control: ControlSeq,
}

impl Initiator {
    pub fn new(params: SessionParams, remote_file: impl Into<String>) -> Self {
        Self {
            params,
            remote_file: remote_file.into(),
            control: ControlSeq::default(),
        }
    }

    /// The control counter, to be continued by the receiver engine.
    pub fn control(&self) -> ControlSeq {
        self.control
    }

    pub fn step(
        &mut self,
        state: InitiatorState,
        event: Event,
    ) -> Result<Step<InitiatorState>, TransferError> {
        use InitiatorState::*;

        Ok(match (state, event) {
            (SendSetup, _) => {
                let payload = self.params.to_request().encode();
                Step::send(WaitSetupAck, self.control.packet(Flag::SetupRequest, payload))
            }
            (WaitSetupAck, Event::Arrived(Some(packet))) => match packet.flag() {
                Flag::SetupAck => Step::to(SendFilename),
                flag => {
                    return Err(TransferError::ProtocolViolation {
                        stage: "waiting for setup acknowledgment",
                        flag,
                    })
                }
            },
            (WaitSetupAck, Event::Proceed) => Step::to(WaitSetupAck),
            // Timeout or corrupt reply: ask again.
            (WaitSetupAck, _) => Step::to(SendSetup),

            (SendFilename, _) => {
                let payload = encode_filename(&self.remote_file);
                Step::send(
                    WaitFilenameResponse,
                    self.control.packet(Flag::FilenameRequest, payload),
                )
            }
            (WaitFilenameResponse, Event::Arrived(Some(packet))) => match packet.flag() {
                flag if flag.is_data() => Step::to(DataPhase(packet)),
                Flag::FilenameError => {
                    let code = decode_error_code(&packet.payload).unwrap_or(EIO);
                    let end = self.control.packet(Flag::EndConnection, Vec::new());
                    Step::send(Aborted { code }, end)
                }
                // Most likely a duplicate SETUP_ACK.
                _ => Step::to(SendFilename),
            },
            (WaitFilenameResponse, Event::Proceed) => Step::to(WaitFilenameResponse),
            (WaitFilenameResponse, _) => Step::to(SendFilename),

            (terminal @ (DataPhase(_) | Aborted { .. }), _) => Step::to(terminal),
        })
    }
}

/// Run the initiator over `conn` until the first data packet arrives.
///
/// `conn.peer` starts as the server's listening address and is replaced by
/// the source of the SETUP_ACK, the responder's per-connection socket.
/// Returns the control counter to continue with and the first data packet.
pub async fn initiate(
    conn: &mut Connection,
    params: SessionParams,
    remote_file: &str,
    timers: &TimerConfig,
) -> Result<(ControlSeq, Packet), TransferError> {
    let mut machine = Initiator::new(params, remote_file);
    let mut state = InitiatorState::SendSetup;
    let mut event = Event::Proceed;
    let mut budget = RetryBudget::new(timers.handshake_tries);

    loop {
        let step = machine.step(state, event)?;
        for packet in &step.outgoing {
            conn.send(packet).await?;
        }
        state = step.next;

        event = match &state {
            InitiatorState::SendSetup | InitiatorState::SendFilename => Event::Proceed,
            InitiatorState::WaitSetupAck => {
                if !budget.consume() {
                    return Err(TransferError::RetriesExhausted {
                        stage: "waiting for setup acknowledgment",
                    });
                }
                match conn.wait_any(timers.handshake_timeout).await? {
                    Some(inbound) => {
                        if inbound.packet.as_ref().map(Packet::flag) == Some(Flag::SetupAck) {
                            conn.peer = inbound.from;
                            budget.reset();
                            log::info!("[initiator] connected to {}", conn.peer);
                        }
                        Event::Arrived(inbound.packet)
                    }
                    None => {
                        log::warn!(
                            "[initiator] no SETUP_ACK ({} tries left)",
                            budget.remaining()
                        );
                        Event::Quiet
                    }
                }
            }
            InitiatorState::WaitFilenameResponse => {
                if !budget.consume() {
                    return Err(TransferError::RetriesExhausted {
                        stage: "waiting for filename response",
                    });
                }
                match conn.wait(timers.handshake_timeout).await? {
                    Some(inbound) => Event::Arrived(inbound.packet),
                    None => {
                        log::warn!(
                            "[initiator] no filename response ({} tries left)",
                            budget.remaining()
                        );
                        Event::Quiet
                    }
                }
            }
            InitiatorState::DataPhase(first) => {
                log::info!("[initiator] {remote_file:?} accepted; data phase");
                return Ok((machine.control(), first.clone()));
            }
            InitiatorState::Aborted { code } => {
                return Err(TransferError::RemoteFile { code: *code });
            }
        };
    }
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// Server half of the handshake, created from the SETUP_REQUEST that the
/// dispatcher received.
#[derive(Debug)]
pub struct Responder {
    params: SessionParams,
    root: PathBuf,
    window: Window,
    control: ControlSeq,
    file: Option<File>,
}

/// How the responder's handshake ended.
#[derive(Debug)]
pub enum Response {
    /// The file is open; the sender engine takes over.
    Established {
        file: File,
        window: Window,
        params: SessionParams,
    },
    /// The initiator acknowledged a FILENAME_ERROR.
    Rejected { code: i32 },
}

impl Responder {
    /// Validate the request and allocate the connection's window.
    pub fn from_setup(setup: &Packet, root: impl Into<PathBuf>) -> Result<Self, TransferError> {
        if setup.flag() != Flag::SetupRequest {
            return Err(TransferError::ProtocolViolation {
                stage: "accepting a connection",
                flag: setup.flag(),
            });
        }
        let request = SetupRequest::decode(&setup.payload).unwrap_or(SetupRequest {
            window_size: 0,
            chunk_size: 0,
        });
        let params =
            SessionParams::from_request(request).ok_or(TransferError::BadParameters {
                window_size: request.window_size,
                chunk_size: request.chunk_size,
            })?;

        Ok(Self {
            window: Window::new(params.window_size)?,
            params,
            root: root.into(),
            control: ControlSeq::default(),
            file: None,
        })
    }

    pub fn params(&self) -> SessionParams {
        self.params
    }

    pub fn step(
        &mut self,
        state: ResponderState,
        event: Event,
    ) -> Result<Step<ResponderState>, TransferError> {
        use ResponderState::*;

        Ok(match (state, event) {
            (SendSetupAck, _) => {
                Step::send(WaitFilename, self.control.packet(Flag::SetupAck, Vec::new()))
            }
            (WaitFilename, Event::Arrived(Some(packet))) => match packet.flag() {
                Flag::FilenameRequest => self.open(&packet.payload),
                // The initiator missed our SETUP_ACK.
                Flag::SetupRequest => Step::to(SendSetupAck),
                flag => {
                    return Err(TransferError::ProtocolViolation {
                        stage: "waiting for filename",
                        flag,
                    })
                }
            },
            (WaitFilename, Event::Quiet) => Step::to(SendSetupAck),
            (WaitFilename, _) => Step::to(WaitFilename),

            (SendFilenameError { code }, _) => Step::send(
                WaitEndConnection { code },
                self.control.packet(Flag::FilenameError, encode_error_code(code)),
            ),
            (WaitEndConnection { code }, Event::Arrived(Some(packet)))
                if packet.flag() == Flag::EndConnection =>
            {
                Step::to(Rejected { code })
            }
            (WaitEndConnection { code }, Event::Proceed) => Step::to(WaitEndConnection { code }),
            (WaitEndConnection { code }, _) => Step::to(SendFilenameError { code }),

            (terminal @ (Established | Rejected { .. }), _) => Step::to(terminal),
        })
    }

    fn open(&mut self, payload: &[u8]) -> Step<ResponderState> {
        let Some(name) = decode_filename(payload) else {
            return Step::to(ResponderState::SendFilenameError { code: ENOENT });
        };
        let Some(path) = resolve(&self.root, &name) else {
            log::warn!("[responder] refusing path outside root: {name:?}");
            return Step::to(ResponderState::SendFilenameError { code: EACCES });
        };
        match File::open(&path) {
            Ok(file) => {
                log::info!("[responder] serving {}", path.display());
                self.file = Some(file);
                Step::to(ResponderState::Established)
            }
            Err(e) => {
                log::warn!("[responder] cannot open {}: {e}", path.display());
                let code = e.raw_os_error().unwrap_or(EIO);
                Step::to(ResponderState::SendFilenameError { code })
            }
        }
    }

    /// Split into the pieces the sender engine needs.  `None` unless the
    /// machine reached [`ResponderState::Established`].
    pub fn into_established(self) -> Option<(File, Window, SessionParams)> {
        let file = self.file?;
        Some((file, self.window, self.params))
    }
}

/// Join `name` onto `root`, refusing absolute paths and `..` components.
fn resolve(root: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        .then(|| root.join(relative))
}

/// Run the responder over `conn` (already aimed at the initiator).
pub async fn respond(
    conn: &Connection,
    mut machine: Responder,
    timers: &TimerConfig,
) -> Result<Response, TransferError> {
    let mut state = ResponderState::SendSetupAck;
    let mut event = Event::Proceed;
    let mut budget = RetryBudget::new(timers.filename_tries);

    loop {
        let step = machine.step(state, event)?;
        for packet in &step.outgoing {
            conn.send(packet).await?;
        }
        state = step.next;

        event = match state {
            ResponderState::SendSetupAck | ResponderState::SendFilenameError { .. } => {
                Event::Proceed
            }
            ResponderState::WaitFilename | ResponderState::WaitEndConnection { .. } => {
                if !budget.consume() {
                    if let ResponderState::WaitEndConnection { code } = state {
                        // The initiator has the error; its END_CONNECTION was lost.
                        log::warn!("[responder] no END_CONNECTION from {}", conn.peer);
                        return Ok(Response::Rejected { code });
                    }
                    return Err(TransferError::RetriesExhausted {
                        stage: "waiting for filename",
                    });
                }
                match conn.wait(timers.filename_timeout).await? {
                    Some(inbound) => {
                        budget.reset();
                        Event::Arrived(inbound.packet)
                    }
                    None => Event::Quiet,
                }
            }
            ResponderState::Established => {
                let (file, window, params) = machine
                    .into_established()
                    .ok_or_else(|| io::Error::other("established without a file"))?;
                return Ok(Response::Established {
                    file,
                    window,
                    params,
                });
            }
            ResponderState::Rejected { code } => return Ok(Response::Rejected { code }),
        };
    }
}
