//! Selective-repeat send-side engine (responder role).
//!
//! [`Sender`] reads the source file chunk by chunk into a [`Window`] and
//! drives the [`SenderState`] machine:
//!
//! - At most `window_size` chunks are prepared but unacknowledged at once.
//! - After every non-final send the driver *polls* for an ack without
//!   blocking, so acknowledgment processing is pipelined with transmission.
//! - When the window is full, or FINAL_DATA is out, the driver *blocks* for
//!   an ack; on timeout only the lowest unacknowledged chunk is resent.
//! - An SREJ jumps the queue: the requested chunk goes out on the next send.
//!
//! # Cursor layout
//!
//! ```text
//!  lowest_unacked      next_send        next_prepare
//!        │                 │                  │
//!  ──────┼─────────────────┼──────────────────┼─────────▶ data seq
//!        │ <─ sent, unacked│ <─ prepared ────▶│
//!        │ <────────── at most window_size ──▶│
//! ```

use std::io::Read;

use crate::connection::Connection;
use crate::error::TransferError;
use crate::packet::{Flag, Packet};
use crate::state::{Event, SenderState, Step};
use crate::timer::{RetryBudget, TimerConfig};
use crate::window::Window;

/// Totals reported when the peer has acknowledged the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendSummary {
    /// Distinct chunks, including the final one.
    pub packets: u32,
    pub bytes: u64,
    /// Data packets put on the wire, retransmissions included.
    pub transmissions: u64,
}

/// Send-side state for one connection.
#[derive(Debug)]
pub struct Sender<R> {
    source: R,
    window: Window,
    chunk_size: usize,

    /// Oldest sequence the receiver has not acknowledged (left edge).
    lowest_unacked: u32,
    /// Next sequence to send in order.
    next_send: u32,
    /// Next sequence to read from the file.
    next_prepare: u32,
    /// Sequence named by the latest SREJ, sent before anything else.
    pending_srej: Option<u32>,

    /// Set once the short (final) chunk has been read.
    done_preparing: bool,
    last_seq: Option<u32>,

    bytes_read: u64,
    transmissions: u64,
}

impl<R: Read> Sender<R> {
    /// `window` must be empty; its capacity is the negotiated window size.
    pub fn new(source: R, window: Window, chunk_size: usize) -> Self {
        Self {
            source,
            window,
            chunk_size,
            lowest_unacked: 0,
            next_send: 0,
            next_prepare: 0,
            pending_srej: None,
            done_preparing: false,
            last_seq: None,
            bytes_read: 0,
            transmissions: 0,
        }
    }

    pub fn lowest_unacked(&self) -> u32 {
        self.lowest_unacked
    }

    pub fn last_seq(&self) -> Option<u32> {
        self.last_seq
    }

    pub fn summary(&self) -> SendSummary {
        SendSummary {
            packets: self.next_prepare,
            bytes: self.bytes_read,
            transmissions: self.transmissions,
        }
    }

    /// Whether FINAL_DATA has been put on the wire at least once.
    pub fn final_sent(&self) -> bool {
        self.last_seq.is_some_and(|last| self.next_send > last)
    }

    fn capacity(&self) -> u32 {
        self.window.capacity()
    }

    /// The transition function.  Reads the file in `Prepare`; never touches
    /// the network.
    pub fn step(
        &mut self,
        state: SenderState,
        event: Event,
    ) -> Result<Step<SenderState>, TransferError> {
        use SenderState::*;

        Ok(match (state, event) {
            (Prepare, _) => {
                self.prepare()?;
                Step::to(Send)
            }
            (Send, _) => self.send(),
            (CheckForAck | WaitForAck, Event::Arrived(packet)) => self.process_ack(packet),
            (CheckForAck, _) => Step::to(Prepare),
            (WaitForAck, Event::Quiet) => self.resend_lowest(),
            (WaitForAck, Event::Proceed) => Step::to(WaitForAck),
            (Done, _) => Step::to(Done),
        })
    }

    /// Read the next chunk into the window unless the file is exhausted or
    /// the window already holds `window_size` unacknowledged chunks.
    fn prepare(&mut self) -> std::io::Result<()> {
        if self.done_preparing || self.next_prepare - self.lowest_unacked >= self.capacity() {
            return Ok(());
        }

        let mut chunk = Vec::with_capacity(self.chunk_size);
        (&mut self.source)
            .take(self.chunk_size as u64)
            .read_to_end(&mut chunk)?;

        let seq = self.next_prepare;
        let flag = if chunk.len() < self.chunk_size {
            self.done_preparing = true;
            self.last_seq = Some(seq);
            Flag::FinalData
        } else {
            Flag::Data
        };
        self.bytes_read += chunk.len() as u64;
        self.window.put(seq, Packet::new(seq, flag, chunk));
        self.next_prepare += 1;
        Ok(())
    }

    fn send(&mut self) -> Step<SenderState> {
        if self.next_send < self.lowest_unacked {
            self.next_send = self.lowest_unacked;
        }

        // SREJ service takes priority over in-order sending.
        if let Some(target) = self.pending_srej.take() {
            let in_window = target >= self.lowest_unacked && target < self.next_prepare;
            match self.window.lookup(target) {
                Some(packet) if in_window => {
                    log::debug!("[sender] servicing SREJ seq={target}");
                    let packet = packet.clone();
                    return self.transmit(packet);
                }
                _ => log::debug!("[sender] SREJ seq={target} outside window; ignored"),
            }
        }

        if self.next_send - self.lowest_unacked >= self.capacity() {
            return Step::to(SenderState::WaitForAck);
        }
        if self.next_send >= self.next_prepare {
            if self.done_preparing || self.next_prepare - self.lowest_unacked >= self.capacity() {
                return Step::to(SenderState::WaitForAck);
            }
            return Step::to(SenderState::Prepare);
        }

        let Some(packet) = self.window.lookup(self.next_send).cloned() else {
            log::warn!("[sender] seq={} missing from window", self.next_send);
            return Step::to(SenderState::WaitForAck);
        };
        self.next_send += 1;
        self.transmit(packet)
    }

    fn transmit(&mut self, packet: Packet) -> Step<SenderState> {
        self.transmissions += 1;
        // Nothing else will be sent after FINAL, so stop polling and block.
        let next = if packet.flag() == Flag::FinalData {
            SenderState::WaitForAck
        } else {
            SenderState::CheckForAck
        };
        Step::send(next, packet)
    }

    fn process_ack(&mut self, packet: Option<Packet>) -> Step<SenderState> {
        // A corrupt datagram is as good as none: go back to work.
        let Some(packet) = packet else {
            return Step::to(SenderState::Prepare);
        };
        let target = match (packet.flag(), packet.control_target()) {
            (Flag::Rr | Flag::Srej, Some(target)) => target,
            (flag, _) => {
                log::debug!("[sender] ignoring {flag} during data phase");
                return Step::to(SenderState::Prepare);
            }
        };

        if packet.flag() == Flag::Srej {
            self.pending_srej = Some(target);
            return Step::to(SenderState::Send);
        }

        if self.done_preparing && self.last_seq.is_some_and(|last| target > last) {
            log::debug!("[sender] RR {target} covers the final chunk");
            self.lowest_unacked = target;
            return Step::to(SenderState::Done);
        }
        // Reordered RRs must not pull the window back; bogus ones must not
        // push it past what was sent.
        let ceiling = self.next_send.max(self.lowest_unacked);
        self.lowest_unacked = target.max(self.lowest_unacked).min(ceiling);
        Step::to(SenderState::CheckForAck)
    }

    fn resend_lowest(&mut self) -> Step<SenderState> {
        match self.window.lookup(self.lowest_unacked).cloned() {
            Some(packet) => {
                log::debug!("[sender] timeout, resending seq={}", packet.seq());
                self.transmissions += 1;
                Step::send(SenderState::WaitForAck, packet)
            }
            None => Step::to(SenderState::WaitForAck),
        }
    }

    /// Drive the machine over `conn` until the whole file is acknowledged.
    pub async fn run(
        mut self,
        conn: &Connection,
        timers: &TimerConfig,
    ) -> Result<SendSummary, TransferError> {
        let mut state = SenderState::Prepare;
        let mut budget = RetryBudget::new(timers.ack_tries);

        loop {
            let event = match state {
                SenderState::Done => break,
                SenderState::Prepare | SenderState::Send => Event::Proceed,
                SenderState::CheckForAck => match conn.poll()? {
                    Some(inbound) => {
                        budget.reset();
                        Event::Arrived(inbound.packet)
                    }
                    None => Event::Quiet,
                },
                SenderState::WaitForAck => {
                    if !budget.consume() {
                        if self.final_sent() {
                            let summary = self.summary();
                            return Err(TransferError::FinalAckLost {
                                packets: summary.packets,
                                bytes: summary.bytes,
                            });
                        }
                        return Err(TransferError::RetriesExhausted {
                            stage: "waiting for acknowledgment",
                        });
                    }
                    match conn.wait(timers.ack_timeout).await? {
                        Some(inbound) => {
                            budget.reset();
                            Event::Arrived(inbound.packet)
                        }
                        None => {
                            log::warn!(
                                "[sender] no ack from {} ({} tries left)",
                                conn.peer,
                                budget.remaining()
                            );
                            Event::Quiet
                        }
                    }
                }
            };

            let step = self.step(state, event)?;
            for packet in &step.outgoing {
                conn.send(packet).await?;
            }
            log::trace!("[sender] {state} → {}", step.next);
            state = step.next;
        }

        Ok(self.summary())
    }
}
