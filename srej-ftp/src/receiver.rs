//! Selective-repeat receive-side engine (initiator role).
//!
//! [`Receiver`] reassembles the byte stream from DATA / FINAL_DATA packets:
//!
//! - `seq == expected`: buffer it, then flush every contiguous buffered
//!   packet to the output, sending one RR per delivered packet.
//! - `seq > expected`: a gap.  Each missing sequence gets one SREJ, unless
//!   one is already outstanding for it; the arrival is buffered.
//! - `seq < expected`: a duplicate.  Nothing is written; the current RR is
//!   repeated, preceded by the outstanding SREJ for `expected` if any.
//!
//! Each sequence is written at most once, in order.

use std::io::Write;

use crate::connection::{Connection, ControlSeq};
use crate::error::TransferError;
use crate::packet::{Flag, Packet};
use crate::state::{Event, ReceiverState, Step};
use crate::timer::TimerConfig;
use crate::window::Window;

/// What the receiver achieved by the time it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub bytes_written: u64,
    pub packets_delivered: u32,
    /// `true` when FINAL_DATA was delivered; `false` when the post-delivery
    /// idle timeout ended the transfer.
    pub completed: bool,
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct Receiver<W> {
    output: W,
    window: Window,
    /// Lowest data sequence not yet written to `output`.
    expected: u32,
    control: ControlSeq,
    bytes_written: u64,
    delivered: u32,
}

impl<W: Write> Receiver<W> {
    /// `control` continues the counter the handshake used.
    pub fn new(output: W, window: Window, control: ControlSeq) -> Self {
        Self {
            output,
            window,
            expected: 0,
            control,
            bytes_written: 0,
            delivered: 0,
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn summary(&self, completed: bool) -> TransferSummary {
        TransferSummary {
            bytes_written: self.bytes_written,
            packets_delivered: self.delivered,
            completed,
        }
    }

    /// Consume the engine and hand back the output sink.
    pub fn into_output(self) -> W {
        self.output
    }

    pub fn step(
        &mut self,
        state: ReceiverState,
        event: Event,
    ) -> Result<Step<ReceiverState>, TransferError> {
        let ReceiverState::WaitOnData = state else {
            return Ok(Step::to(state));
        };

        match event {
            Event::Proceed | Event::Arrived(None) => Ok(Step::to(state)),
            Event::Quiet if self.delivered == 0 => Err(TransferError::IdleTimeout),
            Event::Quiet => {
                self.output.flush()?;
                log::warn!(
                    "[receiver] idle timeout after {} packets; assuming the sender is done",
                    self.delivered
                );
                Ok(Step::to(ReceiverState::Done { completed: false }))
            }
            Event::Arrived(Some(packet)) if !packet.flag().is_data() => {
                log::debug!("[receiver] ignoring {} during data phase", packet.flag());
                Ok(Step::to(state))
            }
            Event::Arrived(Some(packet)) => self.on_data(packet),
        }
    }

    fn on_data(&mut self, packet: Packet) -> Result<Step<ReceiverState>, TransferError> {
        let seq = packet.seq();

        if seq == self.expected {
            self.window.put(seq, packet);
            return self.flush();
        }

        if seq > self.expected {
            if seq - self.expected >= self.window.capacity() {
                log::debug!(
                    "[receiver] seq={seq} beyond window (expected {}); dropped",
                    self.expected
                );
                return Ok(Step::to(ReceiverState::WaitOnData));
            }
            let mut outgoing = Vec::new();
            for missing in self.expected..seq {
                if self.window.holds(missing) || self.window.is_requested(missing) {
                    continue;
                }
                self.window.mark_requested(missing);
                outgoing.push(self.control_packet(Flag::Srej, missing));
            }
            self.window.put(seq, packet);
            return Ok(Step::with(ReceiverState::WaitOnData, outgoing));
        }

        // Stale duplicate: the RR (or SREJ) that should have stopped it was
        // probably lost.
        let mut outgoing = Vec::with_capacity(2);
        if self.window.is_requested(self.expected) {
            outgoing.push(self.control_packet(Flag::Srej, self.expected));
        }
        outgoing.push(self.control_packet(Flag::Rr, self.expected));
        Ok(Step::with(ReceiverState::WaitOnData, outgoing))
    }

    /// Write out the contiguous run starting at `expected`.
    fn flush(&mut self) -> Result<Step<ReceiverState>, TransferError> {
        let mut outgoing = Vec::new();

        while let Some(packet) = self.window.lookup(self.expected) {
            let is_final = packet.flag() == Flag::FinalData;
            self.output.write_all(&packet.payload)?;
            self.bytes_written += packet.payload.len() as u64;
            self.delivered += 1;
            self.window.clear_requested(self.expected);
            self.expected += 1;
            outgoing.push(self.control_packet(Flag::Rr, self.expected));

            if is_final {
                self.output.flush()?;
                return Ok(Step::with(ReceiverState::Done { completed: true }, outgoing));
            }
        }
        Ok(Step::with(ReceiverState::WaitOnData, outgoing))
    }

    fn control_packet(&mut self, flag: Flag, target: u32) -> Packet {
        Packet::control(self.control.next(), flag, target)
    }

    /// Drive the machine over `conn`.  `first` is the data packet that
    /// completed the handshake.
    pub async fn run(
        mut self,
        conn: &Connection,
        timers: &TimerConfig,
        first: Packet,
    ) -> Result<TransferSummary, TransferError> {
        let mut state = ReceiverState::WaitOnData;
        let mut event = Event::Arrived(Some(first));

        loop {
            let step = self.step(state, event)?;
            for packet in &step.outgoing {
                conn.send(packet).await?;
            }
            state = step.next;

            if let ReceiverState::Done { completed } = state {
                log::info!(
                    "[receiver] done: {} bytes in {} packets",
                    self.bytes_written,
                    self.delivered
                );
                return Ok(self.summary(completed));
            }

            event = match conn.wait(timers.idle_timeout).await? {
                Some(inbound) => Event::Arrived(inbound.packet),
                None => Event::Quiet,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver(window: u32) -> Receiver<Vec<u8>> {
        Receiver::new(Vec::new(), Window::new(window).unwrap(), ControlSeq::default())
    }

    fn data(seq: u32, payload: &[u8]) -> Event {
        Event::Arrived(Some(Packet::new(seq, Flag::Data, payload.to_vec())))
    }

    fn last(seq: u32, payload: &[u8]) -> Event {
        Event::Arrived(Some(Packet::new(seq, Flag::FinalData, payload.to_vec())))
    }

    fn controls(step: &Step<ReceiverState>) -> Vec<(Flag, u32)> {
        step.outgoing
            .iter()
            .map(|p| (p.flag(), p.control_target().unwrap()))
            .collect()
    }

    #[test]
    fn concrete_scenario_emits_four_rrs() {
        let source: Vec<u8> = (0..3500u32).map(|i| (i % 251) as u8).collect();
        let chunks: Vec<&[u8]> = source.chunks(1000).collect();
        let mut r = receiver(4);
        let mut rrs = Vec::new();
        let mut state = ReceiverState::WaitOnData;

        for (seq, chunk) in chunks.iter().enumerate() {
            let event = if seq == chunks.len() - 1 {
                last(seq as u32, chunk)
            } else {
                data(seq as u32, chunk)
            };
            let step = r.step(state, event).unwrap();
            rrs.extend(controls(&step));
            state = step.next;
        }

        assert_eq!(state, ReceiverState::Done { completed: true });
        assert_eq!(
            rrs,
            [(Flag::Rr, 1), (Flag::Rr, 2), (Flag::Rr, 3), (Flag::Rr, 4)]
        );
        assert_eq!(r.summary(true).bytes_written, 3500);
        assert_eq!(r.into_output(), source);
    }

    #[test]
    fn reordered_packets_are_flushed_in_order() {
        let mut r = receiver(8);
        let s = ReceiverState::WaitOnData;

        let step = r.step(s, data(0, b"a")).unwrap();
        assert_eq!(controls(&step), [(Flag::Rr, 1)]);

        let step = r.step(s, data(2, b"c")).unwrap();
        assert_eq!(controls(&step), [(Flag::Srej, 1)]);

        // Seq 1 is already requested; no second SREJ.
        let step = r.step(s, last(3, b"d")).unwrap();
        assert!(step.outgoing.is_empty());

        let step = r.step(s, data(1, b"b")).unwrap();
        assert_eq!(
            controls(&step),
            [(Flag::Rr, 2), (Flag::Rr, 3), (Flag::Rr, 4)]
        );
        assert_eq!(step.next, ReceiverState::Done { completed: true });
        assert_eq!(r.into_output(), b"abcd");
    }

    #[test]
    fn any_permutation_yields_the_same_output() {
        let payloads: [&[u8]; 5] = [b"00", b"11", b"22", b"33", b"4"];
        for order in [[4, 3, 2, 1, 0], [1, 3, 0, 4, 2], [2, 0, 4, 1, 3]] {
            let mut r = receiver(8);
            let mut state = ReceiverState::WaitOnData;
            for seq in order {
                let event = if seq == 4 {
                    last(seq, payloads[seq as usize])
                } else {
                    data(seq, payloads[seq as usize])
                };
                state = r.step(state, event).unwrap().next;
            }
            assert_eq!(state, ReceiverState::Done { completed: true });
            assert_eq!(r.into_output(), b"001122334", "order {order:?}");
        }
    }

    #[test]
    fn gap_requests_each_missing_sequence_once() {
        let mut r = receiver(16);
        let s = ReceiverState::WaitOnData;
        let step = r.step(s, data(5, b"x")).unwrap();
        let expected: Vec<_> = (0..5).map(|seq| (Flag::Srej, seq)).collect();
        assert_eq!(controls(&step), expected);

        // A later, larger gap only requests the new holes.
        let step = r.step(s, data(7, b"y")).unwrap();
        assert_eq!(controls(&step), [(Flag::Srej, 6)]);
    }

    #[test]
    fn duplicate_is_never_written_twice() {
        let mut r = receiver(4);
        let s = ReceiverState::WaitOnData;
        r.step(s, data(0, b"once")).unwrap();
        let step = r.step(s, data(0, b"once")).unwrap();
        assert_eq!(controls(&step), [(Flag::Rr, 1)]);
        assert_eq!(r.expected(), 1);
        assert_eq!(r.into_output(), b"once");
    }

    #[test]
    fn duplicate_repeats_outstanding_srej() {
        let mut r = receiver(4);
        let s = ReceiverState::WaitOnData;
        r.step(s, data(0, b"a")).unwrap();
        r.step(s, data(2, b"c")).unwrap();
        let step = r.step(s, data(0, b"a")).unwrap();
        assert_eq!(controls(&step), [(Flag::Srej, 1), (Flag::Rr, 1)]);
    }

    #[test]
    fn corrupt_arrival_is_same_as_nothing() {
        let mut r = receiver(4);
        let s = ReceiverState::WaitOnData;
        r.step(s, data(0, b"a")).unwrap();

        let mut wire = Packet::new(1, Flag::Data, b"b".to_vec()).encode();
        let payload_byte = wire.len() - 1;
        wire[payload_byte] ^= 0x10;
        let decoded = Packet::verify_and_unwrap(&wire);
        assert!(decoded.is_none());

        let step = r.step(s, Event::Arrived(decoded)).unwrap();
        assert_eq!(step, Step::to(ReceiverState::WaitOnData));
        assert_eq!(r.expected(), 1);
    }

    #[test]
    fn packets_beyond_window_are_dropped() {
        let mut r = receiver(4);
        let step = r.step(ReceiverState::WaitOnData, data(4, b"far")).unwrap();
        assert!(step.outgoing.is_empty());
        assert_eq!(r.summary(false).packets_delivered, 0);
    }

    #[test]
    fn idle_before_any_data_is_fatal() {
        let mut r = receiver(4);
        let err = r.step(ReceiverState::WaitOnData, Event::Quiet).unwrap_err();
        assert!(matches!(err, TransferError::IdleTimeout));
    }

    #[test]
    fn idle_after_delivery_ends_incomplete() {
        let mut r = receiver(4);
        r.step(ReceiverState::WaitOnData, data(0, b"a")).unwrap();
        let step = r.step(ReceiverState::WaitOnData, Event::Quiet).unwrap();
        assert_eq!(step.next, ReceiverState::Done { completed: false });
    }

    #[test]
    fn control_packets_are_ignored() {
        let mut r = receiver(4);
        let stray = Event::Arrived(Some(Packet::control(0, Flag::SetupAck, 0)));
        let step = r.step(ReceiverState::WaitOnData, stray).unwrap();
        assert_eq!(step, Step::to(ReceiverState::WaitOnData));
    }

    #[test]
    fn control_sequence_continues_from_handshake() {
        let mut control = ControlSeq::default();
        control.next();
        control.next();
        let mut r = Receiver::new(Vec::new(), Window::new(4).unwrap(), control);
        let step = r.step(ReceiverState::WaitOnData, data(0, b"a")).unwrap();
        assert_eq!(step.outgoing[0].seq(), 2);
    }
}
