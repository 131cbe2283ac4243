//! Fixed-capacity, sequence-indexed packet store.
//!
//! [`Window`] is shared by both roles: the sender keeps every prepared but
//! unacknowledged chunk here so it can be retransmitted, the receiver parks
//! out-of-order arrivals here until the gap before them is filled.
//!
//! A sequence number `s` always lives in slot `s % capacity`.  Storing a new
//! sequence overwrites whatever occupied the slot; the protocol guarantees
//! that in-flight sequences never alias, so the store itself does not check.
//! Whether a slot still holds the sequence a caller is asking about is the
//! caller's concern; see [`Window::holds`].

use crate::error::TransferError;
use crate::packet::Packet;

/// Largest window a peer may request.
pub const MAX_WINDOW: u32 = 1 << 16;

#[derive(Debug, Clone, Default)]
struct Slot {
    /// Sequence of the packet last stored here.
    seq: u32,
    packet: Option<Packet>,
    /// A selective reject is outstanding for the sequence mapped here.
    requested: bool,
}

/// Ring of `capacity` slots indexed by `sequence % capacity`.
#[derive(Debug)]
pub struct Window {
    slots: Vec<Slot>,
}

impl Window {
    /// Allocate an empty window of `capacity` slots.
    ///
    /// Fails with [`TransferError::WindowAlloc`] when `capacity` is zero,
    /// above [`MAX_WINDOW`], or the allocation itself fails.
    pub fn new(capacity: u32) -> Result<Self, TransferError> {
        if capacity == 0 || capacity > MAX_WINDOW {
            return Err(TransferError::WindowAlloc { slots: capacity });
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity as usize)
            .map_err(|_| TransferError::WindowAlloc { slots: capacity })?;
        slots.resize_with(capacity as usize, Slot::default);
        Ok(Self { slots })
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    fn index(&self, seq: u32) -> usize {
        (seq % self.capacity()) as usize
    }

    /// Store `packet` under `seq`, replacing the slot's previous occupant.
    /// The slot's requested marker is cleared.
    pub fn put(&mut self, seq: u32, packet: Packet) {
        let i = self.index(seq);
        self.slots[i] = Slot {
            seq,
            packet: Some(packet),
            requested: false,
        };
    }

    /// Current contents of the slot `seq` maps to, whichever sequence that is.
    pub fn get(&self, seq: u32) -> Option<&Packet> {
        self.slots[self.index(seq)].packet.as_ref()
    }

    /// `true` when the slot `seq` maps to currently holds exactly `seq`.
    pub fn holds(&self, seq: u32) -> bool {
        let slot = &self.slots[self.index(seq)];
        slot.packet.is_some() && slot.seq == seq
    }

    /// The stored packet for `seq`, or `None` if its slot holds another one.
    pub fn lookup(&self, seq: u32) -> Option<&Packet> {
        if self.holds(seq) {
            self.get(seq)
        } else {
            None
        }
    }

    /// Record that a selective reject has been issued for `seq`.
    pub fn mark_requested(&mut self, seq: u32) {
        let i = self.index(seq);
        self.slots[i].requested = true;
    }

    pub fn is_requested(&self, seq: u32) -> bool {
        self.slots[self.index(seq)].requested
    }

    pub fn clear_requested(&mut self, seq: u32) {
        let i = self.index(seq);
        self.slots[i].requested = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Flag;

    fn data(seq: u32) -> Packet {
        Packet::new(seq, Flag::Data, vec![seq as u8])
    }

    #[test]
    fn zero_and_oversized_windows_are_rejected() {
        assert!(matches!(
            Window::new(0),
            Err(TransferError::WindowAlloc { slots: 0 })
        ));
        assert!(Window::new(MAX_WINDOW + 1).is_err());
        assert_eq!(Window::new(MAX_WINDOW).unwrap().capacity(), MAX_WINDOW);
    }

    #[test]
    fn put_and_get_by_modulo_index() {
        let mut w = Window::new(4).unwrap();
        w.put(6, data(6));
        assert_eq!(w.get(2).map(Packet::seq), Some(6));
        assert!(w.holds(6));
        assert!(!w.holds(2));
        assert!(w.lookup(2).is_none());
    }

    #[test]
    fn put_overwrites_previous_occupant() {
        let mut w = Window::new(3).unwrap();
        w.put(1, data(1));
        w.put(4, data(4));
        assert!(!w.holds(1));
        assert_eq!(w.lookup(4).map(Packet::seq), Some(4));
    }

    #[test]
    fn requested_marker_tracks_slot() {
        let mut w = Window::new(4).unwrap();
        assert!(!w.is_requested(3));
        w.mark_requested(3);
        assert!(w.is_requested(3));
        // Same slot, different sequence.
        assert!(w.is_requested(7));
        w.clear_requested(3);
        assert!(!w.is_requested(3));
    }

    #[test]
    fn storing_a_packet_clears_its_marker() {
        let mut w = Window::new(2).unwrap();
        w.mark_requested(5);
        w.put(5, data(5));
        assert!(!w.is_requested(5));
    }

    #[test]
    fn empty_slot_holds_nothing() {
        let w = Window::new(2).unwrap();
        // Slot 0 defaults to seq 0 but has no packet.
        assert!(!w.holds(0));
        assert!(w.get(0).is_none());
    }
}
