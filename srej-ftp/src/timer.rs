//! Timeouts and retry budgets.
//!
//! Every blocking wait in the protocol is "data ready or `timeout` elapsed",
//! repeated at most `tries` times before the connection gives up.  This
//! module provides:
//! - [`TimerConfig`]: the per-wait durations and try counts.
//! - [`RetryBudget`]: the countdown a driver consumes before each wait and
//!   refills whenever the peer proves it is alive.

use std::time::Duration;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// Initiator wait for SETUP_ACK, and for the filename response.
    pub handshake_timeout: Duration,
    pub handshake_tries: u32,
    /// Responder wait for FILENAME_REQUEST / END_CONNECTION.
    pub filename_timeout: Duration,
    pub filename_tries: u32,
    /// Sender wait for RR/SREJ when the window is full or FINAL is out.
    pub ack_timeout: Duration,
    pub ack_tries: u32,
    /// Receiver wait for the next data packet.
    pub idle_timeout: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(1),
            handshake_tries: 10,
            filename_timeout: Duration::from_secs(1),
            filename_tries: 10,
            ack_timeout: Duration::from_secs(1),
            ack_tries: 10,
            idle_timeout: Duration::from_secs(10),
        }
    }
}

impl TimerConfig {
    /// Every duration divided by `factor`; try counts are unchanged.
    /// Handy for tests over loopback, where a second is an eternity.
    pub fn scaled_down(self, factor: u32) -> Self {
        Self {
            handshake_timeout: self.handshake_timeout / factor,
            filename_timeout: self.filename_timeout / factor,
            ack_timeout: self.ack_timeout / factor,
            idle_timeout: self.idle_timeout / factor,
            ..self
        }
    }
}

/// Countdown of the waits left before a stage is declared dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    left: u32,
    full: u32,
}

impl RetryBudget {
    pub fn new(tries: u32) -> Self {
        Self {
            left: tries,
            full: tries,
        }
    }

    /// Take one try.  Returns `false` when none were left.
    pub fn consume(&mut self) -> bool {
        if self.left == 0 {
            return false;
        }
        self.left -= 1;
        true
    }

    /// Refill after hearing from the peer.
    pub fn reset(&mut self) {
        self.left = self.full;
    }

    pub fn remaining(&self) -> u32 {
        self.left
    }
}
