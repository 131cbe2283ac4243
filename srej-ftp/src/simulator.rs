//! Lossy network layer for testing.
//!
//! Real networks drop, corrupt and duplicate datagrams.  To exercise the
//! recovery paths without depending on actual network conditions, every
//! [`crate::socket::Socket`] pushes its outgoing datagrams through a
//! [`Simulator`], which applies a configurable fault model:
//!
//! | Fault       | Description                                         |
//! |-------------|-----------------------------------------------------|
//! | Loss        | Drop a datagram with probability `loss_rate`.       |
//! | Corruption  | Flip one random bit with probability `corrupt_rate`.|
//! | Duplication | Deliver a datagram twice.                           |
//!
//! The protocol core treats all of this as an opaque property of the
//! transport: a flipped datagram fails its checksum and is handled exactly
//! like a lost one.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub duplicate_rate: f64,
    /// Fixed RNG seed for reproducible runs; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl SimulatorConfig {
    /// Drop and corrupt at the same `rate`, independently.
    pub fn uniform(rate: f64) -> Self {
        Self {
            loss_rate: rate,
            corrupt_rate: rate,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// `true` when no fault can ever fire.
    pub fn is_transparent(&self) -> bool {
        self.loss_rate <= 0.0 && self.corrupt_rate <= 0.0 && self.duplicate_rate <= 0.0
    }
}

/// A fault-injecting filter for outgoing datagrams.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let config = SimulatorConfig {
            loss_rate: probability(config.loss_rate),
            corrupt_rate: probability(config.corrupt_rate),
            duplicate_rate: probability(config.duplicate_rate),
            seed: config.seed,
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    /// A pass-through simulator (no faults).
    pub fn transparent() -> Self {
        Self::new(SimulatorConfig::default())
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Apply the fault model to one datagram and return the copies that
    /// should actually go out: none, one (possibly corrupted), or two.
    pub fn transmit(&self, mut datagram: Vec<u8>) -> Vec<Vec<u8>> {
        if self.config.is_transparent() {
            return vec![datagram];
        }
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if rng.random_bool(self.config.loss_rate) {
            log::trace!("[sim] dropped {} byte datagram", datagram.len());
            return Vec::new();
        }
        if !datagram.is_empty() && rng.random_bool(self.config.corrupt_rate) {
            let bit = rng.random_range(0..datagram.len() * 8);
            datagram[bit / 8] ^= 1 << (bit % 8);
            log::trace!("[sim] flipped bit {bit}");
        }
        if rng.random_bool(self.config.duplicate_rate) {
            log::trace!("[sim] duplicated {} byte datagram", datagram.len());
            return vec![datagram.clone(), datagram];
        }
        vec![datagram]
    }
}

fn probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transparent_passes_everything_through() {
        let sim = Simulator::transparent();
        for i in 0..100u8 {
            assert_eq!(sim.transmit(vec![i; 10]), vec![vec![i; 10]]);
        }
    }

    #[test]
    fn full_loss_drops_everything() {
        let sim = Simulator::new(SimulatorConfig {
            loss_rate: 1.0,
            ..SimulatorConfig::default()
        });
        assert!(sim.transmit(vec![1, 2, 3]).is_empty());
    }

    #[test]
    fn full_corruption_flips_exactly_one_bit() {
        let sim = Simulator::new(SimulatorConfig {
            corrupt_rate: 1.0,
            seed: Some(7),
            ..SimulatorConfig::default()
        });
        let original = vec![0u8; 32];
        let out = sim.transmit(original.clone());
        assert_eq!(out.len(), 1);
        let flipped: u32 = out[0]
            .iter()
            .zip(&original)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        assert_eq!(flipped, 1);
    }

    #[test]
    fn full_duplication_sends_two_copies() {
        let sim = Simulator::new(SimulatorConfig {
            duplicate_rate: 1.0,
            ..SimulatorConfig::default()
        });
        assert_eq!(sim.transmit(vec![9]), vec![vec![9], vec![9]]);
    }

    #[test]
    fn same_seed_same_faults() {
        let config = SimulatorConfig::uniform(0.3).with_seed(42);
        let a = Simulator::new(config.clone());
        let b = Simulator::new(config);
        for i in 0..200u8 {
            assert_eq!(a.transmit(vec![i; 16]), b.transmit(vec![i; 16]));
        }
    }

    #[test]
    fn out_of_range_rates_are_clamped() {
        let sim = Simulator::new(SimulatorConfig {
            loss_rate: f64::NAN,
            corrupt_rate: -1.0,
            duplicate_rate: 0.0,
            seed: Some(1),
        });
        assert!(sim.config().is_transparent());
        assert_eq!(sim.transmit(vec![5]), vec![vec![5]]);
    }
}
