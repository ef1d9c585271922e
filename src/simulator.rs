//! Fault injection for outgoing datagrams.
//!
//! Real networks drop and duplicate packets. To exercise the reliability
//! mechanisms without depending on actual network conditions, a
//! [`Simulator`] can be attached to a [`crate::socket::Socket`]; every
//! outgoing datagram is then passed through the fault model below:
//!
//! | Fault        | Description                                           |
//! |--------------|-------------------------------------------------------|
//! | Drop once    | Drop the first datagram starting with a given prefix. |
//! | Packet loss  | Drop a datagram with probability `loss_rate`.         |
//! | Duplication  | Deliver a datagram twice with `duplicate_rate`.       |
//!
//! The RNG is seeded, so a failing lossy run can be replayed exactly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a delivered datagram is sent twice.
    pub duplicate_rate: f64,
    /// Each prefix drops exactly one datagram: the first one that starts with it.
    pub drop_once: Vec<Vec<u8>>,
    /// RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl SimulatorConfig {
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub fn drop_first(prefix: Vec<u8>) -> Self {
        Self {
            drop_once: vec![prefix],
            ..Self::default()
        }
    }
}

/// What happens to one outgoing datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Deliver,
    Duplicate,
    Drop,
}

/// Stateful fault model; one per socket.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    dropped: u64,
    sent: u64,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng,
            dropped: 0,
            sent: 0,
        }
    }

    /// Decide the fate of `datagram`.
    pub fn judge(&mut self, datagram: &[u8]) -> Fate {
        self.sent += 1;

        if let Some(idx) = self
            .config
            .drop_once
            .iter()
            .position(|prefix| datagram.starts_with(prefix))
        {
            self.config.drop_once.swap_remove(idx);
            self.dropped += 1;
            return Fate::Drop;
        }

        if self.config.loss_rate > 0.0 && self.rng.gen_bool(self.config.loss_rate.min(1.0)) {
            self.dropped += 1;
            return Fate::Drop;
        }

        if self.config.duplicate_rate > 0.0
            && self.rng.gen_bool(self.config.duplicate_rate.min(1.0))
        {
            return Fate::Duplicate;
        }

        Fate::Deliver
    }

    /// Datagrams dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Datagrams judged so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}
