//! Turn Coordination
//!
//! Both peers draw a random seed and send it. The larger seed wins: its
//! owner keeps its generator and moves first, the other side adopts the
//! remote seed and shifts its parity by one. From then on the move counter
//! advances on every accepted word submission, on both sides independently.

use tracing::debug;

use crate::core::rng::{random_seed, XorShift32};

/// Result of comparing seeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Local seed was greater or equal. This side moves first.
    KeptLocal,
    /// Remote seed was greater. This side moves second.
    AdoptedRemote,
}

/// Shared turn state of one peer.
#[derive(Debug, Clone)]
pub struct TurnState {
    rng: XorShift32,
    local_seed: i32,
    move_counter: u32,
    reconciled: bool,
}

impl TurnState {
    /// Start from a given local seed.
    pub fn new(local_seed: i32) -> Self {
        Self {
            rng: XorShift32::new(local_seed),
            local_seed,
            move_counter: 0,
            reconciled: false,
        }
    }

    /// Start from a random local seed.
    pub fn from_entropy() -> Self {
        Self::new(random_seed())
    }

    /// Seed this peer announced.
    pub fn local_seed(&self) -> i32 {
        self.local_seed
    }

    /// Seed of the generator in use.
    pub fn seed(&self) -> i32 {
        self.rng.seed()
    }

    /// Apply the remote seed. Only the first call has an effect.
    pub fn reconcile(&mut self, remote_seed: i32) -> Option<Reconciliation> {
        if self.reconciled {
            debug!("Ignoring repeated seed {}", remote_seed);
            return None;
        }
        self.reconciled = true;

        if self.local_seed >= remote_seed {
            Some(Reconciliation::KeptLocal)
        } else {
            self.rng = XorShift32::new(remote_seed);
            self.move_counter += 1;
            Some(Reconciliation::AdoptedRemote)
        }
    }

    /// Seeds have been compared.
    pub fn is_reconciled(&self) -> bool {
        self.reconciled
    }

    /// Whether the local player may move.
    pub fn is_my_turn(&self) -> bool {
        self.reconciled && self.move_counter % 2 == 0
    }

    /// Count one accepted word submission, local or remote.
    pub fn record_submission(&mut self) {
        self.move_counter += 1;
    }

    /// Moves so far, including the parity offset.
    pub fn move_counter(&self) -> u32 {
        self.move_counter
    }

    /// Next index into the shared word list.
    pub fn next_word_index(&mut self, len: usize) -> usize {
        self.rng.next_index(len)
    }
}
