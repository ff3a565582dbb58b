//! Per-worker random source
//!
//! Each worker seeds its own generator after the fork so parallel
//! instances do not replay the same sequence.

use core::cell::RefCell;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub struct RandomSource {
    rng: RefCell<SmallRng>,
}

impl RandomSource {
    /// Seed from OS entropy
    pub fn from_entropy() -> Self {
        Self {
            rng: RefCell::new(SmallRng::from_entropy()),
        }
    }

    /// Deterministic sequence, for tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: RefCell::new(SmallRng::seed_from_u64(seed)),
        }
    }

    #[inline]
    pub fn bit(&self) -> bool {
        self.rng.borrow_mut().gen::<bool>()
    }

    #[inline]
    pub fn u32(&self) -> u32 {
        self.rng.borrow_mut().gen::<u32>()
    }
}
