//! The story-visible random number generator.
//!
//! `random` with a positive range draws uniformly from 1..=range; any
//! other argument reseeds deterministically from the argument and returns
//! 0, which games use to enter a predictable mode for their test suites.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandMode {
    Predictable,
    RandomUniform,
}

pub struct ZRand {
    rng: StdRng,
    mode: RandMode,
}

impl ZRand {
    pub fn new_uniform() -> ZRand {
        ZRand {
            rng: StdRng::from_entropy(),
            mode: RandMode::RandomUniform,
        }
    }

    pub fn new_predictable(seed: u64) -> ZRand {
        ZRand {
            rng: StdRng::seed_from_u64(seed),
            mode: RandMode::Predictable,
        }
    }

    pub fn mode(&self) -> RandMode {
        self.mode
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.mode = RandMode::Predictable;
    }

    /// Uniform value in 1..=range (range >= 1).
    pub fn next_in_range(&mut self, range: u16) -> u16 {
        self.rng.gen_range(1..=range)
    }

    /// The `random` opcode: positive range draws, zero or negative
    /// reseeds from the argument and yields 0.
    pub fn opcode_random(&mut self, range: i16) -> u16 {
        if range > 0 {
            self.next_in_range(range as u16)
        } else {
            self.reseed(range.unsigned_abs() as u64);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_range_stays_in_bounds() {
        let mut rng = ZRand::new_uniform();
        for _ in 0..200 {
            let v = rng.opcode_random(6);
            assert!((1..=6).contains(&v));
        }
        assert_eq!(rng.opcode_random(1), 1);
    }

    #[test]
    fn nonpositive_reseeds_and_returns_zero() {
        let mut a = ZRand::new_uniform();
        let mut b = ZRand::new_uniform();
        assert_eq!(a.opcode_random(-17), 0);
        assert_eq!(b.opcode_random(-17), 0);
        assert_eq!(a.mode(), RandMode::Predictable);
        // Identical seeds give identical sequences.
        for _ in 0..20 {
            assert_eq!(a.opcode_random(100), b.opcode_random(100));
        }
    }

    #[test]
    fn random_zero_reseeds_too() {
        let mut rng = ZRand::new_uniform();
        assert_eq!(rng.opcode_random(0), 0);
        assert_eq!(rng.mode(), RandMode::Predictable);
    }
}
