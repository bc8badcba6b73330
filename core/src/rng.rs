//! Deterministic random number generation.
//!
//! RULE: Nothing in the pipeline may call any platform RNG.
//! All randomness flows through StageRng instances derived from the
//! single master seed stored on the run record.
//!
//! Each stage gets its own RNG stream, seeded from
//! (master_seed XOR stage_index). Adding a stage never changes the
//! stream of an existing one.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG for a single stage.
pub struct StageRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl StageRng {
    /// Create a stage RNG from the master seed and a stable stage index.
    /// The index must never change once assigned.
    pub fn new(master_seed: u64, stage_index: u64) -> Self {
        let derived_seed = master_seed ^ (stage_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        use rand::RngCore;
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Pick `k` distinct items from `items` without replacement
    /// (partial Fisher-Yates). Order of the result is the draw order.
    pub fn choose_distinct<T: Copy>(&mut self, items: &[T], k: usize) -> Vec<T> {
        let mut pool: Vec<T> = items.to_vec();
        let k = k.min(pool.len());
        for i in 0..k {
            let remaining = (pool.len() - i) as u64;
            let j = i + self.next_u64_below(remaining) as usize;
            pool.swap(i, j);
        }
        pool.truncate(k);
        pool
    }
}

/// All stage RNGs for a single run, indexed by stable slot.
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn for_stage(&self, slot: StageSlot) -> StageRng {
        StageRng::new(self.master_seed, slot as u64).with_name(slot.name())
    }
}

/// Stable stage slot assignments.
/// NEVER reorder or remove entries; only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum StageSlot {
    Sample = 0,
    Profile = 1,
    Consistency = 2,
    Correction = 3,
    Exclusion = 4,
    Aggregate = 5,
    Gate = 6,
}

impl StageSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sample => "sample",
            Self::Profile => "profile",
            Self::Consistency => "consistency",
            Self::Correction => "correction",
            Self::Exclusion => "exclusion",
            Self::Aggregate => "aggregate",
            Self::Gate => "gate",
        }
    }
}
