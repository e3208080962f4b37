//! Randomness for the telemetry generator.
//!
//! RULE: The generator never calls a platform RNG directly.
//! Every draw goes through a `RandomSource`, so tests can pin the
//! stream (or replace it outright) and a seeded run is reproducible.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// Uniform draws over closed integer ranges and half-open real ranges.
pub trait RandomSource {
    /// Uniform integer in `[min, max]`, both ends inclusive.
    fn int_inclusive(&mut self, min: u32, max: u32) -> u32;

    /// Uniform real in `[min, max)`. Returns `min` for an empty range.
    fn uniform(&mut self, min: f64, max: f64) -> f64;
}

/// Seeded PCG stream used by the simulation driver.
pub struct TelemetryRng {
    seed: u64,
    inner: Pcg64Mcg,
}

impl TelemetryRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Seed from the wall clock. Used when the configuration pins no seed;
    /// the chosen seed is still logged so the run can be reproduced.
    pub fn from_clock() -> Self {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self::new(nanos as u64 ^ 0x9e37_79b9_7f4a_7c15)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomSource for TelemetryRng {
    fn int_inclusive(&mut self, min: u32, max: u32) -> u32 {
        if max <= min {
            return min;
        }
        self.inner.gen_range(min..=max)
    }

    fn uniform(&mut self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        self.inner.gen_range(min..max)
    }
}
