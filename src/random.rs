use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{ChiSquared, Distribution, StandardNormal};

/// A seeded random stream.
///
/// Every worker and every [`crate::Draw1D`] owns its own stream, so no
/// synchronization is ever needed. Streams derived from the same seed with
/// different stream ids are independent.
#[derive(Clone, Debug)]
pub struct RandomSource {
    rng: ChaCha8Rng,
}

impl RandomSource {
    /// Seed from the wall clock in nanoseconds.
    pub fn from_clock() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let seed = now.as_secs().wrapping_mul(1_000_000_000) + u64::from(now.subsec_nanos());
        Self::seed_from_u64(seed)
    }

    pub fn seed_from_u64(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Open stream `stream` of the generator seeded with `seed`.
    pub fn with_stream(seed: u64, stream: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        Self { rng }
    }

    /// Derive a new independent stream from an existing one.
    pub fn from_source<R: RngCore>(parent: &mut R) -> Self {
        Self {
            rng: ChaCha8Rng::from_rng(parent),
        }
    }

    /// Uniform draw in `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Zero-mean normal draw with standard deviation `sigma`.
    pub fn gaussian(&mut self, sigma: f64) -> f64 {
        let z: f64 = StandardNormal.sample(&mut self.rng);
        sigma * z
    }

    /// Chi-square draw with `k` degrees of freedom. Degenerate at zero for `k <= 0`.
    pub fn chi_square(&mut self, k: f64) -> f64 {
        match ChiSquared::new(k) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => 0.,
        }
    }
}

impl RngCore for RandomSource {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.rng.fill_bytes(dst)
    }
}
