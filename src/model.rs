//! Target densities for the ensemble sampler.
//!
//! Provides the `LogDensity` trait, the seam between the sampler and the
//! posterior it explores.

use crate::random::RandomSource;

/// An unnormalized log density over `R^dim`.
///
/// The density is evaluated concurrently from several worker threads, so
/// implementations must be `Sync` and must not rely on interior scratch
/// state. Positions outside the support evaluate to `-inf`.
pub trait LogDensity: Sync {
    /// The dimension of the parameter space.
    fn dim(&self) -> usize;

    fn log_density(&self, position: &[f64]) -> f64;

    /// Write a starting position for one walker.
    ///
    /// Positions should usually have a finite log density; the sampler
    /// redraws a bounded number of times if they do not.
    fn init_position(&self, rng: &mut RandomSource, position: &mut [f64]);
}

impl<T: LogDensity + ?Sized> LogDensity for &T {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn log_density(&self, position: &[f64]) -> f64 {
        (**self).log_density(position)
    }

    fn init_position(&self, rng: &mut RandomSource, position: &mut [f64]) {
        (**self).init_position(rng, position)
    }
}

pub mod test_logps {
    use super::LogDensity;
    use crate::random::RandomSource;

    /// Isotropic normal density with walkers started in a ball around `mu + offset`.
    pub struct NormalLogp {
        mu: Vec<f64>,
        sigma: f64,
        init_offset: f64,
    }

    impl NormalLogp {
        pub fn new(mu: Vec<f64>, sigma: f64) -> NormalLogp {
            NormalLogp {
                mu,
                sigma,
                init_offset: 0.,
            }
        }

        pub fn with_init_offset(mut self, offset: f64) -> NormalLogp {
            self.init_offset = offset;
            self
        }

        pub fn mu(&self) -> &[f64] {
            &self.mu
        }
    }

    impl LogDensity for NormalLogp {
        fn dim(&self) -> usize {
            self.mu.len()
        }

        fn log_density(&self, position: &[f64]) -> f64 {
            position
                .iter()
                .zip(self.mu.iter())
                .map(|(&x, &mu)| {
                    let diff = (x - mu) / self.sigma;
                    -0.5 * diff * diff
                })
                .sum()
        }

        fn init_position(&self, rng: &mut RandomSource, position: &mut [f64]) {
            for (x, &mu) in position.iter_mut().zip(self.mu.iter()) {
                *x = mu + self.init_offset + rng.gaussian(self.sigma);
            }
        }
    }
}
