use crate::error::{LosError, Result};
use crate::random::RandomSource;

/// The Goodman & Weare stretch proposal.
///
/// A walker `x` moves along the line through a complementary walker `c` to
/// `y = c + z (x - c)`, where `z` has density proportional to `1/sqrt(z)` on
/// `[1/a, a]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchMove {
    a: f64,
}

impl Default for StretchMove {
    fn default() -> Self {
        Self { a: 2.0 }
    }
}

impl StretchMove {
    pub fn new(a: f64) -> Result<Self> {
        if !(a.is_finite() && a > 1.0) {
            return Err(LosError::InvalidScale(a));
        }
        Ok(Self { a })
    }

    pub fn scale(&self) -> f64 {
        self.a
    }

    /// A move with width `1 + factor (a - 1)`.
    pub fn scaled(&self, factor: f64) -> Result<Self> {
        Self::new(1.0 + factor * (self.a - 1.0))
    }

    /// Draw the stretch factor by inverting the CDF of `g(z)`.
    pub fn sample_z(&self, rng: &mut RandomSource) -> f64 {
        let u = rng.uniform();
        ((self.a - 1.0) * u + 1.0).powi(2) / self.a
    }

    /// Metropolis acceptance probability `min(1, z^(dim-1) exp((new - old) / T))`.
    pub fn acceptance_probability(
        &self,
        z: f64,
        dim: usize,
        log_prob_old: f64,
        log_prob_new: f64,
        temperature: f64,
    ) -> f64 {
        if !log_prob_new.is_finite() {
            return 0.0;
        }
        let log_ratio =
            (dim as f64 - 1.0) * z.ln() + (log_prob_new - log_prob_old) / temperature;
        if log_ratio >= 0.0 {
            1.0
        } else {
            log_ratio.exp()
        }
    }

    /// Write `c + z (x - c)` into `out`.
    pub fn propose(z: f64, current: &[f64], complement: &[f64], out: &mut [f64]) {
        for ((y, &x), &c) in out.iter_mut().zip(current).zip(complement) {
            *y = c + z * (x - c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StretchMove;
    use crate::{error::LosError, random::RandomSource};
    use approx::assert_abs_diff_eq;

    #[test]
    fn scale_must_exceed_one() {
        assert!(matches!(StretchMove::new(1.0), Err(LosError::InvalidScale(_))));
        assert!(StretchMove::new(f64::NAN).is_err());
        let stretch = StretchMove::new(3.0).unwrap();
        assert_abs_diff_eq!(stretch.scaled(0.5).unwrap().scale(), 2.0);
        assert!(stretch.scaled(0.0).is_err());
    }

    #[test]
    fn sample_z_range() {
        let stretch = StretchMove::new(2.5).unwrap();
        let mut rng = RandomSource::seed_from_u64(42);
        for _ in 0..10_000 {
            let z = stretch.sample_z(&mut rng);
            assert!((1.0 / 2.5..=2.5).contains(&z));
        }
    }

    #[test]
    fn sample_z_mean() {
        // E[z] = (a^2 + a + 1) / (3a) for g(z) ~ 1/sqrt(z) on [1/a, a]
        let stretch = StretchMove::default();
        let mut rng = RandomSource::seed_from_u64(7);
        let n = 100_000;
        let mean = (0..n).map(|_| stretch.sample_z(&mut rng)).sum::<f64>() / n as f64;
        assert_abs_diff_eq!(mean, 7. / 6., epsilon = 0.01);
    }

    #[test]
    fn acceptance() {
        let stretch = StretchMove::default();
        assert_eq!(stretch.acceptance_probability(1.0, 3, -1.0, f64::NEG_INFINITY, 1.0), 0.0);
        assert_eq!(stretch.acceptance_probability(1.0, 3, -1.0, f64::NAN, 1.0), 0.0);
        assert_eq!(stretch.acceptance_probability(1.0, 3, -2.0, -1.0, 1.0), 1.0);
        assert_abs_diff_eq!(
            stretch.acceptance_probability(1.0, 3, -1.0, -2.0, 1.0),
            (-1f64).exp()
        );
        assert_abs_diff_eq!(
            stretch.acceptance_probability(1.0, 3, -1.0, -2.0, 2.0),
            (-0.5f64).exp()
        );
        assert_abs_diff_eq!(
            stretch.acceptance_probability(0.5, 3, -1.0, -1.0, 1.0),
            0.25,
            epsilon = 1e-12
        );
    }

    #[test]
    fn proposal_is_on_the_line() {
        let mut out = [0.; 2];
        StretchMove::propose(2.0, &[1.0, 2.0], &[0.0, 1.0], &mut out);
        assert_eq!(out, [2.0, 3.0]);
        StretchMove::propose(1.0, &[1.0, 2.0], &[5.0, -1.0], &mut out);
        assert_eq!(out, [1.0, 2.0]);
    }
}
