//! Sampling from arbitrary one-dimensional densities by inverse-CDF lookup.

use crate::error::{LosError, Result};
use crate::random::RandomSource;

/// A scalar function of one variable, usually an (optionally log) density.
///
/// Implementations close over whatever model state they need. Closures
/// implement it directly.
pub trait ScalarDensity {
    fn evaluate(&self, x: f64) -> f64;
}

impl<F: Fn(f64) -> f64> ScalarDensity for F {
    fn evaluate(&self, x: f64) -> f64 {
        self(x)
    }
}

/// Draws from a bounded 1D density through a tabulated inverse CDF.
///
/// Setup costs `samples` density evaluations; every draw afterwards is a
/// single table interpolation.
#[derive(Debug, Clone)]
pub struct Draw1D {
    x_of_p: Box<[f64]>,
    x_min: f64,
    x_max: f64,
    rng: RandomSource,
}

impl Draw1D {
    /// Tabulate the inverse CDF of `density` on `[x_min, x_max]`.
    ///
    /// If `is_log` is set, `density` returns the log of the density. Negative
    /// or NaN density values count as zero.
    pub fn new<F: ScalarDensity + ?Sized>(
        density: &F,
        x_min: f64,
        x_max: f64,
        samples: usize,
        is_log: bool,
        rng: RandomSource,
    ) -> Result<Self> {
        if samples <= 1 {
            return Err(LosError::TooFewSamples(samples));
        }
        if !(x_min.is_finite() && x_max.is_finite() && x_max > x_min) {
            return Err(LosError::InvalidDomain {
                min: x_min,
                max: x_max,
            });
        }

        let dx = (x_max - x_min) / (samples - 1) as f64;
        let x_at = |i: usize| x_min + i as f64 * dx;

        // Left Riemann accumulation of the un-normalized CDF
        let mut p_of_x = vec![0f64; samples];
        for i in 1..samples {
            let value = density.evaluate(x_at(i - 1));
            let value = if is_log { value.exp() } else { value };
            p_of_x[i] = p_of_x[i - 1] + dx * value.max(0.);
        }

        let norm = p_of_x[samples - 1];
        if !(norm.is_finite() && norm > 0.) {
            return Err(LosError::DegenerateDensity(norm));
        }
        p_of_x.iter_mut().for_each(|p| *p /= norm);

        let dp = 1. / (samples - 1) as f64;
        let mut x_of_p = vec![0f64; samples];
        let mut k = 1;
        for (i, x) in x_of_p.iter_mut().enumerate() {
            let p = i as f64 * dp;
            while k < samples - 1 && p_of_x[k] < p {
                k += 1;
            }
            let lo = p_of_x[k - 1];
            let hi = p_of_x[k];
            let frac = if hi > lo {
                ((p - lo) / (hi - lo)).clamp(0., 1.)
            } else {
                0.
            };
            *x = x_at(k - 1) + frac * dx;
        }
        x_of_p[samples - 1] = x_max;

        Ok(Self {
            x_of_p: x_of_p.into(),
            x_min,
            x_max,
            rng,
        })
    }

    /// Interpolate the inverse CDF at probability `p` (clamped to `[0, 1]`).
    pub fn inverse_cdf(&self, p: f64) -> f64 {
        let n = self.x_of_p.len();
        let t = p.clamp(0., 1.) * (n - 1) as f64;
        let i = (t.floor() as usize).min(n - 2);
        let frac = t - i as f64;
        let x = self.x_of_p[i] + frac * (self.x_of_p[i + 1] - self.x_of_p[i]);
        x.clamp(self.x_min, self.x_max)
    }

    pub fn sample(&mut self) -> f64 {
        let u = self.rng.uniform();
        self.inverse_cdf(u)
    }

    pub fn x_min(&self) -> f64 {
        self.x_min
    }

    pub fn x_max(&self) -> f64 {
        self.x_max
    }
}
