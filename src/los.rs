//! Posterior over monotonic line-of-sight extinction profiles.

use crate::error::{LosError, Result};
use crate::img_stack::ImgStack;
use crate::model::LogDensity;
use crate::random::RandomSource;

/// Integrals below this multiple of `p0` are softened.
const SOFTENING_CUTOFF: f64 = 1e5;

/// Log-posterior of a cumulative reddening profile given a stack of stellar
/// (distance, reddening) posterior densities.
///
/// A profile has `n_regions + 1` entries: the reddening at the region
/// boundaries along the line of sight.
#[derive(Debug, Clone)]
pub struct LosModel<'a> {
    img_stack: &'a ImgStack,
    n_regions: usize,
    p0: f64,
    ln_p0: f64,
    ebv_max: f64,
}

impl<'a> LosModel<'a> {
    /// `ebv_max <= 0` disables the soft prior on total reddening.
    pub fn new(img_stack: &'a ImgStack, n_regions: usize, p0: f64, ebv_max: f64) -> Result<Self> {
        let bins = img_stack.rect().n_bins()[0];
        if n_regions == 0 || bins % n_regions != 0 {
            return Err(LosError::RegionMismatch {
                bins,
                regions: n_regions,
            });
        }
        if !(p0.is_finite() && p0 > 0.) {
            return Err(LosError::InvalidSoftening(p0));
        }
        Ok(Self {
            img_stack,
            n_regions,
            p0,
            ln_p0: p0.ln(),
            ebv_max,
        })
    }

    pub fn set_p0(&mut self, p0: f64) -> Result<()> {
        if !(p0.is_finite() && p0 > 0.) {
            return Err(LosError::InvalidSoftening(p0));
        }
        self.p0 = p0;
        self.ln_p0 = p0.ln();
        Ok(())
    }

    pub fn p0(&self) -> f64 {
        self.p0
    }

    pub fn ln_p0(&self) -> f64 {
        self.ln_p0
    }

    pub fn ebv_max(&self) -> f64 {
        self.ebv_max
    }

    pub fn n_regions(&self) -> usize {
        self.n_regions
    }

    pub fn img_stack(&self) -> &ImgStack {
        self.img_stack
    }

    /// Upper bound on reddening given by the raster grid.
    pub fn ebv_ceiling(&self) -> f64 {
        self.img_stack.rect().max()[1]
    }

    pub fn log_posterior(&self, profile: &[f64]) -> f64 {
        let Some(&last) = profile.last() else {
            return f64::NEG_INFINITY;
        };
        if profile.iter().any(|v| !v.is_finite()) {
            return f64::NEG_INFINITY;
        }
        if last >= self.ebv_ceiling() || profile[0] < 0. {
            return f64::NEG_INFINITY;
        }
        if profile.windows(2).any(|w| w[1] < w[0]) {
            return f64::NEG_INFINITY;
        }

        let Ok(line_int) = self.img_stack.line_integral(profile, self.n_regions) else {
            return f64::NEG_INFINITY;
        };

        let mut lnp: f64 = line_int
            .into_iter()
            .map(|integral| {
                if integral < SOFTENING_CUTOFF * self.p0 {
                    (integral + self.p0 * (-integral / self.p0).exp()).ln()
                } else {
                    integral.ln()
                }
            })
            .sum();

        if self.ebv_max > 0. && last > self.ebv_max {
            let excess = (last - self.ebv_max) / self.ebv_max;
            lnp -= 0.5 * excess * excess;
        }
        lnp
    }

    /// Draw a random non-decreasing profile inside the grid.
    ///
    /// Increments are `0.5 * mu * chi2(2)` with `mu = ceiling / len`; a profile
    /// reaching 95% of the ceiling is rescaled to end at 90% of it.
    pub fn propose_initial(&self, rng: &mut RandomSource, profile: &mut [f64]) {
        let Some(n) = std::num::NonZeroUsize::new(profile.len()) else {
            return;
        };
        let ceiling = self.ebv_ceiling();
        let mu = ceiling / n.get() as f64;

        let mut total = 0.;
        for value in profile.iter_mut() {
            total += 0.5 * mu * rng.chi_square(2.);
            *value = total;
        }

        if total >= 0.95 * ceiling {
            let factor = 0.9 * ceiling / total;
            profile.iter_mut().for_each(|v| *v *= factor);
        }
    }
}

impl LogDensity for LosModel<'_> {
    fn dim(&self) -> usize {
        self.n_regions + 1
    }

    fn log_density(&self, position: &[f64]) -> f64 {
        self.log_posterior(position)
    }

    fn init_position(&self, rng: &mut RandomSource, position: &mut [f64]) {
        self.propose_initial(rng, position)
    }
}
