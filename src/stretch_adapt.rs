//! Dual averaging of the stretch-move width during unrecorded steps.
//!
//! Adaptation is opt-in: it runs only when a [`crate::StepOptions`] carries a
//! `target_acceptance`, which the LOS driver sets for its full-width burn-in
//! stages when `LosSettings::burn_in_target_acceptance` is given. By default
//! every stage uses the fixed scale.
//!
//! The adapted quantity is `log(a - 1)`, so every iterate maps back to a
//! valid scale `a > 1`.

use crate::stretch::StretchMove;

/// Settings for stretch scale adaptation.
#[derive(Debug, Clone, Copy)]
pub struct DualAverageOptions {
    /// Decay exponent of the iterate average.
    pub k: f64,
    /// Iterations that damp the first error updates.
    pub t0: f64,
    /// Step size of the primal update.
    pub gamma: f64,
    /// Iterates shrink toward `log(shrink_factor * (a0 - 1))`.
    pub shrink_factor: f64,
}

impl Default for DualAverageOptions {
    fn default() -> Self {
        Self {
            k: 0.75,
            t0: 10.,
            gamma: 0.05,
            shrink_factor: 10.,
        }
    }
}

/// Acceptance-driven tuning of the stretch width on a log scale.
#[derive(Debug, Clone)]
pub struct DualAverage {
    options: DualAverageOptions,
    /// Log width proposed for the next iteration.
    x: f64,
    /// Weighted average of past iterates.
    x_bar: f64,
    /// Running average of `target - acceptance`.
    error: f64,
    shrink_to: f64,
    iterations: u64,
}

impl DualAverage {
    pub fn new(options: DualAverageOptions, initial: StretchMove) -> Self {
        let x = (initial.scale() - 1.).ln();
        Self {
            options,
            x,
            x_bar: x,
            error: 0.,
            shrink_to: x + options.shrink_factor.ln(),
            iterations: 0,
        }
    }

    /// Record the mean acceptance probability of one iteration.
    pub fn advance(&mut self, acceptance: f64, target: f64) {
        let DualAverageOptions { k, t0, gamma, .. } = self.options;
        let t = (self.iterations + 1) as f64;
        let w = (t + t0).recip();
        self.error += w * (target - acceptance - self.error);
        self.x = self.shrink_to - t.sqrt() / gamma * self.error;
        let eta = t.powf(-k);
        self.x_bar += eta * (self.x - self.x_bar);
        self.iterations += 1;
    }

    /// The move to use for the next iteration.
    pub fn current(&self) -> StretchMove {
        to_move(self.x)
    }

    /// The averaged move to keep once adaptation stops.
    pub fn adapted(&self) -> StretchMove {
        to_move(self.x_bar)
    }

    pub fn count(&self) -> u64 {
        self.iterations
    }
}

fn to_move(log_width: f64) -> StretchMove {
    let width = log_width.exp().clamp(1e-8, 1e8);
    StretchMove::new(1. + width).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn merge(&mut self, other: &RunningMean) {
        self.sum += other.sum;
        self.count += other.count;
    }

    /// The mean, or NaN before the first value.
    pub fn current(&self) -> f64 {
        self.sum / self.count as f64
    }

    pub fn reset(&mut self) {
        self.sum = 0.;
        self.count = 0;
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::{DualAverage, DualAverageOptions, RunningMean};
    use crate::stretch::StretchMove;
    use approx::assert_abs_diff_eq;

    #[test]
    fn starts_at_initial_scale() {
        let adapt = DualAverage::new(DualAverageOptions::default(), StretchMove::new(2.5).unwrap());
        assert_abs_diff_eq!(adapt.current().scale(), 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(adapt.adapted().scale(), 2.5, epsilon = 1e-12);
        assert_eq!(adapt.count(), 0);
    }

    #[test]
    fn low_acceptance_narrows_the_move() {
        let initial = StretchMove::new(3.0).unwrap();
        let mut adapt = DualAverage::new(DualAverageOptions::default(), initial);
        for _ in 0..200 {
            adapt.advance(0.05, 0.3);
        }
        assert!(adapt.adapted().scale() < initial.scale());
        assert!(adapt.adapted().scale() > 1.);
    }

    #[test]
    fn high_acceptance_widens_the_move() {
        let initial = StretchMove::new(1.5).unwrap();
        let mut adapt = DualAverage::new(DualAverageOptions::default(), initial);
        for _ in 0..200 {
            adapt.advance(0.95, 0.3);
        }
        assert!(adapt.adapted().scale() > initial.scale());
    }

    #[test]
    fn running_mean() {
        let mut mean = RunningMean::default();
        assert!(mean.current().is_nan());
        mean.add(1.);
        mean.add(0.);
        let mut other = RunningMean::default();
        other.add(1.);
        mean.merge(&other);
        assert_eq!(mean.count(), 3);
        assert_abs_diff_eq!(mean.current(), 2. / 3.);
        mean.reset();
        assert_eq!(mean.count(), 0);
    }
}
