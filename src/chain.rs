//! Recorded walker history and convergence diagnostics.

use itertools::Itertools;

/// Iteration-major record of every walker's position and log density.
///
/// Draw `(iter, walker)` occupies `draws[(iter * n_walkers + walker) * dim..][..dim]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    n_walkers: usize,
    dim: usize,
    draws: Vec<f64>,
    log_probs: Vec<f64>,
}

/// Posterior summary of a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStats {
    pub n_draws: usize,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub best_log_prob: f64,
    pub best_position: Vec<f64>,
}

impl Chain {
    pub fn new(n_walkers: usize, dim: usize) -> Self {
        Self {
            n_walkers,
            dim,
            draws: Vec::new(),
            log_probs: Vec::new(),
        }
    }

    /// Append one iteration. `positions` holds `n_walkers * dim` values.
    pub fn push(&mut self, positions: &[f64], log_probs: &[f64]) {
        assert_eq!(positions.len(), self.n_walkers * self.dim);
        assert_eq!(log_probs.len(), self.n_walkers);
        self.draws.extend_from_slice(positions);
        self.log_probs.extend_from_slice(log_probs);
    }

    pub fn reserve(&mut self, iterations: usize) {
        self.draws.reserve(iterations * self.n_walkers * self.dim);
        self.log_probs.reserve(iterations * self.n_walkers);
    }

    pub fn clear(&mut self) {
        self.draws.clear();
        self.log_probs.clear();
    }

    /// Number of recorded iterations.
    pub fn len(&self) -> usize {
        if self.n_walkers == 0 {
            0
        } else {
            self.log_probs.len() / self.n_walkers
        }
    }

    pub fn is_empty(&self) -> bool {
        self.log_probs.is_empty()
    }

    /// Number of recorded draws over all walkers.
    pub fn n_draws(&self) -> usize {
        self.log_probs.len()
    }

    pub fn n_walkers(&self) -> usize {
        self.n_walkers
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn draw(&self, iter: usize, walker: usize) -> &[f64] {
        let start = (iter * self.n_walkers + walker) * self.dim;
        &self.draws[start..start + self.dim]
    }

    pub fn log_prob(&self, iter: usize, walker: usize) -> f64 {
        self.log_probs[iter * self.n_walkers + walker]
    }

    /// All draws in recording order, flattened.
    pub fn draws(&self) -> &[f64] {
        &self.draws
    }

    pub fn log_probs(&self) -> &[f64] {
        &self.log_probs
    }

    /// Iterate over `(position, log_prob)` in recording order.
    pub fn iter(&self) -> impl Iterator<Item = (&[f64], f64)> + '_ {
        self.draws
            .chunks_exact(self.dim.max(1))
            .zip(self.log_probs.iter().copied())
    }

    /// The trajectory of one coordinate of one walker.
    pub fn trajectory(&self, walker: usize, coord: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.len()).map(move |iter| self.draw(iter, walker)[coord])
    }

    pub fn mean(&self) -> Vec<f64> {
        let mut mean = vec![0f64; self.dim];
        if self.is_empty() {
            return mean;
        }
        for (position, _) in self.iter() {
            mean.iter_mut().zip(position).for_each(|(m, &x)| *m += x);
        }
        let n = self.n_draws() as f64;
        mean.iter_mut().for_each(|m| *m /= n);
        mean
    }

    /// Sample covariance over all draws, row-major `dim x dim`.
    pub fn covariance(&self) -> Vec<f64> {
        let dim = self.dim;
        let mut cov = vec![0f64; dim * dim];
        let n = self.n_draws();
        if n < 2 {
            return cov;
        }
        let mean = self.mean();
        for (position, _) in self.iter() {
            for (i, j) in (0..dim).cartesian_product(0..dim) {
                cov[i * dim + j] += (position[i] - mean[i]) * (position[j] - mean[j]);
            }
        }
        cov.iter_mut().for_each(|c| *c /= (n - 1) as f64);
        cov
    }

    /// The recorded draw with the highest log density.
    pub fn best(&self) -> Option<(&[f64], f64)> {
        self.iter()
            .filter(|(_, lp)| !lp.is_nan())
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
    }

    pub fn stats(&self) -> ChainStats {
        let cov = self.covariance();
        let std = (0..self.dim).map(|i| cov[i * self.dim + i].sqrt()).collect();
        let (best_position, best_log_prob) = match self.best() {
            Some((position, lp)) => (position.to_vec(), lp),
            None => (vec![], f64::NEG_INFINITY),
        };
        ChainStats {
            n_draws: self.n_draws(),
            mean: self.mean(),
            std,
            best_log_prob,
            best_position,
        }
    }

    pub fn gelman_rubin(&self) -> Vec<f64> {
        let mut out = vec![0f64; self.dim];
        self.gelman_rubin_into(&mut out);
        out
    }

    /// Potential scale reduction factor of every coordinate.
    ///
    /// Each walker's trajectory is one sequence. Coordinates are `inf` when
    /// fewer than two iterations or walkers are recorded, or when the
    /// within-sequence variance vanishes.
    pub fn gelman_rubin_into(&self, out: &mut [f64]) {
        assert_eq!(out.len(), self.dim);
        let n = self.len();
        let m = self.n_walkers;
        if n < 2 || m < 2 {
            out.fill(f64::INFINITY);
            return;
        }

        // Welford accumulators per (walker, coord)
        let mut means = vec![0f64; m * self.dim];
        let mut m2 = vec![0f64; m * self.dim];
        for iter in 0..n {
            let count = (iter + 1) as f64;
            for walker in 0..m {
                let acc = walker * self.dim;
                for (coord, &x) in self.draw(iter, walker).iter().enumerate() {
                    let delta = x - means[acc + coord];
                    means[acc + coord] += delta / count;
                    m2[acc + coord] += delta * (x - means[acc + coord]);
                }
            }
        }

        let n_f = n as f64;
        let m_f = m as f64;
        for (coord, r_hat) in out.iter_mut().enumerate() {
            let walker_mean = |w: usize| means[w * self.dim + coord];
            let w = (0..m).map(|w| m2[w * self.dim + coord] / (n_f - 1.)).sum::<f64>() / m_f;
            let grand = (0..m).map(walker_mean).sum::<f64>() / m_f;
            let b_over_n = (0..m)
                .map(|w| (walker_mean(w) - grand).powi(2))
                .sum::<f64>()
                / (m_f - 1.);

            *r_hat = if w > 0. {
                let var = (n_f - 1.) / n_f * w + b_over_n;
                (var / w).sqrt()
            } else {
                f64::INFINITY
            };
        }
    }
}
