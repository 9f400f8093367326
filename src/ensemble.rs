//! Parallel affine-invariant ensemble sampler.
//!
//! The ensemble is split into two halves. Each iteration first moves every
//! walker of the lower half using complements from the upper half, then the
//! other way round. Within a half, walkers are cut into contiguous chunks;
//! worker `t` of the thread pool always owns chunk `t` of both halves and is
//! the only one that touches them, with its own random stream.

use std::ops::Range;

use log::info;
use rand::{Rng, RngCore};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::chain::Chain;
use crate::error::{LosError, Result};
use crate::model::LogDensity;
use crate::random::RandomSource;
use crate::stretch::StretchMove;
use crate::stretch_adapt::{DualAverage, DualAverageOptions, RunningMean};

const MAX_INIT_ATTEMPTS: usize = 100;

/// Options for one call of [`EnsembleSampler::step`].
#[derive(Debug, Clone, Copy)]
pub struct StepOptions {
    pub num_steps: usize,
    /// Append every iteration to the chain.
    pub record: bool,
    /// Multiplies the width of the stretch move: `a' = 1 + scale_factor (a - 1)`.
    pub scale_factor: f64,
    pub temperature: f64,
    /// Tune the stretch scale toward this acceptance rate. Ignored while recording.
    pub target_acceptance: Option<f64>,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            num_steps: 1,
            record: true,
            scale_factor: 1.,
            temperature: 1.,
            target_acceptance: None,
        }
    }
}

impl StepOptions {
    pub fn burn_in(num_steps: usize, scale_factor: f64) -> Self {
        Self {
            num_steps,
            record: false,
            scale_factor,
            ..Default::default()
        }
    }

    pub fn recorded(num_steps: usize, scale_factor: f64) -> Self {
        Self {
            num_steps,
            record: true,
            scale_factor,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.) {
            return Err(LosError::InvalidStepOptions(format!(
                "scale factor must be positive, got {}",
                self.scale_factor
            )));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.) {
            return Err(LosError::InvalidStepOptions(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        if let Some(target) = self.target_acceptance {
            if !(target > 0. && target < 1.) {
                return Err(LosError::InvalidStepOptions(format!(
                    "target acceptance must lie in (0, 1), got {}",
                    target
                )));
            }
        }
        Ok(())
    }
}

/// Acceptance and progress summary of an ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleStats {
    /// Acceptance fraction of every worker since the last clear.
    pub worker_acceptance: Vec<f64>,
    /// Proposals made by every worker since the last clear.
    pub worker_proposals: Vec<u64>,
    pub acceptance: f64,
    pub best_log_prob: f64,
    pub recorded: usize,
    pub scale: f64,
}

struct WorkerState {
    rng: RandomSource,
    accepted: u64,
    proposed: u64,
    iter_accept: RunningMean,
    proposal: Vec<f64>,
}

impl WorkerState {
    fn new(rng: RandomSource, dim: usize) -> Self {
        Self {
            rng,
            accepted: 0,
            proposed: 0,
            iter_accept: RunningMean::default(),
            proposal: vec![0.; dim],
        }
    }

    fn acceptance(&self) -> f64 {
        if self.proposed == 0 {
            0.
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}

/// Parameters shared by all workers during one half pass.
#[derive(Clone, Copy)]
struct Move {
    stretch: StretchMove,
    bandwidth: f64,
    temperature: f64,
    dim: usize,
}

impl Move {
    /// Advance every walker in `positions` using complements drawn from `complement`.
    fn update_chunk<F: LogDensity>(
        &self,
        target: &F,
        worker: &mut WorkerState,
        positions: &mut [f64],
        log_probs: &mut [f64],
        complement: &[f64],
    ) {
        let dim = self.dim;
        let n_complement = complement.len() / dim;
        let window = ((self.bandwidth * n_complement as f64).ceil() as usize).clamp(1, n_complement);
        let offset = worker.rng.random_range(0..n_complement);

        for (position, log_prob) in positions.chunks_exact_mut(dim).zip(log_probs.iter_mut()) {
            let pick = (offset + worker.rng.random_range(0..window)) % n_complement;
            let other = &complement[pick * dim..(pick + 1) * dim];
            let z = self.stretch.sample_z(&mut worker.rng);
            StretchMove::propose(z, position, other, &mut worker.proposal);

            let proposed_lp = target.log_density(&worker.proposal);
            let p_accept = self.stretch.acceptance_probability(
                z,
                dim,
                *log_prob,
                proposed_lp,
                self.temperature,
            );
            worker.iter_accept.add(p_accept);
            worker.proposed += 1;
            if worker.rng.uniform() < p_accept {
                position.copy_from_slice(&worker.proposal);
                *log_prob = proposed_lp;
                worker.accepted += 1;
            }
        }
    }
}

/// An ensemble of walkers exploring a [`LogDensity`] with stretch moves.
pub struct EnsembleSampler<F: LogDensity> {
    target: F,
    n_walkers: usize,
    dim: usize,
    stretch: StretchMove,
    bandwidth: f64,
    positions: Vec<f64>,
    log_probs: Vec<f64>,
    workers: Vec<WorkerState>,
    pool: ThreadPool,
    chain: Chain,
}

impl<F: LogDensity> EnsembleSampler<F> {
    /// Start `n_walkers` walkers at positions drawn from `target.init_position`.
    ///
    /// Worker streams are derived from `rng`, so a seeded `rng` makes the
    /// whole run reproducible regardless of thread scheduling.
    pub fn new(target: F, n_walkers: usize, n_threads: usize, rng: &mut RandomSource) -> Result<Self> {
        let dim = target.dim();
        if dim == 0 {
            return Err(LosError::ZeroDimension);
        }
        if n_walkers < 2 {
            return Err(LosError::TooFewWalkers(n_walkers));
        }
        if n_threads == 0 {
            return Err(LosError::NoThreads);
        }

        let mut positions = vec![0f64; n_walkers * dim];
        let mut log_probs = vec![f64::NEG_INFINITY; n_walkers];
        for (walker, (position, log_prob)) in positions
            .chunks_exact_mut(dim)
            .zip(log_probs.iter_mut())
            .enumerate()
        {
            let mut attempts = 0;
            while !log_prob.is_finite() {
                if attempts == MAX_INIT_ATTEMPTS {
                    return Err(LosError::InitializationFailed(walker));
                }
                target.init_position(rng, position);
                *log_prob = target.log_density(position);
                attempts += 1;
            }
        }

        let seed = rng.next_u64();
        let workers = (0..n_threads)
            .map(|t| WorkerState::new(RandomSource::with_stream(seed, t as u64), dim))
            .collect();

        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("los-worker-{}", i))
            .build()?;

        Ok(Self {
            target,
            n_walkers,
            dim,
            stretch: StretchMove::default(),
            bandwidth: 1.,
            positions,
            log_probs,
            workers,
            pool,
            chain: Chain::new(n_walkers, dim),
        })
    }

    pub fn set_scale(&mut self, a: f64) -> Result<()> {
        self.stretch = StretchMove::new(a)?;
        Ok(())
    }

    pub fn scale(&self) -> f64 {
        self.stretch.scale()
    }

    /// Restrict each proposal to a random window covering the fraction
    /// `bandwidth` of the complementary half.
    pub fn set_replacement_bandwidth(&mut self, bandwidth: f64) -> Result<()> {
        if !(bandwidth > 0. && bandwidth <= 1.) {
            return Err(LosError::InvalidBandwidth(bandwidth));
        }
        self.bandwidth = bandwidth;
        Ok(())
    }

    pub fn replacement_bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// The two halves of the ensemble with the number of walkers per
    /// worker chunk in each. Chunk `t` of a half belongs to worker `t`.
    fn halves(&self) -> [(Range<usize>, usize); 2] {
        let half = self.n_walkers / 2;
        [0..half, half..self.n_walkers].map(|range| {
            let chunk = range.len().div_ceil(self.workers.len()).max(1);
            (range, chunk)
        })
    }

    /// The walker index ranges owned by every worker.
    pub fn partitions(&self) -> Vec<Vec<Range<usize>>> {
        let mut owned = vec![Vec::new(); self.workers.len()];
        for (range, chunk) in self.halves() {
            for (t, start) in range.clone().step_by(chunk).enumerate() {
                owned[t].push(start..(start + chunk).min(range.end));
            }
        }
        owned
    }

    /// Run `options.num_steps` iterations. Returns once every worker is done.
    pub fn step(&mut self, options: &StepOptions) -> Result<()> {
        options.validate()?;
        let mut adapt = match options.target_acceptance {
            Some(_) if !options.record => {
                Some(DualAverage::new(DualAverageOptions::default(), self.stretch))
            }
            _ => None,
        };
        if options.record {
            self.chain.reserve(options.num_steps);
        }

        let dim = self.dim;
        let [(lower, chunk_lo), (_, chunk_hi)] = self.halves();
        let split = lower.end * dim;

        for _ in 0..options.num_steps {
            let base = adapt.as_ref().map_or(self.stretch, |a| a.current());
            let mv = Move {
                stretch: base.scaled(options.scale_factor)?,
                bandwidth: self.bandwidth,
                temperature: options.temperature,
                dim,
            };

            let target = &self.target;
            let workers = &mut self.workers;
            workers.iter_mut().for_each(|w| w.iter_accept.reset());
            let (pos_lo, pos_hi) = self.positions.split_at_mut(split);
            let (lp_lo, lp_hi) = self.log_probs.split_at_mut(split / dim);

            self.pool.install(|| {
                half_pass(&mv, target, workers, &mut *pos_lo, lp_lo, &*pos_hi, chunk_lo);
                half_pass(&mv, target, workers, pos_hi, lp_hi, &*pos_lo, chunk_hi);
            });

            if let (Some(adapt), Some(goal)) = (adapt.as_mut(), options.target_acceptance) {
                let mut accept = RunningMean::default();
                self.workers.iter().for_each(|w| accept.merge(&w.iter_accept));
                adapt.advance(accept.current(), goal);
            }
            if options.record {
                self.chain.push(&self.positions, &self.log_probs);
            }
        }

        if let Some(adapt) = adapt {
            self.stretch = adapt.adapted();
        }
        Ok(())
    }

    /// Drop the recorded chain and the acceptance counters. Walkers stay put.
    pub fn clear(&mut self) {
        self.chain.clear();
        for worker in self.workers.iter_mut() {
            worker.accepted = 0;
            worker.proposed = 0;
        }
    }

    pub fn gelman_rubin(&self) -> Vec<f64> {
        self.chain.gelman_rubin()
    }

    pub fn gelman_rubin_into(&self, out: &mut [f64]) {
        self.chain.gelman_rubin_into(out)
    }

    pub fn n_walkers(&self) -> usize {
        self.n_walkers
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_threads(&self) -> usize {
        self.workers.len()
    }

    pub fn target(&self) -> &F {
        &self.target
    }

    /// Current walker positions, walker-major.
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn position(&self, walker: usize) -> &[f64] {
        &self.positions[walker * self.dim..(walker + 1) * self.dim]
    }

    pub fn log_probs(&self) -> &[f64] {
        &self.log_probs
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn take_chain(&mut self) -> Chain {
        std::mem::replace(&mut self.chain, Chain::new(self.n_walkers, self.dim))
    }

    /// Accepted over proposed moves since the last clear, across all workers.
    pub fn acceptance_fraction(&self) -> f64 {
        let (accepted, proposed) = self
            .workers
            .iter()
            .fold((0, 0), |(a, p), w| (a + w.accepted, p + w.proposed));
        if proposed == 0 {
            0.
        } else {
            accepted as f64 / proposed as f64
        }
    }

    pub fn stats(&self) -> EnsembleStats {
        let current_best = self
            .log_probs
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let recorded_best = self.chain.best().map_or(f64::NEG_INFINITY, |(_, lp)| lp);
        EnsembleStats {
            worker_acceptance: self.workers.iter().map(WorkerState::acceptance).collect(),
            worker_proposals: self.workers.iter().map(|w| w.proposed).collect(),
            acceptance: self.acceptance_fraction(),
            best_log_prob: current_best.max(recorded_best),
            recorded: self.chain.len(),
            scale: self.stretch.scale(),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            "ensemble of {} walkers in {} dimensions, stretch scale {:.3}",
            self.n_walkers,
            self.dim,
            stats.scale
        );
        info!(
            "acceptance {:.3}, best log density {:.4}, {} recorded iterations",
            stats.acceptance, stats.best_log_prob, stats.recorded
        );
        for (t, acceptance) in stats.worker_acceptance.iter().enumerate() {
            info!("worker {}: acceptance {:.3}", t, acceptance);
        }
        if !self.chain.is_empty() {
            let r_hat = self.gelman_rubin();
            info!("Gelman-Rubin: {:.4?}", r_hat);
        }
    }
}

/// Update one half of the ensemble in parallel, chunk `t` going to worker `t`.
fn half_pass<F: LogDensity>(
    mv: &Move,
    target: &F,
    workers: &mut [WorkerState],
    positions: &mut [f64],
    log_probs: &mut [f64],
    complement: &[f64],
    chunk: usize,
) {
    positions
        .par_chunks_mut(chunk * mv.dim)
        .zip(log_probs.par_chunks_mut(chunk))
        .zip(workers.par_iter_mut())
        .for_each(|((positions, log_probs), worker)| {
            mv.update_chunk(target, worker, positions, log_probs, complement)
        });
}

#[cfg(test)]
mod tests {
    use super::{EnsembleSampler, StepOptions};
    use crate::{error::LosError, model::test_logps::NormalLogp, random::RandomSource};
    use pretty_assertions::assert_eq;

    fn sampler(n_walkers: usize, n_threads: usize, seed: u64) -> EnsembleSampler<NormalLogp> {
        let target = NormalLogp::new(vec![1., -2., 3.], 0.5).with_init_offset(1.);
        let mut rng = RandomSource::seed_from_u64(seed);
        EnsembleSampler::new(target, n_walkers, n_threads, &mut rng).unwrap()
    }

    #[test]
    fn construction_errors() {
        let mut rng = RandomSource::seed_from_u64(1);
        let target = NormalLogp::new(vec![], 1.);
        assert!(matches!(
            EnsembleSampler::new(target, 10, 1, &mut rng),
            Err(LosError::ZeroDimension)
        ));
        let target = NormalLogp::new(vec![0.], 1.);
        assert!(matches!(
            EnsembleSampler::new(&target, 1, 1, &mut rng),
            Err(LosError::TooFewWalkers(1))
        ));
        assert!(matches!(
            EnsembleSampler::new(&target, 4, 0, &mut rng),
            Err(LosError::NoThreads)
        ));
    }

    #[test]
    fn setters_validate() {
        let mut sampler = sampler(8, 2, 3);
        assert!(sampler.set_scale(1.).is_err());
        sampler.set_scale(1.5).unwrap();
        assert_eq!(sampler.scale(), 1.5);
        assert!(sampler.set_replacement_bandwidth(0.).is_err());
        assert!(sampler.set_replacement_bandwidth(1.5).is_err());
        sampler.set_replacement_bandwidth(0.25).unwrap();

        let bad = StepOptions {
            scale_factor: 0.,
            ..Default::default()
        };
        assert!(matches!(sampler.step(&bad), Err(LosError::InvalidStepOptions(_))));
        let bad = StepOptions {
            temperature: -1.,
            ..Default::default()
        };
        assert!(sampler.step(&bad).is_err());
    }

    #[test]
    fn partitions_cover_every_walker_once() {
        for (n_walkers, n_threads) in [(2, 1), (7, 3), (30, 4), (10, 8), (5, 16)] {
            let sampler = sampler(n_walkers, n_threads, 5);
            let partitions = sampler.partitions();
            assert_eq!(partitions.len(), n_threads);
            let mut seen = vec![0; n_walkers];
            for ranges in &partitions {
                assert!(ranges.len() <= 2);
                for range in ranges {
                    assert!(!range.is_empty());
                    range.clone().for_each(|w| seen[w] += 1);
                }
            }
            assert_eq!(seen, vec![1; n_walkers]);
        }
    }

    #[test]
    fn workers_move_only_their_partitions() {
        for (n_walkers, n_threads) in [(2, 1), (7, 3), (30, 4), (10, 8), (5, 16), (9, 2)] {
            let mut sampler = sampler(n_walkers, n_threads, 13);
            sampler.step(&StepOptions::burn_in(3, 1.)).unwrap();
            let stats = sampler.stats();
            let owned: Vec<u64> = sampler
                .partitions()
                .iter()
                .map(|ranges| 3 * ranges.iter().map(|r| r.len() as u64).sum::<u64>())
                .collect();
            assert_eq!(stats.worker_proposals, owned);
            assert_eq!(owned.iter().sum::<u64>(), 3 * n_walkers as u64);
        }
    }

    #[test]
    fn step_and_clear_keep_the_ensemble() {
        let mut sampler = sampler(11, 3, 7);
        sampler.step(&StepOptions::recorded(20, 1.)).unwrap();
        assert_eq!(sampler.chain().len(), 20);
        assert_eq!(sampler.chain().n_walkers(), 11);
        assert_eq!(sampler.positions().len(), 33);
        assert!(sampler.log_probs().iter().all(|lp| lp.is_finite()));
        assert!(sampler.acceptance_fraction() > 0.);

        let before = sampler.positions().to_vec();
        sampler.clear();
        assert!(sampler.chain().is_empty());
        assert_eq!(sampler.positions(), &before[..]);
        assert_eq!(sampler.acceptance_fraction(), 0.);

        sampler.step(&StepOptions::burn_in(5, 0.5)).unwrap();
        assert!(sampler.chain().is_empty());
        assert_eq!(sampler.n_walkers(), 11);
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let mut a = sampler(16, 4, 11);
        let mut b = sampler(16, 4, 11);
        let options = StepOptions::recorded(50, 1.);
        a.step(&options).unwrap();
        b.step(&options).unwrap();
        assert_eq!(a.positions(), b.positions());
        assert_eq!(a.chain(), b.chain());
    }

    #[test]
    fn converges_on_gaussian() {
        let mut sampler = sampler(24, 2, 13);
        sampler.set_replacement_bandwidth(0.75).unwrap();
        sampler.step(&StepOptions::burn_in(500, 1.)).unwrap();
        sampler.clear();
        sampler.step(&StepOptions::recorded(2000, 1.)).unwrap();

        let r_hat = sampler.gelman_rubin();
        assert!(r_hat.iter().all(|&r| r < 1.2), "r_hat {:?}", r_hat);

        let stats = sampler.chain().stats();
        let mu = sampler.target().mu().to_vec();
        for ((mean, std), mu) in stats.mean.iter().zip(&stats.std).zip(mu) {
            assert!((mean - mu).abs() < 0.1, "mean {} vs {}", mean, mu);
            assert!((std - 0.5).abs() < 0.1, "std {}", std);
        }
        let acceptance = sampler.acceptance_fraction();
        assert!(acceptance > 0.2 && acceptance < 0.9);
    }

    #[test]
    fn adaptation_moves_toward_target_acceptance() {
        let mut sampler = sampler(24, 2, 17);
        sampler.set_scale(8.).unwrap();
        sampler.step(&StepOptions::burn_in(200, 1.)).unwrap();
        let wide = sampler.acceptance_fraction();
        sampler.clear();

        let adapt = StepOptions {
            target_acceptance: Some(0.5),
            ..StepOptions::burn_in(500, 1.)
        };
        sampler.step(&adapt).unwrap();
        assert!(sampler.scale() < 8.);
        sampler.clear();
        sampler.step(&StepOptions::burn_in(200, 1.)).unwrap();
        assert!(sampler.acceptance_fraction() > wide);
    }
}
