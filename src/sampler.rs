use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};

use crate::{
    ensemble::{EnsembleSampler, StepOptions},
    img_stack::ImgStack,
    los::LosModel,
    random::RandomSource,
    storage::{ChainSink, SaveOptions},
};

/// Label of the sampled quantity in saved chains.
pub const CHAIN_LABEL: &str = "Delta E(B-V)";

/// Settings for line-of-sight extinction sampling
#[derive(Debug, Clone, Copy)]
pub struct LosSettings {
    /// Base number of recorded steps. Burn-in and extensions are fractions of it.
    pub num_steps: usize,
    /// Walkers per dimension of the profile.
    pub num_samplers: usize,
    pub num_threads: usize,
    /// Number of distance regions; the profile has `n_regions + 1` entries.
    pub n_regions: usize,
    /// Softening scale of the line integrals.
    pub p0: f64,
    /// Soft upper limit on total reddening. Disabled when not positive.
    pub ebv_max: f64,
    pub max_attempts: usize,
    /// Every Gelman-Rubin statistic must be at most this for convergence.
    pub gr_threshold: f64,
    /// Stretch move scale `a`.
    pub scale: f64,
    pub replacement_bandwidth: f64,
    /// Stretch scale factor of the recorded main run.
    pub main_scale_factor: f64,
    /// Random seed. Seeded from the clock when unset.
    pub seed: Option<u64>,
    /// Tune the stretch scale toward this acceptance rate during the
    /// full-width burn-in stages. Off by default.
    pub burn_in_target_acceptance: Option<f64>,
}

impl Default for LosSettings {
    fn default() -> Self {
        Self {
            num_steps: 800,
            num_samplers: 20,
            num_threads: 4,
            n_regions: 30,
            p0: 1e-5,
            ebv_max: -1.,
            max_attempts: 3,
            gr_threshold: 1.2,
            scale: 2.,
            replacement_bandwidth: 0.75,
            main_scale_factor: 1.,
            seed: None,
            burn_in_target_acceptance: None,
        }
    }
}

impl LosSettings {
    pub fn dim(&self) -> usize {
        self.n_regions + 1
    }

    pub fn n_walkers(&self) -> usize {
        self.num_samplers * self.dim()
    }

    /// Unrecorded burn-in: four rounds of a narrow and a full-width stage.
    pub fn burn_in_schedule(&self) -> Vec<StepOptions> {
        let narrow = StepOptions::burn_in(self.num_steps / 5, 0.5);
        let full = StepOptions {
            target_acceptance: self.burn_in_target_acceptance,
            ..StepOptions::burn_in(self.num_steps / 20, 1.)
        };
        [narrow, full].into_iter().cycle().take(8).collect()
    }

    /// Recorded steps of attempt `attempt` (counting from zero), `num_steps * 2^attempt`.
    ///
    /// `None` when the count does not fit in a `usize`.
    pub fn attempt_steps(&self, attempt: usize) -> Option<usize> {
        if self.num_steps == 0 {
            return Some(0);
        }
        u32::try_from(attempt)
            .ok()
            .and_then(|shift| 1usize.checked_shl(shift))
            .and_then(|factor| self.num_steps.checked_mul(factor))
    }

    /// The recorded run of attempt `attempt` (counting from zero).
    pub fn main_run(&self, attempt: usize) -> Option<StepOptions> {
        self.attempt_steps(attempt)
            .map(|num_steps| StepOptions::recorded(num_steps, self.main_scale_factor))
    }

    /// Unrecorded steps taken before retrying an unconverged main run.
    pub fn extension(&self) -> StepOptions {
        StepOptions::burn_in(self.num_steps / 5, 1.)
    }
}

/// Outcome of one line-of-sight run.
#[derive(Debug, Clone)]
pub struct LosSummary {
    pub group: String,
    pub converged: bool,
    pub attempts: usize,
    /// Recorded steps of the final attempt.
    pub num_steps: usize,
    pub gelman_rubin: Vec<f64>,
    pub acceptance: f64,
    pub best_log_prob: f64,
    pub mean: Vec<f64>,
    pub elapsed: Duration,
    pub sample_time: Duration,
    pub write_time: Duration,
}

/// Group path under which the chain of a pixel is saved.
pub fn los_group(healpix_index: u64) -> String {
    format!("/pixel {}/los extinction", healpix_index)
}

/// Sample the extinction profile of one pixel and save the chain to `sink`.
///
/// After a fixed burn-in, the main run is repeated with doubling length
/// until every Gelman-Rubin statistic is below `settings.gr_threshold` or
/// `settings.max_attempts` runs were made. The chain of the last run is
/// saved either way; `LosSummary::converged` reports the outcome.
pub fn sample_los_extinction<S: ChainSink + ?Sized>(
    sink: &mut S,
    settings: &LosSettings,
    img_stack: &ImgStack,
    healpix_index: u64,
) -> Result<LosSummary> {
    if settings.max_attempts == 0 {
        bail!("max_attempts must be at least 1");
    }
    if settings.attempt_steps(settings.max_attempts - 1).is_none() {
        bail!(
            "{} steps doubled over {} attempts overflows the step count",
            settings.num_steps,
            settings.max_attempts
        );
    }
    let t_start = Instant::now();
    let group = los_group(healpix_index);
    info!("line-of-sight extinction profile for pixel {}", healpix_index);

    let model = LosModel::new(img_stack, settings.n_regions, settings.p0, settings.ebv_max)
        .context("Could not set up the line-of-sight posterior")?;
    let mut rng = match settings.seed {
        Some(seed) => RandomSource::seed_from_u64(seed),
        None => RandomSource::from_clock(),
    };
    let mut sampler = EnsembleSampler::new(
        model,
        settings.n_walkers(),
        settings.num_threads,
        &mut rng,
    )
    .context("Could not initialize the ensemble")?;
    sampler.set_scale(settings.scale)?;
    sampler.set_replacement_bandwidth(settings.replacement_bandwidth)?;
    debug!(
        "{} walkers in {} dimensions on {} threads",
        sampler.n_walkers(),
        sampler.dim(),
        sampler.n_threads()
    );

    info!("burn-in ...");
    for stage in settings.burn_in_schedule() {
        sampler.step(&stage)?;
    }
    sampler.clear();

    info!("main run ...");
    let mut gelman_rubin = vec![f64::INFINITY; sampler.dim()];
    let mut converged = false;
    let mut attempts = 0;
    let mut num_steps = 0;
    while attempts < settings.max_attempts && !converged {
        let run = settings
            .main_run(attempts)
            .context("Step count of the main run overflows")?;
        num_steps = run.num_steps;
        sampler.step(&run)?;
        attempts += 1;

        sampler.gelman_rubin_into(&mut gelman_rubin);
        converged = gelman_rubin.iter().all(|&r| r <= settings.gr_threshold);
        if !converged && attempts < settings.max_attempts {
            info!("extending run ...");
            debug!("Gelman-Rubin after attempt {}: {:.3?}", attempts, gelman_rubin);
            sampler.step(&settings.extension())?;
            sampler.clear();
        }
    }
    let t_write = Instant::now();

    let stats = sampler.stats();
    let chain = sampler.take_chain();
    let options = SaveOptions::new(CHAIN_LABEL)
        .with_compression(3)
        .with_chunk_size(500);
    sink.save(&chain, &group, &options)
        .with_context(|| format!("Failed to save chain to {:?}", group))?;
    let t_end = Instant::now();

    sampler.log_stats();
    let summary = LosSummary {
        group,
        converged,
        attempts,
        num_steps,
        gelman_rubin,
        acceptance: stats.acceptance,
        best_log_prob: stats.best_log_prob,
        mean: chain.mean(),
        elapsed: t_end - t_start,
        sample_time: t_write - t_start,
        write_time: t_end - t_write,
    };

    if !summary.converged {
        warn!(
            "failed to converge after {} attempts, Gelman-Rubin {:.3?}",
            summary.attempts, summary.gelman_rubin
        );
    }
    info!("number of steps: {}", summary.num_steps);
    info!("time elapsed: {:.2} s", summary.elapsed.as_secs_f64());
    info!("sample time: {:.2} s", summary.sample_time.as_secs_f64());
    info!("write time: {:.2} s", summary.write_time.as_secs_f64());
    Ok(summary)
}
