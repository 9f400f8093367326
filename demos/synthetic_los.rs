//! Recover a known extinction profile from synthetic stellar posteriors.
//!
//! Distances are drawn from a density rising with distance modulus, every
//! star gets a reddening from the true profile plus noise, and its posterior
//! is a Gaussian blob in (distance modulus, reddening).

use anyhow::Result;
use los_sampler::{
    sample_los_extinction, CsvChainSink, Draw1D, ImgStack, LosSettings, RandomSource, Rect,
};

const N_STARS: usize = 60;
const N_REGIONS: usize = 5;
const SIGMA_DM: f64 = 0.4;
const SIGMA_EBV: f64 = 0.05;

fn true_reddening(profile: &[f64], rect: &Rect, dm: f64) -> f64 {
    let t = ((dm - rect.min()[0]) / (rect.max()[0] - rect.min()[0])).clamp(0., 1.);
    let pos = t * (profile.len() - 1) as f64;
    let i = (pos.floor() as usize).min(profile.len() - 2);
    profile[i] + (pos - i as f64) * (profile[i + 1] - profile[i])
}

fn main() -> Result<()> {
    let rect = Rect::new([4., 0.], [19., 3.], [120, 300])?;
    let profile = [0.05, 0.2, 0.45, 0.6, 0.7, 0.75];
    let mut rng = RandomSource::seed_from_u64(2012);

    let ln10 = 10f64.ln();
    let mut distances = Draw1D::new(
        &|dm: f64| 0.6 * ln10 * dm,
        rect.min()[0],
        rect.max()[0],
        1000,
        true,
        RandomSource::from_source(&mut rng),
    )?;

    let [dx, dy] = rect.dx();
    let mut stack = ImgStack::new(rect, 0);
    for _ in 0..N_STARS {
        let dm = distances.sample() + rng.gaussian(SIGMA_DM);
        let ebv = true_reddening(&profile, &rect, dm) + rng.gaussian(SIGMA_EBV);
        let image = rect.raster_from_fn(|x, y| {
            let u = (rect.min()[0] + (x as f64 + 0.5) * dx - dm) / SIGMA_DM;
            let v = (rect.min()[1] + (y as f64 + 0.5) * dy - ebv) / SIGMA_EBV;
            (-0.5 * (u * u + v * v)).exp()
        });
        stack.push_image(image)?;
    }

    let settings = LosSettings {
        num_steps: 400,
        num_samplers: 10,
        n_regions: N_REGIONS,
        seed: Some(7),
        ..Default::default()
    };
    let mut sink = CsvChainSink::new("los_demo_output");
    let summary = sample_los_extinction(&mut sink, &settings, &stack, 0)?;

    println!("converged: {} after {} attempts", summary.converged, summary.attempts);
    println!("acceptance: {:.3}", summary.acceptance);
    println!("Gelman-Rubin: {:.3?}", summary.gelman_rubin);
    println!("true profile:      {:.3?}", profile);
    println!("posterior mean:    {:.3?}", summary.mean);
    println!("chain written to {:?}", sink.file_path(&summary.group)?);
    Ok(())
}
