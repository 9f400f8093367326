//! Bayesian inference of line-of-sight extinction profiles.
//!
//! Each star along a line of sight contributes a probability density over
//! (distance modulus, reddening), stored as a raster in an [`ImgStack`]. A
//! cumulative reddening profile is scored by integrating every raster along
//! the profile's path ([`LosModel`]), and the posterior over profiles is
//! explored with a parallel affine-invariant ensemble sampler
//! ([`EnsembleSampler`]).
//!
//! ```no_run
//! use los_sampler::{sample_los_extinction, CsvChainSink, ImgStack, LosSettings};
//!
//! # fn main() -> anyhow::Result<()> {
//! let stack = ImgStack::open("pixel_12.txt")?;
//! let settings = LosSettings {
//!     n_regions: 10,
//!     seed: Some(42),
//!     ..Default::default()
//! };
//! let mut sink = CsvChainSink::new("los_output");
//! let summary = sample_los_extinction(&mut sink, &settings, &stack, 12)?;
//! println!("converged: {}", summary.converged);
//! # Ok(())
//! # }
//! ```

mod chain;
mod draw1d;
mod ensemble;
mod error;
mod img_stack;
mod los;
mod model;
mod random;
mod sampler;
mod storage;
mod stretch;
mod stretch_adapt;

pub use chain::{Chain, ChainStats};
pub use draw1d::{Draw1D, ScalarDensity};
pub use ensemble::{EnsembleSampler, EnsembleStats, StepOptions};
pub use error::{LosError, Result};
pub use img_stack::{ImgStack, Rect};
pub use los::LosModel;
pub use model::{test_logps, LogDensity};
pub use random::RandomSource;
pub use sampler::{los_group, sample_los_extinction, LosSettings, LosSummary, CHAIN_LABEL};
pub use storage::{ChainSink, CsvChainSink, MemoryChainSink, SaveOptions, StoredChain};
pub use stretch::StretchMove;
pub use stretch_adapt::{DualAverage, DualAverageOptions, RunningMean};

pub use faer::Mat;
