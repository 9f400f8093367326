use thiserror::Error;

/// Structural errors raised while building the sampler and its inputs.
///
/// Numerical problems inside the posterior are never reported here: an
/// invalid extinction profile simply has log density `-inf`.
#[derive(Error, Debug)]
pub enum LosError {
    #[error("an inverse-CDF table needs more than one sample, got {0}")]
    TooFewSamples(usize),
    #[error("invalid domain [{min}, {max}]")]
    InvalidDomain { min: f64, max: f64 },
    #[error("density integrates to {0} over the domain")]
    DegenerateDensity(f64),
    #[error("invalid rectangle: {0}")]
    InvalidRect(String),
    #[error("image {index} has shape {found:?}, expected {expected:?}")]
    ImageShape {
        index: usize,
        found: [usize; 2],
        expected: [usize; 2],
    },
    #[error("keep mask has {mask} entries but the stack holds {images} images")]
    MaskLength { mask: usize, images: usize },
    #[error("{bins} distance bins cannot be split into {regions} regions")]
    RegionMismatch { bins: usize, regions: usize },
    #[error("profile has {found} entries, expected {expected}")]
    ProfileLength { found: usize, expected: usize },
    #[error("output holds {found} integrals but the stack has {expected} images")]
    OutputLength { found: usize, expected: usize },
    #[error("softening scale must be positive, got {0}")]
    InvalidSoftening(f64),
    #[error("dimension of the target density must be positive")]
    ZeroDimension,
    #[error("ensemble needs at least two walkers, got {0}")]
    TooFewWalkers(usize),
    #[error("at least one worker thread is required")]
    NoThreads,
    #[error("stretch scale must be greater than 1, got {0}")]
    InvalidScale(f64),
    #[error("replacement bandwidth must lie in (0, 1], got {0}")]
    InvalidBandwidth(f64),
    #[error("invalid step options: {0}")]
    InvalidStepOptions(String),
    #[error("walker {0} has no finite log density after repeated initialization")]
    InitializationFailed(usize),
    #[error("compression level must be between 0 and 9, got {0}")]
    InvalidCompression(u32),
    #[error("could not start worker thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("could not read image stack")]
    Io(#[from] std::io::Error),
    #[error("malformed image stack, line {line}: {message}")]
    Parse { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, LosError>;
