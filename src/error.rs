use thiserror::Error;

use crate::fit::MAX_PEAKS_TO_FIT;

/// Failures raised by the inversion and fitting routines.
///
/// Numerical failures carry the intermediate value that tripped them so the caller can
/// display it. Nothing is clamped silently.
#[derive(Debug, Error)]
pub enum Error {
    #[error("requested {requested} peaks, at most {} can be fit", MAX_PEAKS_TO_FIT)]
    TooManyPeaksRequested { requested: usize },
    #[error("at least one peak must be requested")]
    NoPeaksRequested,
    #[error("scan has no usable channels with a positive count")]
    EmptySignal,
    #[error("fit of {peaks} peaks did not converge after {iterations} iterations (cost {cost:.3e})")]
    FitDidNotConverge {
        peaks: usize,
        iterations: u64,
        cost: f64,
    },
    #[error("diameter {diameter_nm:.1} nm left the plausible range, check flows and voltage")]
    DivergedRange { diameter_nm: f64 },
    #[error("mobility inversion exceeded {iterations} iterations (last diameter {diameter_nm:.1} nm)")]
    TooManyIterations { iterations: usize, diameter_nm: f64 },
    #[error("electrical mobility must be positive and finite, got {0}")]
    InvalidMobility(f64),
    #[error("invalid scan signal: {0}")]
    InvalidSignal(String),
    #[error("invalid instrument setup: {0}")]
    InvalidSetup(String),
    #[error(transparent)]
    Solver(#[from] argmin::core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed configuration: {0}")]
    Config(#[from] toml::de::Error),
}
