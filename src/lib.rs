#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod distributions;
pub mod dma;
pub mod error;
pub mod filter;
pub mod fit;
pub mod math;
pub mod minimisation;
pub mod mobility;
pub mod peaks;
pub mod results;
pub mod scan;

pub use config::Config;
pub use error::Error;
pub use filter::{filter_channels, FilteredSignal};
pub use fit::{FitResult, PeakFitEngine, MAX_PEAKS_TO_FIT};
pub use mobility::{invert_mobility, MobilityInverter};
pub use peaks::{predict_peaks, SearchMode};
pub use scan::{PeakReport, Scan, ScanSignal};

pub type Result<T> = ::std::result::Result<T, Error>;
