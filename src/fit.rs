//! Progressive multi-peak fitting.
//!
//! A fit starts from the peaks predicted in the filtered scan. While fewer components than
//! requested are present, the converged fit is inspected for the channel it under-estimates
//! most and a new component is seeded there. Components that already exist restart each stage
//! from their fitted values, with their boxes centred on those values.
//!
//! The smoothed scan is only compared with the model on channels whose whole smoothing window is
//! usable. A stage whose solution ends against an amplitude or mean box is solved again with the
//! boxes re-centred, up to [`MAX_RECENTRES`] times.

use ndarray::Array1;

use crate::config::FitSettings;
use crate::distributions::{GaussianComponent, Mixture};
use crate::error::Error;
use crate::filter::{filter_channels, FilteredSignal};
use crate::math::{durbin_watson, masked_rms, mean, moving_average};
use crate::minimisation::{Bounds, Problem};
use crate::peaks::{predict_peaks, SearchMode};
use crate::scan::ScanSignal;
use crate::Result;

/// The most components a single scan can be decomposed into
pub const MAX_PEAKS_TO_FIT: usize = 5;

/// Initial standard deviation of a seeded component, as a fraction of the log-diameter span
const SEED_SD_FRACTION: f64 = 0.05;
/// How far a seeded mean may move, as a fraction of the log-diameter span
const MEAN_FREEDOM_FRACTION: f64 = 0.05;
const SD_MIN_FRACTION: f64 = 0.01;
const SD_MAX_FRACTION: f64 = 0.2;
const AMPLITUDE_MIN_FACTOR: f64 = 0.1;
const AMPLITUDE_MAX_FACTOR: f64 = 1.5;
/// Amplitude of a duplicated component relative to the one it copies
const DUPLICATE_AMPLITUDE_FACTOR: f64 = 0.5;
const DUPLICATE_AMPLITUDE_MIN_FACTOR: f64 = 0.01;
/// Re-solves allowed per stage while a solution rests against its boxes
pub const MAX_RECENTRES: usize = 10;

/// Starting point and box for one component
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Seed {
    pub initial: GaussianComponent,
    pub lower: GaussianComponent,
    pub upper: GaussianComponent,
    /// Channel the seed was taken from, `None` for a duplicated component
    pub channel: Option<usize>,
}

impl Seed {
    /// Start at `initial` with the box every seed in a scan of log-diameter `span` gets
    fn centred(span: f64, initial: GaussianComponent, channel: Option<usize>) -> Self {
        let GaussianComponent { amplitude, mean, .. } = initial;
        Self {
            initial,
            lower: GaussianComponent {
                amplitude: AMPLITUDE_MIN_FACTOR * amplitude,
                mean: MEAN_FREEDOM_FRACTION.mul_add(-span, mean),
                standard_deviation: SD_MIN_FRACTION * span,
            },
            upper: GaussianComponent {
                amplitude: AMPLITUDE_MAX_FACTOR * amplitude,
                mean: MEAN_FREEDOM_FRACTION.mul_add(span, mean),
                standard_deviation: SD_MAX_FRACTION * span,
            },
            channel,
        }
    }

    fn at_channel(signal: &SeedingContext, channel: usize) -> Self {
        let initial = GaussianComponent {
            amplitude: signal.smoothed[channel],
            mean: signal.x[channel],
            standard_deviation: SEED_SD_FRACTION * signal.span,
        };
        Self::centred(signal.span, initial, Some(channel))
    }

    /// Restart from a fitted component, keeping the channel this seed came from
    fn recentred(&self, span: f64, fitted: GaussianComponent) -> Self {
        Self::centred(span, fitted, self.channel)
    }

    /// Whether `fitted` ended on the amplitude or mean edge of this seed's box
    fn is_pinned(&self, fitted: &GaussianComponent) -> bool {
        fitted.amplitude <= self.lower.amplitude
            || fitted.amplitude >= self.upper.amplitude
            || fitted.mean <= self.lower.mean
            || fitted.mean >= self.upper.mean
    }

    /// A weaker copy of `dominant` free to settle anywhere in the scan
    fn duplicate(signal: &SeedingContext, dominant: &Self) -> Self {
        let amplitude = dominant.initial.amplitude;
        let span = signal.span;
        Self {
            initial: GaussianComponent {
                amplitude: DUPLICATE_AMPLITUDE_FACTOR * amplitude,
                ..dominant.initial
            },
            lower: GaussianComponent {
                amplitude: DUPLICATE_AMPLITUDE_MIN_FACTOR * amplitude,
                mean: signal.x[0],
                standard_deviation: SD_MIN_FRACTION * span,
            },
            upper: GaussianComponent {
                amplitude: AMPLITUDE_MAX_FACTOR * amplitude,
                mean: signal.x[signal.x.len() - 1],
                standard_deviation: SD_MAX_FRACTION * span,
            },
            channel: None,
        }
    }
}

/// Seeds of the current stage. The number of components is the number of seeds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FitState {
    pub seeds: Vec<Seed>,
}

impl FitState {
    #[must_use]
    pub fn num_components(&self) -> usize {
        self.seeds.len()
    }

    fn initial_parameters(&self) -> Array1<f64> {
        Mixture(self.seeds.iter().map(|seed| seed.initial).collect()).to_params()
    }

    fn bounds(&self) -> Bounds {
        Bounds {
            lower: Mixture(self.seeds.iter().map(|seed| seed.lower).collect()).to_params(),
            upper: Mixture(self.seeds.iter().map(|seed| seed.upper).collect()).to_params(),
        }
    }

    fn seeded_channels(&self) -> Vec<usize> {
        self.seeds.iter().filter_map(|seed| seed.channel).collect()
    }

    /// The seed with the largest starting amplitude. A state always holds at least one seed.
    fn dominant(&self) -> &Seed {
        self.seeds.iter().fold(&self.seeds[0], |best, seed| {
            if seed.initial.amplitude > best.initial.amplitude {
                seed
            } else {
                best
            }
        })
    }

    fn is_pinned(&self, fitted: &[GaussianComponent]) -> bool {
        self.seeds
            .iter()
            .zip(fitted)
            .any(|(seed, component)| seed.is_pinned(component))
    }

    fn recentred(&self, span: f64, fitted: &[GaussianComponent]) -> Self {
        Self {
            seeds: self
                .seeds
                .iter()
                .zip(fitted)
                .map(|(seed, &component)| seed.recentred(span, component))
                .collect(),
        }
    }
}

/// Goodness of fit summaries
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitDiagnostics {
    /// Root mean square residual over the usable channels
    pub rmse: f64,
    /// Root mean square residual over channels within one standard deviation of a component
    pub rmse_near_peaks: f64,
    pub residual_mean: f64,
    /// `NaN` when the residual is identically zero
    pub durbin_watson: f64,
}

impl FitDiagnostics {
    fn compute(
        x: &[f64],
        residual: &[f64],
        usable: &[bool],
        components: &[GaussianComponent],
    ) -> Self {
        let near_peaks: Vec<bool> = x
            .iter()
            .map(|&xi| components.iter().any(|c| c.covers(xi)))
            .collect();
        Self {
            rmse: masked_rms(residual, usable),
            rmse_near_peaks: masked_rms(residual, &near_peaks),
            residual_mean: mean(residual),
            durbin_watson: durbin_watson(residual),
        }
    }
}

/// A converged decomposition of one scan
#[derive(Clone, Debug, PartialEq)]
pub struct FitResult {
    /// Fitted components, largest amplitude first
    pub components: Vec<GaussianComponent>,
    /// Channels predicted as peaks in the filtered scan, strongest first
    pub predicted_peaks: Vec<usize>,
    /// Channels the components were seeded from, in seeding order. This is not the order of
    /// `components`, and duplicated components have no channel.
    pub seed_channels: Vec<usize>,
    pub filtered: FilteredSignal,
    pub smoothed: Vec<f64>,
    /// Model evaluated at every channel
    pub fitted: Vec<f64>,
    /// Filtered counts minus the model
    pub residual: Vec<f64>,
    pub diagnostics: FitDiagnostics,
    /// Solver iterations used by the final stage, re-centred solves included
    pub iterations: u64,
}

/// Everything the seeding rules look at
struct SeedingContext {
    x: Vec<f64>,
    smoothed: Vec<f64>,
    span: f64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PeakFitEngine {
    settings: FitSettings,
}

impl PeakFitEngine {
    #[must_use]
    pub const fn new(settings: FitSettings) -> Self {
        Self { settings }
    }

    /// Decompose `signal` into `num_peaks_desired` Gaussian components in log-diameter.
    ///
    /// # Errors
    /// - [`Error::NoPeaksRequested`] or [`Error::TooManyPeaksRequested`] before any work is done
    /// - [`Error::EmptySignal`] if no channel survives filtering
    /// - [`Error::FitDidNotConverge`] if any stage fails to converge
    pub fn fit(&self, signal: &ScanSignal, num_peaks_desired: usize) -> Result<FitResult> {
        if num_peaks_desired == 0 {
            return Err(Error::NoPeaksRequested);
        }
        if num_peaks_desired > MAX_PEAKS_TO_FIT {
            return Err(Error::TooManyPeaksRequested {
                requested: num_peaks_desired,
            });
        }

        let filtered = filter_channels(signal.raw_counts());
        if !filtered.has_signal() {
            return Err(Error::EmptySignal);
        }

        let x = signal.log_diameters().to_vec();
        let context = SeedingContext {
            span: x[x.len() - 1] - x[0],
            smoothed: moving_average(&filtered.counts),
            x,
        };
        let predicted_peaks = predict_peaks(&filtered.counts, SearchMode::Scan);

        let mut state = Self::initial_state(&context, &predicted_peaks, num_peaks_desired);
        let problem = Self::problem(&context, &filtered);
        let x = Array1::from_vec(context.x.clone());
        loop {
            log::debug!(
                "fitting {} of {num_peaks_desired} components",
                state.num_components()
            );
            let (solved, mixture, iterations) = self.solve_stage(&context, &problem, state)?;
            state = solved;

            let fitted = mixture.evaluate(&x).to_vec();
            let residual: Vec<f64> = filtered
                .counts
                .iter()
                .zip(&fitted)
                .map(|(observed, model)| observed - model)
                .collect();

            if state.num_components() >= num_peaks_desired {
                let mut components = mixture.into_components();
                components.sort_by(|a, b| b.amplitude.total_cmp(&a.amplitude));
                let diagnostics =
                    FitDiagnostics::compute(&context.x, &residual, &filtered.usable, &components);
                log::info!(
                    "fitted {} components in {iterations} iterations, rmse {:.3}",
                    components.len(),
                    diagnostics.rmse
                );

                return Ok(FitResult {
                    components,
                    predicted_peaks,
                    seed_channels: state.seeded_channels(),
                    filtered,
                    smoothed: context.smoothed,
                    fitted,
                    residual,
                    diagnostics,
                    iterations,
                });
            }

            state = Self::grow(&context, state, &fitted, &residual, &filtered);
        }
    }

    /// Least squares problem over the channels whose smoothing window is entirely usable, or
    /// over every usable channel if no such window exists
    fn problem(context: &SeedingContext, filtered: &FilteredSignal) -> Problem {
        let windows = filtered.fully_usable_windows();
        let mask = if windows.contains(&true) {
            windows
        } else {
            filtered.usable.clone()
        };
        let (x, y): (Vec<f64>, Vec<f64>) = context
            .x
            .iter()
            .zip(&context.smoothed)
            .zip(&mask)
            .filter_map(|((&x, &y), &keep)| keep.then_some((x, y)))
            .unzip();
        Problem::new(Array1::from_vec(x), Array1::from_vec(y))
    }

    /// Solve one stage, re-centring the boxes while the solution rests against them. Returns the
    /// state carried forward from the fitted components, the fit and the iterations used.
    fn solve_stage(
        &self,
        context: &SeedingContext,
        problem: &Problem,
        mut state: FitState,
    ) -> Result<(FitState, Mixture, u64)> {
        let mut iterations = 0;
        let mut recentres = 0;
        loop {
            let solution = problem.clone().solve(
                state.initial_parameters(),
                state.bounds(),
                &self.settings,
            )?;
            iterations += solution.iterations;

            let mixture = Mixture::from_params(&solution.params);
            let pinned = state.is_pinned(mixture.components());
            state = state.recentred(context.span, mixture.components());
            if !pinned || recentres == MAX_RECENTRES {
                return Ok((state, mixture, iterations));
            }
            recentres += 1;
            log::debug!("solution rests against its boxes, re-centring ({recentres})");
        }
    }

    fn initial_state(
        context: &SeedingContext,
        predicted_peaks: &[usize],
        num_peaks_desired: usize,
    ) -> FitState {
        let mut seeds: Vec<Seed> = predicted_peaks
            .iter()
            .take(num_peaks_desired)
            .map(|&channel| Seed::at_channel(context, channel))
            .collect();

        if seeds.is_empty() {
            let n = context.smoothed.len();
            let strongest = (1..n - 1)
                .max_by(|&a, &b| context.smoothed[a].total_cmp(&context.smoothed[b]))
                .unwrap_or(n / 2);
            log::info!("no peaks predicted, seeding from the strongest channel {strongest}");
            seeds.push(Seed::at_channel(context, strongest));
        }

        FitState { seeds }
    }

    /// Add one component where the previous stage under-fits, or duplicate the dominant one.
    /// `state` already carries the fitted components of the previous stage.
    fn grow(
        context: &SeedingContext,
        mut state: FitState,
        fitted: &[f64],
        residual: &[f64],
        filtered: &FilteredSignal,
    ) -> FitState {
        let excess: Vec<f64> = fitted
            .iter()
            .zip(&filtered.counts)
            .map(|(model, observed)| model - observed)
            .collect();
        let seeded = state.seeded_channels();
        let candidate = predict_peaks(&excess, SearchMode::Residual)
            .into_iter()
            .find(|&channel| residual[channel] > 0.0 && !seeded.contains(&channel));

        let seed = match candidate {
            Some(channel) => {
                log::debug!("seeding next component from residual at channel {channel}");
                Seed::at_channel(context, channel)
            }
            None => {
                log::warn!("could not find additional peaks, duplicating the dominant component");
                Seed::duplicate(context, state.dominant())
            }
        };
        state.seeds.push(seed);
        state
    }
}
