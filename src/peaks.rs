//! Peak candidates in a scan or in the residual of a fit.
//!
//! The search follows the usual sequence for one dimensional peak picking: find local maxima,
//! suppress neighbours closer than a minimum distance, then require a minimum prominence and a
//! minimum width measured at a fraction of that prominence.

/// Candidates closer than this to either end of the scan are discarded
pub const EDGE_MARGIN: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// Look for maxima in a filtered scan
    Scan,
    /// Look for the places a fit falls short, given the excess of the model over the data
    Residual,
}

/// Acceptance criteria for a candidate peak
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakSearch {
    /// Minimum prominence as a fraction of the searched signal's range
    pub prominence_fraction: f64,
    /// Minimum separation between peaks, in samples
    pub distance: usize,
    /// Minimum width in samples, measured at `rel_height` of the prominence
    pub width: f64,
    pub rel_height: f64,
}

impl PeakSearch {
    pub const SCAN: Self = Self {
        prominence_fraction: 0.10,
        distance: 5,
        width: 3.0,
        rel_height: 0.5,
    };

    pub const RESIDUAL: Self = Self {
        prominence_fraction: 0.05,
        distance: 2,
        width: 1.0,
        rel_height: 0.8,
    };
}

impl SearchMode {
    #[must_use]
    pub const fn criteria(self) -> PeakSearch {
        match self {
            Self::Scan => PeakSearch::SCAN,
            Self::Residual => PeakSearch::RESIDUAL,
        }
    }
}

/// Indices of likely peaks in `signal`, strongest first.
///
/// In [`SearchMode::Residual`] the signal is negated before searching, so passing the excess of
/// a model over the data finds the channels where the model is too low. An empty result is a
/// valid answer.
#[must_use]
pub fn predict_peaks(signal: &[f64], mode: SearchMode) -> Vec<usize> {
    let searched: Vec<f64> = match mode {
        SearchMode::Scan => signal.to_vec(),
        SearchMode::Residual => signal.iter().map(|value| -value).collect(),
    };
    find_peaks(&searched, &mode.criteria())
}

fn find_peaks(y: &[f64], criteria: &PeakSearch) -> Vec<usize> {
    let n = y.len();
    if n < 3 || y.iter().any(|value| !value.is_finite()) {
        return Vec::new();
    }

    let (min, max) = y
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let min_prominence = criteria.prominence_fraction * (max - min);

    let maxima = select_by_distance(y, &local_maxima(y), criteria.distance);

    let mut peaks: Vec<usize> = maxima
        .into_iter()
        .filter(|&peak| {
            let base = prominence(y, peak);
            base.prominence >= min_prominence
                && width_at(y, peak, &base, criteria.rel_height) >= criteria.width
        })
        .filter(|&peak| peak >= EDGE_MARGIN && peak < n - EDGE_MARGIN)
        .collect();

    peaks.sort_by(|&a, &b| y[b].total_cmp(&y[a]));
    peaks
}

/// Strict local maxima. A flat top counts once, at its middle sample.
fn local_maxima(y: &[f64]) -> Vec<usize> {
    let n = y.len();
    let mut maxima = Vec::new();
    let mut ii = 1;
    while ii < n - 1 {
        if y[ii - 1] < y[ii] {
            let mut ahead = ii + 1;
            while ahead < n - 1 && y[ahead] == y[ii] {
                ahead += 1;
            }
            if y[ahead] < y[ii] {
                maxima.push((ii + ahead - 1) / 2);
                ii = ahead;
                continue;
            }
        }
        ii += 1;
    }
    maxima
}

/// Drop maxima within `distance` samples of a taller one
fn select_by_distance(y: &[f64], maxima: &[usize], distance: usize) -> Vec<usize> {
    let mut keep = vec![true; maxima.len()];
    let mut by_height: Vec<usize> = (0..maxima.len()).collect();
    by_height.sort_by(|&a, &b| y[maxima[b]].total_cmp(&y[maxima[a]]));

    for &jj in &by_height {
        if !keep[jj] {
            continue;
        }
        for mm in 0..maxima.len() {
            if mm != jj && keep[mm] && maxima[mm].abs_diff(maxima[jj]) < distance {
                keep[mm] = false;
            }
        }
    }

    maxima
        .iter()
        .zip(keep)
        .filter_map(|(&peak, kept)| kept.then_some(peak))
        .collect()
}

struct Base {
    prominence: f64,
    left: usize,
    right: usize,
}

/// Height of a peak above the higher of the two minima bracketing it.
///
/// Each side is walked until the signal rises above the peak or the scan ends.
fn prominence(y: &[f64], peak: usize) -> Base {
    let apex = y[peak];

    let (mut left_min, mut left) = (apex, peak);
    let mut ii = peak;
    while ii > 0 && y[ii - 1] <= apex {
        ii -= 1;
        if y[ii] < left_min {
            left_min = y[ii];
            left = ii;
        }
    }

    let (mut right_min, mut right) = (apex, peak);
    let mut ii = peak;
    while ii < y.len() - 1 && y[ii + 1] <= apex {
        ii += 1;
        if y[ii] < right_min {
            right_min = y[ii];
            right = ii;
        }
    }

    Base {
        prominence: apex - left_min.max(right_min),
        left,
        right,
    }
}

/// Width of the peak where the signal crosses `apex - rel_height * prominence`, interpolated
/// between samples and limited to the prominence bases.
fn width_at(y: &[f64], peak: usize, base: &Base, rel_height: f64) -> f64 {
    let height = base.prominence.mul_add(-rel_height, y[peak]);

    let mut ii = peak;
    while base.left < ii && y[ii] > height {
        ii -= 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let mut left = ii as f64;
    if y[ii] < height {
        left += (height - y[ii]) / (y[ii + 1] - y[ii]);
    }

    let mut ii = peak;
    while ii < base.right && y[ii] > height {
        ii += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let mut right = ii as f64;
    if y[ii] < height {
        right -= (height - y[ii]) / (y[ii - 1] - y[ii]);
    }

    right - left
}

#[cfg(test)]
mod tests {
    use super::{local_maxima, predict_peaks, prominence, SearchMode, EDGE_MARGIN};

    fn gaussian(n: usize, centre: f64, width: f64, height: f64) -> Vec<f64> {
        (0..n)
            .map(|ii| {
                let z = (ii as f64 - centre) / width;
                height * (-0.5 * z * z).exp()
            })
            .collect()
    }

    fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
        a.iter().zip(b).map(|(x, y)| x + y).collect()
    }

    #[test]
    fn plateaus_resolve_to_their_middle() {
        let y = [0., 1., 3., 3., 3., 3., 1., 0.];
        assert_eq!(local_maxima(&y), vec![3]);
    }

    #[test]
    fn prominence_uses_the_higher_of_the_two_bases() {
        let y = [0., 5., 2., 8., 1., 0.];
        let base = prominence(&y, 1);
        approx::assert_relative_eq!(base.prominence, 3.);
        assert_eq!(base.left, 0);
        assert_eq!(base.right, 2);
    }

    #[test]
    fn separated_peaks_are_found_strongest_first() {
        let signal = add(&gaussian(60, 20., 3., 500.), &gaussian(60, 40., 3., 900.));
        assert_eq!(predict_peaks(&signal, SearchMode::Scan), vec![40, 20]);
    }

    #[test]
    fn small_bumps_are_not_prominent_enough() {
        let signal = add(&gaussian(60, 20., 3., 1000.), &gaussian(60, 40., 3., 50.));
        assert_eq!(predict_peaks(&signal, SearchMode::Scan), vec![20]);
    }

    #[test]
    fn narrow_spikes_are_too_thin() {
        let mut signal = gaussian(60, 30., 4., 100.);
        signal[10] = 80.;
        assert_eq!(predict_peaks(&signal, SearchMode::Scan), vec![30]);
    }

    #[test]
    fn close_maxima_keep_only_the_taller() {
        let mut signal = gaussian(60, 30., 4., 100.);
        signal[27] = 99.;
        signal[28] = 90.;
        assert_eq!(predict_peaks(&signal, SearchMode::Scan), vec![30]);
    }

    #[test]
    fn candidates_near_the_edges_are_dropped() {
        let signal = add(&gaussian(40, 1., 3., 1000.), &gaussian(40, 20., 3., 400.));
        let peaks = predict_peaks(&signal, SearchMode::Scan);
        assert_eq!(peaks, vec![20]);
        assert!(peaks.iter().all(|&p| p >= EDGE_MARGIN && p < 40 - EDGE_MARGIN));
    }

    #[test]
    fn all_zero_signal_predicts_nothing() {
        assert!(predict_peaks(&[0.; 30], SearchMode::Scan).is_empty());
        assert!(predict_peaks(&[0.; 30], SearchMode::Residual).is_empty());
    }

    #[test]
    fn short_signals_predict_nothing() {
        assert!(predict_peaks(&[1., 2.], SearchMode::Scan).is_empty());
    }

    #[test]
    fn residual_mode_finds_where_the_model_is_too_low() {
        // Model excess over the data: negative where a component is missing
        let excess: Vec<f64> = gaussian(50, 25., 3., 200.).iter().map(|v| -v).collect();
        assert_eq!(predict_peaks(&excess, SearchMode::Residual), vec![25]);
        assert!(predict_peaks(&excess, SearchMode::Scan).is_empty());
    }
}
