use serde::Serialize;

use crate::distributions::GaussianComponent;
use crate::error::Error;
use crate::filter::{filter_channels, FilteredSignal};
use crate::fit::{FitResult, PeakFitEngine};
use crate::peaks::{predict_peaks, SearchMode};
use crate::Result;

/// Raw counts of one scan against the particle diameter of each channel
#[derive(Clone, Debug, PartialEq)]
pub struct ScanSignal {
    diameters_nm: Vec<f64>,
    log_diameters: Vec<f64>,
    raw_counts: Vec<f64>,
}

impl ScanSignal {
    /// # Errors
    /// Returns [`Error::InvalidSignal`] if the lengths differ, there are fewer than three
    /// channels, or the diameters are not positive, finite and strictly increasing.
    pub fn new(diameters_nm: Vec<f64>, raw_counts: Vec<f64>) -> Result<Self> {
        if diameters_nm.len() != raw_counts.len() {
            return Err(Error::InvalidSignal(format!(
                "{} diameters but {} counts",
                diameters_nm.len(),
                raw_counts.len()
            )));
        }
        if diameters_nm.len() < 3 {
            return Err(Error::InvalidSignal(format!(
                "a scan needs at least 3 channels, got {}",
                diameters_nm.len()
            )));
        }
        if let Some(bad) = diameters_nm.iter().find(|d| !(d.is_finite() && **d > 0.0)) {
            return Err(Error::InvalidSignal(format!(
                "diameters must be positive and finite, got {bad}"
            )));
        }
        if diameters_nm.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(Error::InvalidSignal(
                "diameters must be strictly increasing".to_string(),
            ));
        }
        if raw_counts.iter().any(|c| !c.is_finite()) {
            return Err(Error::InvalidSignal("counts must be finite".to_string()));
        }

        let log_diameters = diameters_nm.iter().map(|d| d.ln()).collect();
        Ok(Self {
            diameters_nm,
            log_diameters,
            raw_counts,
        })
    }

    #[must_use]
    pub fn diameters_nm(&self) -> &[f64] {
        &self.diameters_nm
    }

    /// Natural logarithm of each diameter
    #[must_use]
    pub fn log_diameters(&self) -> &[f64] {
        &self.log_diameters
    }

    #[must_use]
    pub fn raw_counts(&self) -> &[f64] {
        &self.raw_counts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.raw_counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw_counts.is_empty()
    }
}

/// One fitted mode expressed in diameter space
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PeakReport {
    /// Position in the amplitude ordered component list
    pub index: usize,
    pub diameter_nm: f64,
    pub height: f64,
    /// Full width at half height in log-diameter
    pub fwhh: f64,
    /// Distance from the mode to one standard deviation above it, in nm
    pub sd_nm: f64,
    pub growth_factor: Option<f64>,
    pub kappa: Option<f64>,
}

impl PeakReport {
    #[must_use]
    pub fn from_component(index: usize, component: &GaussianComponent) -> Self {
        let diameter_nm = component.mean.exp();
        Self {
            index,
            diameter_nm,
            height: component.amplitude,
            fwhh: component.fwhm(),
            sd_nm: (component.mean + component.standard_deviation).exp() - diameter_nm,
            growth_factor: None,
            kappa: None,
        }
    }

    /// Hygroscopic growth relative to the dry diameter selected by the first DMA
    #[must_use]
    pub fn with_growth_factor(self, dry_diameter_nm: f64) -> Self {
        Self {
            growth_factor: Some(self.diameter_nm / dry_diameter_nm),
            ..self
        }
    }
}

/// A scan together with its most recent successful fit
#[derive(Clone, Debug)]
pub struct Scan {
    signal: ScanSignal,
    fit_result: Option<FitResult>,
}

impl Scan {
    #[must_use]
    pub const fn new(signal: ScanSignal) -> Self {
        Self {
            signal,
            fit_result: None,
        }
    }

    #[must_use]
    pub const fn signal(&self) -> &ScanSignal {
        &self.signal
    }

    /// Fit the scan, replacing the stored result only if the fit succeeds.
    ///
    /// # Errors
    /// Propagates any error from [`PeakFitEngine::fit`]; the previous result is kept.
    pub fn fit(&mut self, engine: &PeakFitEngine, num_peaks: usize) -> Result<&FitResult> {
        let result = engine.fit(&self.signal, num_peaks)?;
        Ok(self.fit_result.insert(result))
    }

    #[must_use]
    pub const fn fit_result(&self) -> Option<&FitResult> {
        self.fit_result.as_ref()
    }

    /// Reports for each fitted component, largest first. Empty before the first fit.
    #[must_use]
    pub fn peak_reports(&self) -> Vec<PeakReport> {
        self.fit_result.as_ref().map_or_else(Vec::new, |result| {
            result
                .components
                .iter()
                .enumerate()
                .map(|(index, component)| PeakReport::from_component(index, component))
                .collect()
        })
    }

    /// Filtered counts of the last fit
    #[must_use]
    pub fn filtered(&self) -> Option<&FilteredSignal> {
        self.fit_result.as_ref().map(|result| &result.filtered)
    }

    /// Number of peaks predicted in the scan before fitting, used to suggest how many
    /// components to request
    #[must_use]
    pub fn predicted_peaks(&self) -> usize {
        let filtered = filter_channels(self.signal.raw_counts());
        predict_peaks(&filtered.counts, SearchMode::Scan).len()
    }
}

#[cfg(test)]
mod tests {
    use super::{PeakReport, Scan, ScanSignal};
    use crate::distributions::{GaussianComponent, FWHM_FACTOR};
    use crate::error::Error;
    use crate::fit::PeakFitEngine;

    #[test]
    fn invalid_signals_are_rejected() {
        assert!(matches!(
            ScanSignal::new(vec![1., 2., 3.], vec![1., 2.]),
            Err(Error::InvalidSignal(_))
        ));
        assert!(ScanSignal::new(vec![1., 2.], vec![1., 2.]).is_err());
        assert!(ScanSignal::new(vec![1., 3., 2.], vec![1., 2., 3.]).is_err());
        assert!(ScanSignal::new(vec![0., 1., 2.], vec![1., 2., 3.]).is_err());
        assert!(ScanSignal::new(vec![1., 2., 3.], vec![1., f64::NAN, 3.]).is_err());
    }

    #[test]
    fn log_diameters_are_natural_logs() {
        let signal = ScanSignal::new(vec![1., 10., 100.], vec![0., 1., 0.]).unwrap();
        approx::assert_relative_eq!(signal.log_diameters()[2], 100_f64.ln());
        assert_eq!(signal.len(), 3);
    }

    #[test]
    fn reports_convert_log_space_to_diameters() {
        let component = GaussianComponent {
            amplitude: 420.,
            mean: 100_f64.ln(),
            standard_deviation: 0.1,
        };
        let report = PeakReport::from_component(0, &component).with_growth_factor(80.);

        approx::assert_relative_eq!(report.diameter_nm, 100., max_relative = 1e-12);
        approx::assert_relative_eq!(report.height, 420.);
        approx::assert_relative_eq!(report.fwhh, 0.1 * FWHM_FACTOR);
        approx::assert_relative_eq!(report.sd_nm, 100. * (0.1_f64.exp() - 1.), max_relative = 1e-9);
        approx::assert_relative_eq!(report.growth_factor.unwrap(), 1.25, max_relative = 1e-12);
        assert!(report.kappa.is_none());
    }

    #[test]
    fn unfitted_scans_have_no_reports() {
        let signal = ScanSignal::new(vec![1., 2., 3.], vec![0., 1., 0.]).unwrap();
        let scan = Scan::new(signal);
        assert!(scan.fit_result().is_none());
        assert!(scan.peak_reports().is_empty());
        assert!(scan.filtered().is_none());
        assert_eq!(scan.predicted_peaks(), 0);
    }

    #[test]
    fn failed_fit_leaves_the_scan_unfitted() {
        let signal = ScanSignal::new(vec![1., 2., 3., 4.], vec![0.; 4]).unwrap();
        let mut scan = Scan::new(signal);
        assert!(scan.fit(&PeakFitEngine::default(), 1).is_err());
        assert!(scan.fit_result().is_none());
    }
}
