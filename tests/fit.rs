use ndarray::Array1;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand_isaac::Isaac64Rng;

use htdma_fit::config::FitSettings;
use htdma_fit::{Error, PeakFitEngine, Result, Scan, ScanSignal};

/// Diameters whose logarithms are evenly spaced by `step` starting from `first` nm
fn log_spaced(first: f64, step: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|ii| (first.ln() + step * ii as f64).exp())
        .collect()
}

/// Sum of Gaussians in log-diameter, each given as (amplitude, mean, standard deviation)
fn synthetic_counts(diameters: &[f64], modes: &[(f64, f64, f64)]) -> Vec<f64> {
    diameters
        .iter()
        .map(|d| {
            modes
                .iter()
                .map(|(a, m, s)| a * (-0.5 * ((d.ln() - m) / s).powi(2)).exp())
                .sum()
        })
        .collect()
}

#[test]
fn clean_single_peak_is_recovered() -> Result<()> {
    let diameters = log_spaced(100., 0.015, 50);
    let mean = diameters[25].ln();
    let counts = synthetic_counts(&diameters, &[(1000., mean, 0.1)]);
    let signal = ScanSignal::new(diameters, counts)?;

    let result = PeakFitEngine::new(FitSettings::default()).fit(&signal, 1)?;

    assert_eq!(result.components.len(), 1);
    let component = result.components[0];
    assert!((950.0..=1050.0).contains(&component.amplitude));
    approx::assert_abs_diff_eq!(component.mean, mean, epsilon = 0.01);
    assert!(result.diagnostics.rmse < 5.);
    assert_eq!(result.predicted_peaks, vec![25]);
    Ok(())
}

#[test]
fn overlapping_peaks_are_separated() -> Result<()> {
    let diameters = log_spaced(20., 0.03, 60);
    let first = diameters[25].ln();
    let second = first + 0.15;
    let counts = synthetic_counts(&diameters, &[(1000., first, 0.1), (800., second, 0.1)]);
    let signal = ScanSignal::new(diameters, counts)?;

    let result = PeakFitEngine::default().fit(&signal, 2)?;

    let mut means: Vec<f64> = result.components.iter().map(|c| c.mean).collect();
    means.sort_by(f64::total_cmp);
    approx::assert_abs_diff_eq!(means[0], first, epsilon = 0.05);
    approx::assert_abs_diff_eq!(means[1], second, epsilon = 0.05);
    Ok(())
}

#[test]
fn equal_overlapping_peaks_are_separated() -> Result<()> {
    for first_channel in [15, 20, 25] {
        let diameters = log_spaced(100., 0.015, 50);
        let span = diameters[49].ln() - diameters[0].ln();
        let first = diameters[first_channel].ln();
        let truth = [(1000., first, 0.1), (1000., first + 0.15, 0.1)];
        let signal = ScanSignal::new(diameters.clone(), synthetic_counts(&diameters, &truth))?;

        let result = PeakFitEngine::default().fit(&signal, 2)?;

        let mut fitted = result.components.clone();
        fitted.sort_by(|a, b| a.mean.total_cmp(&b.mean));
        for (component, (amplitude, mean, _)) in fitted.iter().zip(truth) {
            approx::assert_abs_diff_eq!(component.mean, mean, epsilon = 0.02 * span);
            approx::assert_relative_eq!(component.amplitude, amplitude, max_relative = 0.2);
        }
    }
    Ok(())
}

#[test]
fn noisy_modes_are_recovered() -> Result<()> {
    let seed = 40;
    let mut rng = Isaac64Rng::seed_from_u64(seed);

    let diameters = log_spaced(10., 0.04, 80);
    let x: Vec<f64> = diameters.iter().map(|d| d.ln()).collect();
    let span = x[79] - x[0];
    let truth = [(1200., x[20], 0.12), (800., x[42], 0.1), (500., x[62], 0.15)];

    let noise = Array1::random_using(80, Normal::new(0., 5.).unwrap(), &mut rng);
    let counts = synthetic_counts(&diameters, &truth)
        .into_iter()
        .zip(noise)
        .map(|(count, noise)| (count + noise).max(0.))
        .collect();
    let signal = ScanSignal::new(diameters, counts)?;

    let result = PeakFitEngine::default().fit(&signal, 3)?;

    let mut fitted = result.components.clone();
    fitted.sort_by(|a, b| a.mean.total_cmp(&b.mean));
    for (component, (amplitude, mean, _)) in fitted.iter().zip(truth) {
        approx::assert_abs_diff_eq!(component.mean, mean, epsilon = 0.02 * span);
        approx::assert_relative_eq!(component.amplitude, amplitude, max_relative = 0.2);
    }
    Ok(())
}

#[test]
fn more_than_five_peaks_are_refused() {
    let diameters = log_spaced(100., 0.015, 50);
    let counts = synthetic_counts(&diameters, &[(1000., diameters[25].ln(), 0.1)]);
    let signal = ScanSignal::new(diameters, counts).unwrap();

    assert!(matches!(
        PeakFitEngine::default().fit(&signal, 6),
        Err(Error::TooManyPeaksRequested { requested: 6 })
    ));
}

#[test]
fn failed_refit_keeps_the_previous_result() -> Result<()> {
    let diameters = log_spaced(100., 0.015, 50);
    let counts = synthetic_counts(&diameters, &[(1000., diameters[25].ln(), 0.1)]);
    let mut scan = Scan::new(ScanSignal::new(diameters, counts)?);
    let engine = PeakFitEngine::default();

    let first = scan.fit(&engine, 1)?.clone();
    assert!(scan.fit(&engine, 6).is_err());

    assert_eq!(scan.fit_result(), Some(&first));
    assert_eq!(scan.peak_reports().len(), 1);
    assert_eq!(scan.predicted_peaks(), 1);
    Ok(())
}

#[test]
fn solver_iteration_cap_surfaces_as_non_convergence() {
    let diameters = log_spaced(20., 0.03, 60);
    let first = diameters[25].ln();
    let counts = synthetic_counts(&diameters, &[(1000., first, 0.1), (800., first + 0.15, 0.1)]);
    let signal = ScanSignal::new(diameters, counts).unwrap();
    let settings = FitSettings {
        max_solver_iterations: 2,
        ..FitSettings::default()
    };

    assert!(matches!(
        PeakFitEngine::new(settings).fit(&signal, 2),
        Err(Error::FitDidNotConverge { .. })
    ));
}
