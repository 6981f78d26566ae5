use itertools::Itertools;
use num_traits::Float;

/// Centred moving average over a window of three samples.
///
/// Samples beyond either end are treated as zero, so the output has the length of the input and
/// the end samples are pulled towards zero.
///
/// # Examples
///
/// ```
/// use htdma_fit::math::moving_average;
///
/// let smoothed = moving_average(&[3., 6., 9., 3.]);
/// assert_eq!(smoothed, vec![3., 6., 6., 4.]);
/// ```
pub fn moving_average<T: Float>(values: &[T]) -> Vec<T> {
    let three = T::one() + T::one() + T::one();
    let n = values.len();
    (0..n)
        .map(|ii| {
            let before = if ii > 0 { values[ii - 1] } else { T::zero() };
            let after = if ii + 1 < n { values[ii + 1] } else { T::zero() };
            (before + values[ii] + after) / three
        })
        .collect()
}

/// Arithmetic mean, `NaN` for an empty slice
///
/// # Examples
///
/// ```
/// use htdma_fit::math::mean;
///
/// assert_eq!(mean(&[1., 2., 6.]), 3.);
/// assert!(mean::<f64>(&[]).is_nan());
/// ```
pub fn mean<T: Float>(values: &[T]) -> T {
    T::from(values.len()).map_or_else(T::nan, |n| {
        values.iter().fold(T::zero(), |acc, &v| acc + v) / n
    })
}

/// Root mean square of the values selected by `mask`.
///
/// If nothing is selected every value is used instead.
///
/// # Examples
///
/// ```
/// use htdma_fit::math::masked_rms;
///
/// let residual = [100., 3., -4., 100.];
/// let rms = masked_rms(&residual, &[false, true, true, false]);
/// assert!((rms - 12.5_f64.sqrt()).abs() < 1e-12);
/// ```
pub fn masked_rms<T: Float>(values: &[T], mask: &[bool]) -> T {
    let selected = values
        .iter()
        .zip(mask)
        .filter_map(|(&v, &keep)| keep.then_some(v))
        .collect::<Vec<_>>();
    let selected = if selected.is_empty() {
        values.to_vec()
    } else {
        selected
    };
    mean(&selected.iter().map(|&v| v * v).collect::<Vec<_>>()).sqrt()
}

/// Durbin-Watson statistic of a residual series.
///
/// Values near 2 indicate uncorrelated residuals, values towards 0 indicate systematic misfit.
/// A residual which is identically zero has no defined statistic and yields `NaN`.
///
/// $$
///     d = \frac{\sum_{i=2}^{n} (e_i - e_{i-1})^2}{\sum_{i=1}^{n} e_i^2}
/// $$
///
/// # Examples
///
/// ```
/// use htdma_fit::math::durbin_watson;
///
/// approx::assert_relative_eq!(durbin_watson(&[1., -1., 1., -1.]), 3.);
/// assert!(durbin_watson(&[0f64, 0., 0.]).is_nan());
/// ```
pub fn durbin_watson<T: Float>(residual: &[T]) -> T {
    let numerator = residual
        .iter()
        .tuple_windows()
        .fold(T::zero(), |acc, (&a, &b)| acc + (b - a) * (b - a));
    let denominator = residual.iter().fold(T::zero(), |acc, &e| acc + e * e);
    if denominator == T::zero() {
        T::nan()
    } else {
        numerator / denominator
    }
}
