use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Ratio of the full width at half height to the standard deviation of a Gaussian,
/// $2\sqrt{2 \ln 2}$
pub const FWHM_FACTOR: f64 = 2.3548;

/// Amplitude, mean and standard deviation
pub const PARAMS_PER_COMPONENT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
/// One mode of a size distribution in log-diameter space.
///
/// The component is an unnormalised Gaussian, so `amplitude` is the height of the mode
///
/// $$
///     f\left(x\right) = A \exp\left[-\frac{1}{2}\left(\frac{x - \mu}{\sigma}\right)^2\right]
/// $$
pub struct GaussianComponent {
    pub amplitude: f64,
    pub mean: f64,
    pub standard_deviation: f64,
}

impl GaussianComponent {
    #[must_use]
    pub fn evaluate(&self, x: f64) -> f64 {
        let z = (x - self.mean) / self.standard_deviation;
        self.amplitude * (-0.5 * z * z).exp()
    }

    /// Derivatives of [`Self::evaluate`] with respect to amplitude, mean and standard deviation
    #[must_use]
    pub fn partial_derivatives(&self, x: f64) -> [f64; PARAMS_PER_COMPONENT] {
        let z = (x - self.mean) / self.standard_deviation;
        let shape = (-0.5 * z * z).exp();
        let scaled = self.amplitude * shape * z / self.standard_deviation;
        [shape, scaled, scaled * z]
    }

    #[must_use]
    pub fn fwhm(&self) -> f64 {
        self.standard_deviation * FWHM_FACTOR
    }

    /// Whether `x` lies strictly within one standard deviation of the mean
    #[must_use]
    pub fn covers(&self, x: f64) -> bool {
        (x - self.mean).abs() < self.standard_deviation
    }

    fn from_slice(params: ArrayView1<f64>) -> Self {
        Self {
            amplitude: params[0],
            mean: params[1],
            standard_deviation: params[2],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
/// A sum of Gaussian components
pub struct Mixture(pub(crate) Vec<GaussianComponent>);

impl Mixture {
    /// Unpack a flat parameter vector laid out as `[a_0, mu_0, sigma_0, a_1, ...]`
    #[must_use]
    pub fn from_params(params: &Array1<f64>) -> Self {
        Self(
            params
                .exact_chunks(PARAMS_PER_COMPONENT)
                .into_iter()
                .map(GaussianComponent::from_slice)
                .collect(),
        )
    }

    #[must_use]
    pub fn to_params(&self) -> Array1<f64> {
        self.0
            .iter()
            .flat_map(|c| [c.amplitude, c.mean, c.standard_deviation])
            .collect()
    }

    #[must_use]
    pub fn components(&self) -> &[GaussianComponent] {
        &self.0
    }

    #[must_use]
    pub fn into_components(self) -> Vec<GaussianComponent> {
        self.0
    }

    #[must_use]
    pub fn evaluate(&self, x: &Array1<f64>) -> Array1<f64> {
        x.mapv(|xi| self.0.iter().map(|c| c.evaluate(xi)).sum())
    }

    /// Matrix of partial derivatives, one row per point of `x` and one column per parameter
    #[must_use]
    pub fn jacobian(&self, x: &Array1<f64>) -> Array2<f64> {
        let mut jacobian = Array2::zeros((x.len(), self.0.len() * PARAMS_PER_COMPONENT));
        for (ii, &xi) in x.iter().enumerate() {
            for (jj, component) in self.0.iter().enumerate() {
                for (kk, derivative) in component.partial_derivatives(xi).into_iter().enumerate() {
                    jacobian[[ii, jj * PARAMS_PER_COMPONENT + kk]] = derivative;
                }
            }
        }
        jacobian
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array1};
    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    use super::{GaussianComponent, Mixture, FWHM_FACTOR};

    #[test]
    fn amplitude_is_the_height_of_the_mode() {
        let component = GaussianComponent {
            amplitude: 250.,
            mean: 4.2,
            standard_deviation: 0.1,
        };
        approx::assert_relative_eq!(component.evaluate(4.2), 250.);
        approx::assert_relative_eq!(
            component.evaluate(4.2 + component.fwhm() / 2.),
            125.,
            max_relative = 1e-4
        );
    }

    #[test]
    fn fwhm_scales_standard_deviation() {
        let component = GaussianComponent {
            amplitude: 1.,
            mean: 0.,
            standard_deviation: 0.5,
        };
        approx::assert_relative_eq!(component.fwhm(), 0.5 * FWHM_FACTOR);
    }

    #[test]
    fn parameters_round_trip_through_the_mixture() {
        let params = array![1., 2., 3., 4., 5., 6.];
        let mixture = Mixture::from_params(&params);
        assert_eq!(mixture.components().len(), 2);
        approx::assert_relative_eq!(mixture.components()[1].mean, 5.);
        assert_eq!(mixture.to_params(), params);
    }

    #[test]
    fn mixture_is_the_sum_of_its_components() {
        let mixture = Mixture::from_params(&array![10., 0., 1., 5., 1., 0.5]);
        let x = array![-1., 0., 0.5, 1., 2.];
        let total = mixture.evaluate(&x);
        for (xi, value) in x.iter().zip(total) {
            let expected: f64 = mixture.components().iter().map(|c| c.evaluate(*xi)).sum();
            approx::assert_relative_eq!(value, expected);
        }
    }

    #[test]
    fn jacobian_columns_match_finite_difference() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);

        let params: Array1<f64> = (0..3)
            .flat_map(|_| {
                [
                    rng.gen_range(100.0..1000.0),
                    rng.gen_range(4.0..6.0),
                    rng.gen_range(0.05..0.3),
                ]
            })
            .collect();
        let x = Array1::linspace(3.5, 6.5, 40);
        let mixture = Mixture::from_params(&params);
        let jacobian = mixture.jacobian(&x);

        let delta_rel = 1e-6;
        for jj in 0..params.len() {
            let delta = params[jj] * delta_rel;
            let mut plus = params.clone();
            plus[jj] += delta;
            let mut minus = params.clone();
            minus[jj] -= delta;

            let numerical = (Mixture::from_params(&plus).evaluate(&x)
                - Mixture::from_params(&minus).evaluate(&x))
                / (2. * delta);

            for (computed, expected) in jacobian.column(jj).iter().zip(numerical) {
                approx::assert_abs_diff_eq!(*computed, expected, epsilon = 1e-3);
            }
        }
    }
}
