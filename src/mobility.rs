use std::f64::consts::PI;

use crate::config::{GasProperties, InversionSettings};
use crate::error::Error;
use crate::Result;

/// Square centimetres to square metres
const CM2_TO_M2: f64 = 1e-4;
/// Metres to nanometres
const M_TO_NM: f64 = 1e9;

/// Cunningham slip correction for a particle of diameter `dp_nm`
///
/// $$
///     C_s = 1 + \frac{\lambda}{d_p}\left(2.34 + 1.05 \exp\left(-0.39 \frac{d_p}{\lambda}\right)\right)
/// $$
#[must_use]
pub fn slip_correction(dp_nm: f64, mean_free_path_nm: f64) -> f64 {
    1.0 + (mean_free_path_nm / dp_nm)
        * (2.34 + 1.05 * (-0.39 * dp_nm / mean_free_path_nm).exp())
}

/// Electrical mobility (cm²/(V s)) of a particle of diameter `dp_nm` carrying `n_charges`
/// elementary charges.
///
/// This is the forward relation which [`invert_mobility`] solves for the diameter.
#[must_use]
pub fn electrical_mobility(dp_nm: f64, n_charges: u32, gas: &GasProperties) -> f64 {
    let cs = slip_correction(dp_nm, gas.mean_free_path_nm);
    let dp_m = dp_nm / M_TO_NM;
    f64::from(n_charges) * gas.elementary_charge_c * cs
        / (3.0 * PI * gas.viscosity_pa_s * dp_m)
        / CM2_TO_M2
}

/// Converts electrical mobility to particle diameter for a fixed gas and iteration policy.
///
/// The inverter holds no mutable state, so one instance can be shared between threads.
#[derive(Clone, Copy, Debug, Default)]
pub struct MobilityInverter {
    gas: GasProperties,
    settings: InversionSettings,
}

impl MobilityInverter {
    #[must_use]
    pub const fn new(gas: GasProperties, settings: InversionSettings) -> Self {
        Self { gas, settings }
    }

    #[must_use]
    pub const fn settings(&self) -> &InversionSettings {
        &self.settings
    }

    /// Diameter (nm) implied by a slip correction `cs` at mobility `zp` (cm²/(V s))
    fn diameter(&self, zp: f64, cs: f64) -> f64 {
        f64::from(self.settings.charges) * self.gas.elementary_charge_c * cs
            / (3.0 * PI * self.gas.viscosity_pa_s * zp * CM2_TO_M2)
            * M_TO_NM
    }

    /// Solve for the diameter (nm) of a particle with electrical mobility `zp` (cm²/(V s)).
    ///
    /// The diameter depends on the slip correction, which in turn depends on the diameter, so
    /// the two are alternated from the configured initial slip correction until successive
    /// diameters agree within the tolerance.
    ///
    /// Starting from the default slip correction of 2, the iterates for particles smaller than
    /// about 9.4 nm swing between tenths of a nanometre and about 100 nm, so these particles are
    /// reported as diverged.
    ///
    /// # Errors
    /// - [`Error::InvalidMobility`] if `zp` is not a positive finite number
    /// - [`Error::DivergedRange`] if an iterate leaves the plausible diameter window
    /// - [`Error::TooManyIterations`] if the tolerance is not met within the iteration cap
    pub fn invert(&self, zp: f64) -> Result<f64> {
        if !(zp.is_finite() && zp > 0.0) {
            return Err(Error::InvalidMobility(zp));
        }

        let InversionSettings {
            initial_slip_correction,
            tolerance_nm,
            max_iterations,
            min_diameter_nm,
            max_diameter_nm,
            ..
        } = self.settings;

        // The starting guess is not range checked, it only seeds the slip correction
        let mut dp = self.diameter(zp, initial_slip_correction);
        let mut iterations = 0;
        loop {
            let cs = slip_correction(dp, self.gas.mean_free_path_nm);
            let last_dp = dp;
            dp = self.diameter(zp, cs);

            if !(min_diameter_nm..=max_diameter_nm).contains(&dp) {
                return Err(Error::DivergedRange { diameter_nm: dp });
            }
            if (last_dp - dp).abs() < tolerance_nm {
                log::trace!("zp {zp:.4e} converged to {dp:.2} nm after {iterations} iterations");
                return Ok(dp);
            }

            iterations += 1;
            if iterations > max_iterations {
                return Err(Error::TooManyIterations {
                    iterations: max_iterations,
                    diameter_nm: dp,
                });
            }
        }
    }
}

/// Solve for the diameter (nm) of a particle with electrical mobility `zp` (cm²/(V s)),
/// carrying `n_charges` elementary charges, starting from slip correction
/// `initial_slip_correction`.
///
/// Uses the default tolerance (0.1 nm), iteration cap (1000) and plausible diameter window
/// (1 nm to 15 µm).
///
/// # Errors
/// See [`MobilityInverter::invert`].
pub fn invert_mobility(
    zp: f64,
    n_charges: u32,
    initial_slip_correction: f64,
    gas: &GasProperties,
) -> Result<f64> {
    let settings = InversionSettings {
        initial_slip_correction,
        charges: n_charges,
        ..InversionSettings::default()
    };
    MobilityInverter::new(*gas, settings).invert(zp)
}
