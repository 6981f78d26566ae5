use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Physical properties of the carrier gas.
///
/// Defaults describe air at 20 °C and one atmosphere. Values are SI apart from the mean free
/// path, which is kept in nanometres so it can be compared directly with particle diameters.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GasProperties {
    /// Elementary charge (C)
    pub elementary_charge_c: f64,
    /// Dynamic viscosity (Pa s)
    pub viscosity_pa_s: f64,
    /// Mean free path of the gas molecules (nm)
    pub mean_free_path_nm: f64,
}

impl Default for GasProperties {
    fn default() -> Self {
        Self {
            elementary_charge_c: 1.602_176_634e-19,
            viscosity_pa_s: 1.837e-5,
            mean_free_path_nm: 68.0,
        }
    }
}

/// Dimensions of a cylindrical DMA column. The default is a TSI 3080 long column.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DmaGeometry {
    pub length_cm: f64,
    pub radius_inner_cm: f64,
    pub radius_outer_cm: f64,
}

impl Default for DmaGeometry {
    fn default() -> Self {
        Self {
            length_cm: 44.44,
            radius_inner_cm: 0.937,
            radius_outer_cm: 1.958,
        }
    }
}

/// Control of the mobility to diameter fixed point iteration.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InversionSettings {
    /// Starting guess for the Cunningham slip correction
    pub initial_slip_correction: f64,
    /// Number of elementary charges carried by the particle
    pub charges: u32,
    /// Iteration stops once successive diameters differ by less than this (nm)
    pub tolerance_nm: f64,
    pub max_iterations: usize,
    /// Diameters outside `[min_diameter_nm, max_diameter_nm]` indicate bad inputs
    pub min_diameter_nm: f64,
    pub max_diameter_nm: f64,
}

impl Default for InversionSettings {
    fn default() -> Self {
        Self {
            initial_slip_correction: 2.0,
            charges: 1,
            tolerance_nm: 0.1,
            max_iterations: 1000,
            min_diameter_nm: 1.0,
            max_diameter_nm: 15_000.0,
        }
    }
}

/// Settings for the bounded least squares solve behind each fit attempt.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FitSettings {
    pub max_solver_iterations: u64,
    /// Relative cost reduction below which an accepted step ends the solve
    pub cost_tolerance: f64,
    /// Relative step length below which an accepted step ends the solve
    pub step_tolerance: f64,
    /// Attach argmin's terminal logger to every solve
    pub trace_solver: bool,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            max_solver_iterations: 1000,
            cost_tolerance: 1e-8,
            step_tolerance: 1e-8,
            trace_solver: false,
        }
    }
}

/// Everything the numerical core needs from the surrounding application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub gas: GasProperties,
    pub dma: DmaGeometry,
    pub inversion: InversionSettings,
    pub fit: FitSettings,
}

impl Config {
    /// Parse a configuration from TOML. Missing sections and keys take their defaults.
    ///
    /// # Errors
    /// Returns an error if the document is not valid TOML or a key has the wrong type.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Read a configuration file from disk
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        log::debug!("read configuration from {}", path.display());
        Self::from_toml_str(&contents)
    }
}
