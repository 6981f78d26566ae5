use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::config::{DmaGeometry, GasProperties, InversionSettings};
use crate::error::Error;
use crate::mobility::MobilityInverter;
use crate::Result;

const MIN_VOLTAGE: f64 = 1.0;
const MAX_VOLTAGE: f64 = 10_000.0;
/// Tolerance used when checking that inlet and outlet flows balance (lpm)
const FLOW_BALANCE_TOLERANCE: f64 = 1e-9;

const fn lpm_to_cm3_per_sec(lpm: f64) -> f64 {
    lpm * 1000.0 / 60.0
}

/// DMA flow rates in litres per minute
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct FlowSettings {
    pub sheath_lpm: f64,
    /// Polydisperse aerosol entering the column
    pub aerosol_in_lpm: f64,
    /// Monodisperse aerosol leaving the column
    pub aerosol_out_lpm: f64,
    pub excess_lpm: f64,
}

impl FlowSettings {
    /// Flows as recorded with a scan. Only sheath and aerosol flows are logged, the excess
    /// flow is whatever balances them.
    #[must_use]
    pub fn from_scan(sheath_lpm: f64, aerosol_in_lpm: f64, aerosol_out_lpm: f64) -> Self {
        Self {
            sheath_lpm,
            aerosol_in_lpm,
            aerosol_out_lpm,
            excess_lpm: sheath_lpm + aerosol_in_lpm - aerosol_out_lpm,
        }
    }

    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        (self.aerosol_in_lpm - self.aerosol_out_lpm).abs() < FLOW_BALANCE_TOLERANCE
    }

    /// # Errors
    /// Returns [`Error::InvalidSetup`] if a flow is not positive or the column does not
    /// conserve volume.
    pub fn validate(&self) -> Result<()> {
        let flows = [
            ("sheath", self.sheath_lpm),
            ("aerosol in", self.aerosol_in_lpm),
            ("aerosol out", self.aerosol_out_lpm),
            ("excess", self.excess_lpm),
        ];
        if let Some((name, value)) = flows.iter().find(|(_, value)| !(*value > 0.0)) {
            return Err(Error::InvalidSetup(format!(
                "{name} flow must be positive, got {value} lpm"
            )));
        }
        let imbalance =
            self.sheath_lpm + self.aerosol_in_lpm - self.excess_lpm - self.aerosol_out_lpm;
        if imbalance.abs() > FLOW_BALANCE_TOLERANCE {
            return Err(Error::InvalidSetup(format!(
                "inlet and outlet flows differ by {imbalance} lpm"
            )));
        }
        Ok(())
    }
}

/// Centre of the DMA transfer function in mobility space and its full width at half height,
/// both in cm²/(V s)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MobilityWindow {
    pub center: f64,
    pub fwhh: f64,
}

/// Mobility selected by the DMA at `voltage` for the given geometry and flows.
///
/// # Errors
/// Returns [`Error::InvalidSetup`] for unbalanced flows or a voltage outside 1 V to 10 kV.
pub fn mobility_window(
    dma: &DmaGeometry,
    flows: &FlowSettings,
    voltage: f64,
) -> Result<MobilityWindow> {
    flows.validate()?;
    if !(MIN_VOLTAGE..=MAX_VOLTAGE).contains(&voltage) {
        return Err(Error::InvalidSetup(format!(
            "voltage {voltage} V outside {MIN_VOLTAGE}-{MAX_VOLTAGE} V"
        )));
    }

    let delta_axial = dma.length_cm * voltage / (dma.radius_outer_cm / dma.radius_inner_cm).ln();
    let sheath_and_excess =
        lpm_to_cm3_per_sec(flows.sheath_lpm) + lpm_to_cm3_per_sec(flows.excess_lpm);
    let aerosol =
        lpm_to_cm3_per_sec(flows.aerosol_in_lpm) + lpm_to_cm3_per_sec(flows.aerosol_out_lpm);

    let center = sheath_and_excess / (4.0 * PI * delta_axial);
    Ok(MobilityWindow {
        center,
        fwhh: aerosol / sheath_and_excess * center,
    })
}

/// Triangular size distribution passed by the first DMA of a tandem setup.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TheoreticalDistribution {
    pub dp_center: f64,
    /// Diameter at the high mobility foot of the transfer function
    pub dp_left_bottom: f64,
    /// Diameter at the low mobility foot of the transfer function
    pub dp_right_bottom: f64,
}

impl TheoreticalDistribution {
    /// Invert the centre and both feet of the mobility window.
    ///
    /// Mobility falls as diameter grows, so the left (smaller) foot sits at `center + fwhh`.
    ///
    /// # Errors
    /// Propagates setup validation and inversion failures.
    pub fn compute(
        dma: &DmaGeometry,
        flows: &FlowSettings,
        voltage: f64,
        gas: &GasProperties,
        settings: &InversionSettings,
    ) -> Result<Self> {
        let window = mobility_window(dma, flows, voltage)?;
        log::debug!(
            "mobility window at {voltage} V: {:.4e} ± {:.4e}",
            window.center,
            window.fwhh
        );

        let inverter = MobilityInverter::new(*gas, *settings);
        Ok(Self {
            dp_center: inverter.invert(window.center)?,
            dp_left_bottom: inverter.invert(window.center + window.fwhh)?,
            dp_right_bottom: inverter.invert(window.center - window.fwhh)?,
        })
    }
}
