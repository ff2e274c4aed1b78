//! ACPU VDD control through the SPM voltage regulator.

use embedded_hal_1::delay::DelayNs;

use crate::table::OperatingPoint;

/// Reference select: 0 = 0.625 V (50 mV step), 1 = 0.3125 V (25 mV step).
pub const VREF_SEL: u8 = 1;
/// Minimum voltage step size.
pub const V_STEP_MV: u32 = 25 * (2 - VREF_SEL as u32);
/// Enable VREG, pull-down if disabled.
pub const VREG_CONFIG: u8 = (1 << 7) | (1 << 6);
pub const VREG_DATA: u8 = VREG_CONFIG | (VREF_SEL << 5);

// mv = (750 mV + raw * 25 mV) * (2 - VREF_SEL)
const VDD_BASE_STEPS: u32 = 30;
const VDD_RAW_MASK: u32 = 0x1F;

/// Lowest encodable ACPU voltage.
pub const VDD_MIN_MV: u32 = V_STEP_MV * VDD_BASE_STEPS;
/// Highest encodable ACPU voltage.
pub const VDD_MAX_MV: u32 = V_STEP_MV * (VDD_BASE_STEPS + VDD_RAW_MASK);

pub const fn is_encodable(mv: u32) -> bool {
    mv % V_STEP_MV == 0 && mv >= VDD_MIN_MV && mv <= VDD_MAX_MV
}

/// Regulator encoding of `mv`.
///
/// Panics if `mv` is not step aligned or out of range. Inside a `const`
/// table this turns a bad voltage into a compile error.
///
/// Note: Uses `::core::panic!` to bypass defmt's panic override,
/// which is not const-compatible.
pub const fn vdd_raw(mv: u32) -> u8 {
    if mv % V_STEP_MV != 0 {
        ::core::panic!("VDD is not a multiple of the regulator step");
    }
    if mv < VDD_MIN_MV || mv > VDD_MAX_MV {
        ::core::panic!("VDD is outside the regulator range");
    }
    ((mv / V_STEP_MV - VDD_BASE_STEPS) as u8) | VREG_DATA
}

/// Rounds `mv` toward zero to a whole step and clamps it to the
/// encodable range.
pub const fn clamp_mv(mv: i32) -> u32 {
    let step = V_STEP_MV as i32;
    let mv = mv / step * step;
    if mv < VDD_MIN_MV as i32 {
        VDD_MIN_MV
    } else if mv > VDD_MAX_MV as i32 {
        VDD_MAX_MV
    } else {
        mv as u32
    }
}

/// Regulator failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegulatorError {
    /// The regulator refused the level.
    Rejected,
    /// The regulator did not acknowledge in time.
    Timeout,
}

impl core::fmt::Display for RegulatorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegulatorError::Rejected => write!(f, "level rejected"),
            RegulatorError::Timeout => write!(f, "no acknowledge"),
        }
    }
}

/// Regulator that feeds the ACPU rail.
pub trait VoltageRegulator {
    /// Requests the level encoded by [`vdd_raw`].
    fn set_level(&mut self, raw: u8) -> Result<(), RegulatorError>;
}

/// Moves the ACPU rail to `point`'s voltage and waits `settle_us`.
pub(crate) fn set_acpu_vdd<V, D>(
    vreg: &mut V,
    delay: &mut D,
    point: &OperatingPoint,
    settle_us: u32,
) -> Result<(), RegulatorError>
where
    V: VoltageRegulator,
    D: DelayNs,
{
    vreg.set_level(point.vdd_raw)?;

    // Wait for voltage to stabilize.
    delay.delay_us(settle_us);
    Ok(())
}
