//! Board configuration for the ACPU clock driver.

/// Board timing constants and table policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub struct Config {
    /// Worst case time for one source switch. Reported to the governor.
    pub acpu_switch_time_us: u32,
    /// Time the ACPU rail needs to settle after a level change.
    pub vdd_switch_time_us: u32,
    /// Loops per jiffy measured at the boot rate. `0` leaves the
    /// calibration of every point at zero.
    pub loops_per_jiffy: u32,
    /// Drop every point above the one PLL2 was programmed for at boot.
    ///
    /// Useful when the boot loader programs PLL2 for the highest rate the
    /// part is binned for.
    pub truncate_at_boot_pll2: bool,
}

impl Config {
    /// MSM7x30 reference board timings.
    pub const fn new() -> Self {
        Self {
            acpu_switch_time_us: 50,
            vdd_switch_time_us: 62,
            loops_per_jiffy: 0,
            truncate_at_boot_pll2: false,
        }
    }

    pub const fn with_acpu_switch_time_us(mut self, us: u32) -> Self {
        self.acpu_switch_time_us = us;
        self
    }

    pub const fn with_vdd_switch_time_us(mut self, us: u32) -> Self {
        self.vdd_switch_time_us = us;
        self
    }

    pub const fn with_loops_per_jiffy(mut self, lpj: u32) -> Self {
        self.loops_per_jiffy = lpj;
        self
    }

    pub const fn with_truncate_at_boot_pll2(mut self, truncate: bool) -> Self {
        self.truncate_at_boot_pll2 = truncate;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
