//! ACPU operating points.
//!
//! The chip's points are generated at build time from
//! `data/<chip>/acpu_freq.yaml` into [`ACPU_FREQ_TABLE`](crate::ACPU_FREQ_TABLE).
//! A [`Table`] is an owned, validated copy the driver can tune.

use crate::pmu::vdd::{self, vdd_raw};
use crate::time::Hertz;
use crate::Error;


/// Capacity of a [`Table`].
pub const MAX_OPERATING_POINTS: usize = 32;

/// PLLs that can feed the ACPU source mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pll {
    Pll0 = 0,
    Pll1 = 1,
    /// The reconfigurable PLL. Only reprogrammed while nothing runs from it.
    Pll2 = 2,
    Pll3 = 3,
}

impl Pll {
    pub const COUNT: usize = 4;
}

/// ACPU clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Source {
    /// Low-power crystal oscillator. Always on.
    Lpxo,
    /// The AXI bus clock. Always on.
    Axi,
    Pll(Pll),
}

impl Source {
    /// The PLL behind this source, or `None` for sources without an
    /// enable/disable lifecycle.
    pub const fn pll(self) -> Option<Pll> {
        match self {
            Source::Pll(pll) => Some(pll),
            Source::Lpxo | Source::Axi => None,
        }
    }

    pub const fn is_pll2(self) -> bool {
        matches!(self, Source::Pll(Pll::Pll2))
    }
}

/// PLL2 programming for one operating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllConfig {
    pub l: u8,
    pub m: u32,
    pub n: u32,
    pub pre_div: bool,
}

impl PllConfig {
    pub const fn new(l: u8, m: u32, n: u32, pre_div: bool) -> Self {
        Self { l, m, n, pre_div }
    }
}

/// One ACPU frequency with everything needed to run at it safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OperatingPoint {
    /// Handed to the cpufreq governor when set.
    pub use_for_scaling: bool,
    pub khz: u32,
    pub src: Source,
    /// Source mux selector (3 bits).
    pub src_sel: u8,
    /// Source divider (4 bits).
    pub src_div: u8,
    /// Minimum AXI rate. Voting for it also satisfies the MSMC1 rail.
    pub axi: Hertz,
    pub vdd_mv: u32,
    pub vdd_raw: u8,
    /// Set for PLL2 sourced points only.
    pub pll: Option<PllConfig>,
    /// Loops per jiffy at this rate.
    pub lpj: u32,
}

impl OperatingPoint {
    /// Zero-frequency terminator. A [`Table`] stops copying at it.
    pub const END: OperatingPoint = OperatingPoint {
        use_for_scaling: false,
        khz: 0,
        src: Source::Lpxo,
        src_sel: 0,
        src_div: 0,
        axi: Hertz(0),
        vdd_mv: vdd::VDD_MIN_MV,
        vdd_raw: vdd_raw(vdd::VDD_MIN_MV),
        pll: None,
        lpj: 0,
    };

    pub const fn new(
        khz: u32,
        src: Source,
        src_sel: u8,
        src_div: u8,
        axi: Hertz,
        vdd_mv: u32,
    ) -> Self {
        Self {
            use_for_scaling: true,
            khz,
            src,
            src_sel,
            src_div,
            axi,
            vdd_mv,
            vdd_raw: vdd_raw(vdd_mv),
            pll: None,
            lpj: 0,
        }
    }

    pub const fn with_scaling(mut self, use_for_scaling: bool) -> Self {
        self.use_for_scaling = use_for_scaling;
        self
    }

    pub const fn with_pll(mut self, pll: PllConfig) -> Self {
        self.pll = Some(pll);
        self
    }

    pub(crate) fn set_vdd(&mut self, mv: u32) {
        self.vdd_mv = mv;
        self.vdd_raw = vdd_raw(mv);
    }

    fn check(&self) -> Result<(), Error> {
        if !vdd::is_encodable(self.vdd_mv) || self.vdd_raw != vdd_raw(self.vdd_mv) {
            return Err(Error::InvalidVoltage {
                khz: self.khz,
                mv: self.vdd_mv,
            });
        }
        if self.src_sel > 0x7 || self.src_div > 0xF || self.src.is_pll2() != self.pll.is_some() {
            return Err(Error::InvalidSource { khz: self.khz });
        }
        Ok(())
    }
}

/// Owned, validated operating points in table order.
#[derive(Debug, Clone)]
pub struct Table {
    points: [OperatingPoint; MAX_OPERATING_POINTS],
    len: usize,
}

impl Table {
    /// Copies `points` up to the first zero-frequency entry and validates
    /// them.
    pub fn new(points: &[OperatingPoint]) -> Result<Self, Error> {
        let mut table = Self {
            points: [OperatingPoint::END; MAX_OPERATING_POINTS],
            len: 0,
        };

        for point in points.iter().take_while(|p| p.khz != 0) {
            if table.len == MAX_OPERATING_POINTS {
                return Err(Error::TooManyPoints);
            }
            point.check()?;
            if point.use_for_scaling && table.eligible().any(|p| p.khz == point.khz) {
                return Err(Error::DuplicateFrequency { khz: point.khz });
            }
            table.points[table.len] = *point;
            table.len += 1;
        }

        if table.len == 0 {
            return Err(Error::EmptyTable);
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn points(&self) -> &[OperatingPoint] {
        &self.points[..self.len]
    }

    pub fn get(&self, index: usize) -> Option<&OperatingPoint> {
        self.points().get(index)
    }

    pub(crate) fn points_mut(&mut self) -> &mut [OperatingPoint] {
        &mut self.points[..self.len]
    }

    /// Points handed to the cpufreq governor.
    pub fn eligible(&self) -> impl Iterator<Item = &OperatingPoint> + '_ {
        self.points().iter().filter(|p| p.use_for_scaling)
    }

    /// Index of the first point running at exactly `khz`.
    pub fn find(&self, khz: u32) -> Option<usize> {
        if khz == 0 {
            return None;
        }
        self.points().iter().position(|p| p.khz == khz)
    }

    /// Index of the first point with this source mux encoding.
    pub fn find_by_src(&self, sel: u8, div: u8) -> Option<usize> {
        self.points()
            .iter()
            .position(|p| p.src_sel == sel && p.src_div == div)
    }

    /// Index of the first point at or after `from` whose PLL2 L value is `l`.
    pub fn find_pll2(&self, l: u8, from: usize) -> Option<usize> {
        self.points()
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, p)| matches!(p.pll, Some(pll) if pll.l == l))
            .map(|(i, _)| i)
    }

    /// Picks the point to park on while PLL2 is reprogrammed: the last
    /// non-PLL2 point scanned before the point PLL2 is currently programmed
    /// for.
    pub fn select_backup(&self, pll2_l: u8) -> Result<usize, Error> {
        let mut backup = None;
        for (i, point) in self.points().iter().enumerate() {
            if !point.src.is_pll2() {
                backup = Some(i);
            }
            if matches!(point.pll, Some(pll) if pll.l == pll2_l) {
                return backup.ok_or(Error::NoBackupPoint);
            }
        }

        Err(Error::UnknownPllRate { l: pll2_l })
    }

    /// Drops every point after `index`.
    pub(crate) fn truncate_after(&mut self, index: usize) {
        if index + 1 < self.len {
            for point in &mut self.points[index + 1..self.len] {
                *point = OperatingPoint::END;
            }
            self.len = index + 1;
        }
    }

    /// Fills in every point's loops per jiffy from the value measured at
    /// `base_khz`. Values too large for `u32` saturate.
    pub(crate) fn scale_lpj(&mut self, base_lpj: u32, base_khz: u32) {
        for point in self.points_mut() {
            let lpj = base_lpj as u64 * point.khz as u64 / base_khz as u64;
            point.lpj = u32::try_from(lpj).unwrap_or(u32::MAX);
        }
    }
}
