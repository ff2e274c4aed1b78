//! ACPU frequency and voltage switching.
//!
//! [`AcpuClock`] owns the operating-point table and the hardware behind the
//! ACPU clock, and moves the CPU between points without running it faster
//! than its supply allows, without glitching the clock and without touching
//! PLL2 while the CPU runs from it.
//!
//! ```ignore
//! let acpu = AcpuClock::new(Config::new().with_loops_per_jiffy(lpj), resources)?;
//! acpu.set_rate(0, 1_024_000, Reason::Scaling)?;
//!
//! // From the idle loop, interrupts already masked:
//! let resume_khz = acpu.wait_for_irq(cs);
//! ```

use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use critical_section::CriticalSection;
use embassy_sync::blocking_mutex::CriticalSectionMutex;
use embedded_hal_1::delay::DelayNs;

use crate::clk::pll::{config_pll2, read_pll2_l};
use crate::clk::switch::set_src;
use crate::clk::{boot, BusVote, BusVoteError, SourceGate, SourceRefs};
use crate::config::Config;
use crate::pmu::vdd::{self, set_acpu_vdd, RegulatorError, VoltageRegulator};
use crate::table::{OperatingPoint, Pll, Source, Table, MAX_OPERATING_POINTS};
use crate::time::Hertz;


/// ACPU clock error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// No operating point runs at this frequency.
    UnsupportedFrequency { khz: u32 },
    /// Raising the ACPU rail failed. Nothing was switched.
    VoltageRaiseFailed { mv: u32, cause: RegulatorError },
    /// Raising the bus vote failed. The clock path was not touched.
    BusVoteRaiseFailed { rate: Hertz, cause: BusVoteError },
    /// PLL2 runs at an L value the table does not describe.
    UnknownPllRate { l: u8 },
    /// The source mux runs an encoding the table does not describe.
    UnknownBootSource { sel: u8, div: u8 },
    /// The core mux selects neither the raw source mux nor the SCPLL.
    InvalidCoreMux { mux: u8 },
    /// No non-PLL2 point precedes the point PLL2 runs at.
    NoBackupPoint,
    /// Voltage is not encodable by the regulator.
    InvalidVoltage { khz: u32, mv: u32 },
    /// Source, mux encoding and PLL2 configuration do not agree.
    InvalidSource { khz: u32 },
    /// Two scaling points share a frequency.
    DuplicateFrequency { khz: u32 },
    /// More points than a table can hold.
    TooManyPoints,
    /// No points before the terminator.
    EmptyTable,
    /// The driver state is already borrowed further up the call stack.
    Busy,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedFrequency { khz } => write!(f, "unsupported ACPU rate {} kHz", khz),
            Error::VoltageRaiseFailed { mv, cause } => {
                write!(f, "ACPU VDD increase to {} mV failed ({})", mv, cause)
            }
            Error::BusVoteRaiseFailed { rate, cause } => {
                write!(f, "setting AXI min rate to {} failed ({})", rate, cause)
            }
            Error::UnknownPllRate { l } => write!(f, "unknown PLL2 lval {}", l),
            Error::UnknownBootSource { sel, div } => {
                write!(f, "ACPU clock reports invalid speed (sel {}, div {})", sel, div)
            }
            Error::InvalidCoreMux { mux } => write!(f, "ACPU clock reports invalid source {}", mux),
            Error::NoBackupPoint => write!(f, "no backup point for PLL2 reprogramming"),
            Error::InvalidVoltage { khz, mv } => {
                write!(f, "{} kHz: {} mV is not a valid regulator level", khz, mv)
            }
            Error::InvalidSource { khz } => write!(f, "{} kHz: inconsistent source setting", khz),
            Error::DuplicateFrequency { khz } => write!(f, "{} kHz listed twice", khz),
            Error::TooManyPoints => {
                write!(f, "more than {} operating points", MAX_OPERATING_POINTS)
            }
            Error::EmptyTable => write!(f, "no operating points"),
            Error::Busy => write!(f, "ACPU clock state is busy"),
        }
    }
}

impl core::error::Error for Error {}

/// Why a rate change is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reason {
    /// Governor request. Serialized by the driver lock.
    Scaling,
    /// Entering wait-for-interrupt. Leaves source references, bus vote and
    /// voltage for the next full switch.
    IdleShortSleep,
    /// Entering power collapse. Lowers the bus vote but never the voltage.
    IdlePowerCollapse,
}

/// Hardware the driver runs on.
pub struct Resources<R, V, B, G, D> {
    pub regs: R,
    pub vreg: V,
    pub bus: B,
    pub gate: G,
    pub delay: D,
}

/// One row of the governor's frequency table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FreqTableEntry {
    pub index: usize,
    pub khz: u32,
}

/// Receives the frequencies the governor may pick from.
pub trait CpufreqRegistry {
    fn register(&mut self, table: &[FreqTableEntry]);
}

/// Rate used while waiting for an interrupt or entering power collapse.
pub const fn max_axi_khz() -> u32 {
    crate::MAX_AXI_KHZ
}

struct State<R, V, B, G, D> {
    res: Resources<R, V, B, G, D>,
    table: Table,
    active: usize,
    backup: usize,
    refs: SourceRefs,
    /// References kept by short-sleep switches for sources the CPU has left.
    deferred: [u8; Pll::COUNT],
    /// Level the ACPU rail was last set to.
    vdd_mv: u32,
    /// Rate the bus was last voted to.
    bus: Hertz,
    vdd_switch_time_us: u32,
}

/// Rate and calibration of the active point, readable without the lock.
struct Published {
    khz: AtomicU32,
    lpj: AtomicU32,
}

impl Published {
    fn publish(&self, point: &OperatingPoint) {
        self.lpj.store(point.lpj, Ordering::Relaxed);
        self.khz.store(point.khz, Ordering::Release);
    }
}

impl<R, V, B, G, D> State<R, V, B, G, D>
where
    R: crate::regs::RegisterAccess,
    V: VoltageRegulator,
    B: BusVote,
    G: SourceGate,
    D: DelayNs,
{
    fn set_rate(&mut self, published: &Published, khz: u32, reason: Reason) -> Result<(), Error> {
        let strt = self.active_point();
        if khz == strt.khz {
            return Ok(());
        }

        let tgt_index = self
            .table
            .find(khz)
            .ok_or(Error::UnsupportedFrequency { khz })?;
        let tgt = self.table.points()[tgt_index];
        let backup = self.table.points()[self.backup];
        let pll2_hop = strt.src.is_pll2() && tgt.src.is_pll2();
        let src_changed = strt.src != tgt.src;

        // Increase VDD if needed.
        if reason == Reason::Scaling && tgt.vdd_mv > self.vdd_mv {
            if let Err(cause) = self.set_vdd_level(&tgt) {
                error!("ACPU VDD increase to {} mV failed ({:?})", tgt.vdd_mv, cause);
                return Err(Error::VoltageRaiseFailed {
                    mv: tgt.vdd_mv,
                    cause,
                });
            }
        }

        debug!("Switching from ACPU rate {} kHz -> {} kHz", strt.khz, tgt.khz);

        // Increase the AXI bus frequency before the ACPU frequency. Voting
        // for high AXI rates also raises the MSMC1 voltage.
        if tgt.axi > self.bus {
            if let Err(cause) = self.res.bus.set_min_rate(tgt.axi) {
                error!("Setting AXI min rate failed ({:?})", cause);
                return Err(Error::BusVoteRaiseFailed {
                    rate: tgt.axi,
                    cause,
                });
            }
            self.bus = tgt.axi;
        }

        // Move off of PLL2 if we're reprogramming it.
        if pll2_hop {
            self.refs.enable(&mut self.res.gate, backup.src);
            set_src(&mut self.res.regs, &backup);
            self.refs.disable(&mut self.res.gate, strt.src);
        }

        // Reconfigure PLL2 if we're moving to it.
        if let Some(pll) = tgt.pll {
            self.release_deferred(Pll::Pll2);
            config_pll2(&mut self.res.regs, &pll);
        }

        // Make sure target PLL is on.
        if src_changed {
            if !self.reuse_deferred(tgt.src) {
                self.refs.enable(&mut self.res.gate, tgt.src);
            }
        } else if pll2_hop {
            self.refs.enable(&mut self.res.gate, tgt.src);
        }

        // Perform the frequency switch.
        set_src(&mut self.res.regs, &tgt);
        self.active = tgt_index;
        published.publish(&tgt);

        if pll2_hop {
            self.refs.disable(&mut self.res.gate, backup.src);
        }

        // Nothing else to do for SWFI.
        if reason == Reason::IdleShortSleep {
            if src_changed {
                self.defer_release(strt.src);
            }
            return Ok(());
        }

        // Turn off previous PLL if not used.
        if src_changed {
            self.refs.disable(&mut self.res.gate, strt.src);
        }
        for pll in [Pll::Pll0, Pll::Pll1, Pll::Pll2, Pll::Pll3] {
            self.release_deferred(pll);
        }

        // Decrease the AXI bus frequency if we can.
        if tgt.axi < self.bus {
            match self.res.bus.set_min_rate(tgt.axi) {
                Ok(()) => self.bus = tgt.axi,
                Err(e) => warn!("Setting AXI min rate failed ({:?})", e),
            }
        }

        // Nothing else to do for power collapse.
        if reason == Reason::IdlePowerCollapse {
            return Ok(());
        }

        // Drop VDD level if we can.
        if tgt.vdd_mv < self.vdd_mv {
            if let Err(e) = self.set_vdd_level(&tgt) {
                warn!("ACPU VDD decrease to {} mV failed ({:?})", tgt.vdd_mv, e);
            }
        }

        debug!("ACPU speed change complete");
        Ok(())
    }

    fn active_point(&self) -> OperatingPoint {
        self.table.points()[self.active]
    }

    fn set_vdd_level(&mut self, point: &OperatingPoint) -> Result<(), RegulatorError> {
        set_acpu_vdd(
            &mut self.res.vreg,
            &mut self.res.delay,
            point,
            self.vdd_switch_time_us,
        )?;
        self.vdd_mv = point.vdd_mv;
        Ok(())
    }

    fn defer_release(&mut self, src: Source) {
        if let Some(pll) = src.pll() {
            self.deferred[pll as usize] += 1;
        }
    }

    /// Takes over a reference a short-sleep switch left behind.
    fn reuse_deferred(&mut self, src: Source) -> bool {
        match src.pll() {
            Some(pll) if self.deferred[pll as usize] > 0 => {
                self.deferred[pll as usize] -= 1;
                true
            }
            _ => false,
        }
    }

    fn release_deferred(&mut self, pll: Pll) {
        while self.deferred[pll as usize] > 0 {
            self.deferred[pll as usize] -= 1;
            self.refs.disable(&mut self.res.gate, Source::Pll(pll));
        }
    }

    fn set_vdd(&mut self, khz: u32, mv: i32) -> usize {
        let step = vdd::V_STEP_MV as i32;
        let mv = mv / step * step;
        let mut updated = 0;

        for point in self.table.points_mut() {
            if !point.use_for_scaling {
                continue;
            }
            let new_mv = if khz == 0 {
                vdd::clamp_mv(point.vdd_mv as i32 + mv)
            } else if point.khz == khz {
                vdd::clamp_mv(mv)
            } else {
                continue;
            };
            point.set_vdd(new_mv);
            updated += 1;
        }

        updated
    }
}

/// ACPU clock driver.
pub struct AcpuClock<R, V, B, G, D> {
    state: CriticalSectionMutex<RefCell<State<R, V, B, G, D>>>,
    published: Published,
    acpu_switch_time_us: u32,
}

impl<R, V, B, G, D> AcpuClock<R, V, B, G, D>
where
    R: crate::regs::RegisterAccess,
    V: VoltageRegulator,
    B: BusVote,
    G: SourceGate,
    D: DelayNs,
{
    /// Takes over the ACPU clock using the chip's operating points.
    pub fn new(config: Config, res: Resources<R, V, B, G, D>) -> Result<Self, Error> {
        Self::with_table(config, Table::new(crate::ACPU_FREQ_TABLE)?, res)
    }

    /// Takes over the ACPU clock using `table`.
    ///
    /// Finds the backup point from PLL2's programmed rate, detects the
    /// running point, sets its voltage and bus vote and takes its source
    /// reference. A CPU left on the SCPLL is moved onto the raw mux through
    /// the backup point, with the backup's PLL held on for the hop.
    pub fn with_table(
        config: Config,
        mut table: Table,
        mut res: Resources<R, V, B, G, D>,
    ) -> Result<Self, Error> {
        let pll2_l = read_pll2_l(&mut res.regs);
        let backup = table.select_backup(pll2_l).map_err(|e| {
            error!("Unknown PLL2 lval {}", pll2_l);
            e
        })?;

        if config.truncate_at_boot_pll2 {
            if let Some(index) = table.find_pll2(pll2_l, 0) {
                table.truncate_after(index);
            }
        }

        let boot = boot::detect(&mut res.regs, &table, pll2_l).map_err(|e| {
            error!("ACPU boot state not recognized: {}", e);
            e
        })?;
        let point = table.points()[boot.index];
        let backup_point = table.points()[backup];

        // Leaving the SCPLL runs the backup point first, so its levels have
        // to be covered as well.
        let (vdd_point, axi) = if boot.on_scpll {
            let vdd_point = if backup_point.vdd_mv > point.vdd_mv {
                backup_point
            } else {
                point
            };
            (vdd_point, point.axi.max(backup_point.axi))
        } else {
            (point, point.axi)
        };

        // Set initial ACPU VDD.
        set_acpu_vdd(&mut res.vreg, &mut res.delay, &vdd_point, config.vdd_switch_time_us)
            .map_err(|cause| {
                error!(
                    "Setting initial ACPU VDD to {} mV failed ({:?})",
                    vdd_point.vdd_mv, cause
                );
                Error::VoltageRaiseFailed {
                    mv: vdd_point.vdd_mv,
                    cause,
                }
            })?;

        let bus = match res.bus.set_min_rate(axi) {
            Ok(()) => axi,
            Err(e) => {
                warn!("Setting AXI min rate failed ({:?})", e);
                Hertz(0)
            }
        };

        let mut refs = SourceRefs::new();
        if boot.on_scpll {
            refs.enable(&mut res.gate, backup_point.src);
            boot::leave_scpll(&mut res.regs, &backup_point);
        }

        // Initialize current PLL's reference count.
        refs.enable(&mut res.gate, point.src);

        if boot.on_scpll {
            set_src(&mut res.regs, &point);
            refs.disable(&mut res.gate, backup_point.src);
        }

        table.scale_lpj(config.loops_per_jiffy, point.khz);
        let point = table.points()[boot.index];

        info!("ACPU running at {} kHz", point.khz);

        Ok(Self {
            state: CriticalSectionMutex::new(RefCell::new(State {
                res,
                table,
                active: boot.index,
                backup,
                refs,
                deferred: [0; Pll::COUNT],
                vdd_mv: vdd_point.vdd_mv,
                bus,
                vdd_switch_time_us: config.vdd_switch_time_us,
            })),
            published: Published {
                khz: AtomicU32::new(point.khz),
                lpj: AtomicU32::new(point.lpj),
            },
            acpu_switch_time_us: config.acpu_switch_time_us,
        })
    }

    /// Moves the ACPU to `khz`.
    ///
    /// `Reason::Scaling` runs under the driver lock. The idle reasons enter a
    /// critical section; idle code that already holds one should call
    /// [`set_rate_with_cs`](Self::set_rate_with_cs). All CPUs share one
    /// clock, so `cpu` is not used.
    pub fn set_rate(&self, cpu: usize, khz: u32, reason: Reason) -> Result<(), Error> {
        match reason {
            Reason::Scaling => self
                .state
                .lock(|state| Self::switch(state, &self.published, khz, reason)),
            Reason::IdleShortSleep | Reason::IdlePowerCollapse => {
                critical_section::with(|cs| self.set_rate_with_cs(cs, cpu, khz, reason))
            }
        }
    }

    /// Moves the ACPU to `khz` from inside a critical section.
    pub fn set_rate_with_cs(
        &self,
        cs: CriticalSection,
        _cpu: usize,
        khz: u32,
        reason: Reason,
    ) -> Result<(), Error> {
        Self::switch(self.state.borrow(cs), &self.published, khz, reason)
    }

    fn switch(
        state: &RefCell<State<R, V, B, G, D>>,
        published: &Published,
        khz: u32,
        reason: Reason,
    ) -> Result<(), Error> {
        let mut state = state.try_borrow_mut().map_err(|_| Error::Busy)?;
        state.set_rate(published, khz, reason)
    }

    /// Current ACPU rate in kHz.
    pub fn get_rate(&self, _cpu: usize) -> u32 {
        self.published.khz.load(Ordering::Acquire)
    }

    /// Worst case source switch latency.
    pub fn switch_time_us(&self) -> u32 {
        self.acpu_switch_time_us
    }

    /// Loops per jiffy at the current rate.
    pub fn loops_per_jiffy(&self) -> u32 {
        self.published.lpj.load(Ordering::Relaxed)
    }

    /// Drops to [`max_axi_khz`] for power collapse and returns the rate to
    /// restore on wakeup.
    pub fn power_collapse(&self, cs: CriticalSection) -> u32 {
        self.idle(cs, Reason::IdlePowerCollapse)
    }

    /// Drops to [`max_axi_khz`] for wait-for-interrupt and returns the rate
    /// to restore on wakeup.
    pub fn wait_for_irq(&self, cs: CriticalSection) -> u32 {
        self.idle(cs, Reason::IdleShortSleep)
    }

    fn idle(&self, cs: CriticalSection, reason: Reason) -> u32 {
        let khz = self.get_rate(0);
        if let Err(e) = self.set_rate_with_cs(cs, 0, max_axi_khz(), reason) {
            warn!("Idle switch to {} kHz failed: {}", max_axi_khz(), e);
        }
        khz
    }

    /// Sets the voltage of the scaling point at `khz`, or offsets every
    /// scaling point by `mv` when `khz` is `0`.
    ///
    /// `mv` is rounded toward zero to the regulator step and results are
    /// clamped to the regulator range. Takes effect at the next switch.
    /// Returns the number of points changed.
    pub fn set_vdd(&self, khz: u32, mv: i32) -> Result<usize, Error> {
        self.state.lock(|state| {
            let mut state = state.try_borrow_mut().map_err(|_| Error::Busy)?;
            Ok(state.set_vdd(khz, mv))
        })
    }

    /// Calls `f` with the frequency and voltage of every scaling point.
    pub fn vdd_levels(&self, mut f: impl FnMut(u32, u32)) -> Result<(), Error> {
        self.state.lock(|state| {
            let state = state.try_borrow().map_err(|_| Error::Busy)?;
            for point in state.table.eligible() {
                f(point.khz, point.vdd_mv);
            }
            Ok(())
        })
    }

    /// Writes one `"<khz>: <mv>"` line per scaling point.
    pub fn write_vdd_levels<W: fmt::Write>(&self, w: &mut W) -> fmt::Result {
        let mut res = Ok(());
        self.vdd_levels(|khz, mv| {
            if res.is_ok() {
                res = writeln!(w, "{:>8}: {:>4}", khz, mv);
            }
        })
        .map_err(|_| fmt::Error)?;
        res
    }

    /// Hands the scaling points to the governor.
    pub fn setup_cpufreq_table<C: CpufreqRegistry>(&self, registry: &mut C) -> Result<(), Error> {
        let mut entries = [FreqTableEntry { index: 0, khz: 0 }; MAX_OPERATING_POINTS];
        let len = self.state.lock(|state| {
            let state = state.try_borrow().map_err(|_| Error::Busy)?;
            let mut len = 0;
            for (index, point) in state.table.eligible().enumerate() {
                entries[index] = FreqTableEntry {
                    index,
                    khz: point.khz,
                };
                len += 1;
            }
            Ok::<_, Error>(len)
        })?;

        registry.register(&entries[..len]);
        Ok(())
    }
}
