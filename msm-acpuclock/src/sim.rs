//! Simulated ACPU clock hardware for tests.
//!
//! One [`Sim`] stands in for every collaborator of the driver. All clones
//! share the same register file and record into the same event log, so a
//! test can hand clones to [`Resources`] and inspect what the driver did.

extern crate std;

use core::cell::{RefCell, RefMut};
use core::fmt;
use std::boxed::Box;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal_1::delay::DelayNs;

use crate::acpuclk::Resources;
use crate::clk::{BusVote, BusVoteError, SourceGate};
use crate::pmu::vdd::{RegulatorError, VoltageRegulator, V_STEP_MV};
use crate::regs::{ClkCtl, ClkSel, Pll2Config, Reg, RegisterAccess};
use crate::table::{OperatingPoint, Pll};
use crate::time::Hertz;

/// Something the driver did to the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Regulator set to this level.
    Vdd { mv: u32 },
    /// Settle delay.
    Settle { us: u32 },
    /// Bus vote changed.
    Bus(Hertz),
    Enable(Pll),
    Disable(Pll),
    /// `PLL2_CONFIG` written, with the L/M/N values in place at that time.
    Pll2 { l: u8, m: u32, n: u32, pre_div: bool },
    /// `SRC1NO` toggled, bringing this encoding live.
    Switch { sel: u8, div: u8 },
    /// Core mux changed.
    CoreMux(u8),
    Barrier,
}

/// Called from inside a bus vote, with the hardware not borrowed.
#[derive(Default)]
pub struct Hook(Option<Box<dyn FnMut()>>);

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.is_some() { "Hook(Some)" } else { "Hook(None)" })
    }
}

#[derive(Debug, Default)]
pub struct Hw {
    pub regs: [u32; Reg::COUNT],
    pub events: Vec<Event>,
    pub pll_on: [bool; Pll::COUNT],
    pub vdd_mv: Option<u32>,
    pub bus: Option<Hertz>,
    pub vdd_error: Option<RegulatorError>,
    pub bus_error: Option<BusVoteError>,
    /// PLL2 register writes while PLL2 was on.
    pub live_pll2_writes: usize,
    pub on_bus_vote: Hook,
}

#[derive(Debug, Clone, Default)]
pub struct Sim(Rc<RefCell<Hw>>);

/// Chip table entry running at `khz`.
pub fn point(khz: u32) -> OperatingPoint {
    crate::ACPU_FREQ_TABLE
        .iter()
        .find(|p| p.khz == khz)
        .copied()
        .unwrap()
}

impl Sim {
    /// Hardware left by the boot loader running `point` from the raw mux,
    /// with PLL2 programmed for `pll2_l`.
    pub fn boot(point: &OperatingPoint, pll2_l: u8) -> Self {
        let sim = Self::default();
        {
            let mut hw = sim.hw();
            let clk_sel = ClkSel(0);
            let mut clk_ctl = ClkCtl(0);
            clk_ctl.set_half(clk_sel.live_half(), point.src_sel, point.src_div);
            hw.regs[Reg::ClkSel as usize] = clk_sel.0;
            hw.regs[Reg::ClkCtl as usize] = clk_ctl.0;
            hw.regs[Reg::Pll2L as usize] = pll2_l as u32;
            if let Some(pll) = point.src.pll() {
                hw.pll_on[pll as usize] = true;
            }
        }
        sim
    }

    /// Hardware left by the boot loader running from the SCPLL.
    pub fn boot_scpll(pll2_l: u8) -> Self {
        let sim = Self::default();
        {
            let mut hw = sim.hw();
            let mut clk_sel = ClkSel(0);
            clk_sel.set_core_mux(ClkSel::CORE_MUX_SCPLL);
            hw.regs[Reg::ClkSel as usize] = clk_sel.0;
            hw.regs[Reg::Pll2L as usize] = pll2_l as u32;
        }
        sim
    }

    pub fn resources(&self) -> Resources<Sim, Sim, Sim, Sim, Sim> {
        Resources {
            regs: self.clone(),
            vreg: self.clone(),
            bus: self.clone(),
            gate: self.clone(),
            delay: self.clone(),
        }
    }

    pub fn hw(&self) -> RefMut<'_, Hw> {
        self.0.borrow_mut()
    }

    pub fn events(&self) -> Vec<Event> {
        self.hw().events.clone()
    }

    pub fn clear_events(&self) {
        self.hw().events.clear();
    }

    pub fn fail_vdd(&self, error: Option<RegulatorError>) {
        self.hw().vdd_error = error;
    }

    pub fn fail_bus(&self, error: Option<BusVoteError>) {
        self.hw().bus_error = error;
    }

    /// Runs `f` at the start of every bus vote.
    pub fn on_bus_vote(&self, f: impl FnMut() + 'static) {
        self.hw().on_bus_vote = Hook(Some(Box::new(f)));
    }

    /// Source select and divider driving the CPU.
    pub fn live_src(&self) -> (u8, u8) {
        let hw = self.hw();
        let clk_sel = ClkSel(hw.regs[Reg::ClkSel as usize]);
        let clk_ctl = ClkCtl(hw.regs[Reg::ClkCtl as usize]);
        (clk_ctl.sel(clk_sel.live_half()), clk_ctl.div(clk_sel.live_half()))
    }

    pub fn pll_on(&self, pll: Pll) -> bool {
        self.hw().pll_on[pll as usize]
    }
}

impl RegisterAccess for Sim {
    fn read(&mut self, reg: Reg) -> u32 {
        self.hw().regs[reg as usize]
    }

    fn write(&mut self, reg: Reg, value: u32) {
        let mut hw = self.hw();
        let old = core::mem::replace(&mut hw.regs[reg as usize], value);

        match reg {
            Reg::ClkSel => {
                let (old, new) = (ClkSel(old), ClkSel(value));
                if old.src1no() != new.src1no() {
                    let clk_ctl = ClkCtl(hw.regs[Reg::ClkCtl as usize]);
                    let half = new.live_half();
                    hw.events.push(Event::Switch {
                        sel: clk_ctl.sel(half),
                        div: clk_ctl.div(half),
                    });
                }
                if old.core_mux() != new.core_mux() {
                    hw.events.push(Event::CoreMux(new.core_mux()));
                }
            }
            Reg::ClkCtl => {}
            Reg::Pll2L | Reg::Pll2M | Reg::Pll2N | Reg::Pll2Config => {
                if hw.pll_on[Pll::Pll2 as usize] {
                    hw.live_pll2_writes += 1;
                }
                if reg == Reg::Pll2Config {
                    let event = Event::Pll2 {
                        l: hw.regs[Reg::Pll2L as usize] as u8,
                        m: hw.regs[Reg::Pll2M as usize],
                        n: hw.regs[Reg::Pll2N as usize],
                        pre_div: Pll2Config(value).pre_div(),
                    };
                    hw.events.push(event);
                }
            }
        }
    }

    fn barrier(&mut self) {
        self.hw().events.push(Event::Barrier);
    }
}

impl VoltageRegulator for Sim {
    fn set_level(&mut self, raw: u8) -> Result<(), RegulatorError> {
        let mut hw = self.hw();
        if let Some(e) = hw.vdd_error {
            return Err(e);
        }
        let mv = ((raw as u32 & 0x1F) + 30) * V_STEP_MV;
        hw.vdd_mv = Some(mv);
        hw.events.push(Event::Vdd { mv });
        Ok(())
    }
}

impl BusVote for Sim {
    fn set_min_rate(&mut self, rate: Hertz) -> Result<(), BusVoteError> {
        let hook = self.hw().on_bus_vote.0.take();
        if let Some(mut f) = hook {
            f();
            self.hw().on_bus_vote = Hook(Some(f));
        }

        let mut hw = self.hw();
        if let Some(e) = hw.bus_error {
            return Err(e);
        }
        hw.bus = Some(rate);
        hw.events.push(Event::Bus(rate));
        Ok(())
    }
}

impl SourceGate for Sim {
    fn enable(&mut self, pll: Pll) {
        let mut hw = self.hw();
        hw.pll_on[pll as usize] = true;
        hw.events.push(Event::Enable(pll));
    }

    fn disable(&mut self, pll: Pll) {
        let mut hw = self.hw();
        hw.pll_on[pll as usize] = false;
        hw.events.push(Event::Disable(pll));
    }
}

impl DelayNs for Sim {
    fn delay_ns(&mut self, ns: u32) {
        self.hw().events.push(Event::Settle { us: ns / 1_000 });
    }

    fn delay_us(&mut self, us: u32) {
        self.hw().events.push(Event::Settle { us });
    }
}
