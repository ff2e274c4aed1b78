//! ACPU clock controller registers.
//!
//! The driver never dereferences raw addresses itself. Everything goes
//! through [`RegisterAccess`], so the switching logic can run against
//! [`Mmio`] on hardware or against a simulated register file in tests.

use core::sync::atomic::{compiler_fence, Ordering};

/// Register blocks the driver touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Block {
    /// ACPU clock controller (`MSM_ACC_BASE`).
    Acc,
    /// Global clock controller (`MSM_CLK_CTL_BASE`).
    ClkCtl,
}

/// Registers used for ACPU switching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    /// `SCSS_CLK_CTL`: double-buffered source select and divider.
    ClkCtl = 0,
    /// `SCSS_CLK_SEL`: which buffer half is live, and the core mux.
    ClkSel = 1,
    /// `PLL2_L_VAL`
    Pll2L = 2,
    /// `PLL2_M_VAL`
    Pll2M = 3,
    /// `PLL2_N_VAL`
    Pll2N = 4,
    /// `PLL2_CONFIG`
    Pll2Config = 5,
}

impl Reg {
    pub const COUNT: usize = 6;

    pub const fn block(self) -> Block {
        match self {
            Reg::ClkCtl | Reg::ClkSel => Block::Acc,
            _ => Block::ClkCtl,
        }
    }

    /// Byte offset from the start of [`Reg::block`].
    pub const fn offset(self) -> usize {
        match self {
            Reg::ClkCtl => 0x04,
            Reg::ClkSel => 0x08,
            Reg::Pll2L => 0x33C,
            Reg::Pll2M => 0x340,
            Reg::Pll2N => 0x344,
            Reg::Pll2Config => 0x34C,
        }
    }
}

/// Narrow register access capability.
pub trait RegisterAccess {
    fn read(&mut self, reg: Reg) -> u32;

    fn write(&mut self, reg: Reg, value: u32);

    /// Returns once every previous register write has completed and is
    /// visible to the clock hardware.
    fn barrier(&mut self);
}

/// Memory-mapped register backend.
pub struct Mmio {
    acc_base: usize,
    clk_ctl_base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// Both bases must be mapped device memory for the ACC and the global
    /// clock controller, and nothing else may program the ACPU clock path
    /// or PLL2 while this backend is alive.
    pub const unsafe fn new(acc_base: usize, clk_ctl_base: usize) -> Self {
        Self {
            acc_base,
            clk_ctl_base,
        }
    }

    fn ptr(&self, reg: Reg) -> *mut u32 {
        let base = match reg.block() {
            Block::Acc => self.acc_base,
            Block::ClkCtl => self.clk_ctl_base,
        };
        (base + reg.offset()) as *mut u32
    }
}

impl RegisterAccess for Mmio {
    fn read(&mut self, reg: Reg) -> u32 {
        unsafe { core::ptr::read_volatile(self.ptr(reg)) }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        unsafe { core::ptr::write_volatile(self.ptr(reg), value) }
    }

    fn barrier(&mut self) {
        compiler_fence(Ordering::SeqCst);
        cfg_if::cfg_if! {
            if #[cfg(all(target_arch = "arm", target_feature = "mclass"))] {
                cortex_m::asm::dsb();
            } else if #[cfg(target_arch = "arm")] {
                unsafe { core::arch::asm!("dsb sy", options(nostack, preserves_flags)) };
            } else {
                core::sync::atomic::fence(Ordering::SeqCst);
            }
        }
    }
}

/// `SCSS_CLK_SEL`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClkSel(pub u32);

impl ClkSel {
    /// Core mux fed by the raw clock source mux.
    pub const CORE_MUX_RAW: u8 = 0;
    /// Core mux fed by the SCPLL.
    pub const CORE_MUX_SCPLL: u8 = 2;

    /// `SRC1NO`: the [`ClkCtl`] half that is *not* driving the CPU.
    pub const fn src1no(&self) -> u8 {
        (self.0 & 0x1) as u8
    }

    /// The [`ClkCtl`] half currently driving the CPU.
    pub const fn live_half(&self) -> u8 {
        1 - self.src1no()
    }

    pub fn toggle_src1no(&mut self) {
        self.0 ^= 0x1;
    }

    pub const fn core_mux(&self) -> u8 {
        ((self.0 >> 1) & 0x3) as u8
    }

    pub fn set_core_mux(&mut self, mux: u8) {
        self.0 = (self.0 & !(0x3 << 1)) | ((mux as u32 & 0x3) << 1);
    }
}

/// `SCSS_CLK_CTL`: two bytes, one per buffer half, each holding a 3-bit
/// source select at bit 4 and a 4-bit divider at bit 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClkCtl(pub u32);

impl ClkCtl {
    pub const fn sel(&self, half: u8) -> u8 {
        ((self.0 >> (4 + 8 * half as u32)) & 0x7) as u8
    }

    pub const fn div(&self, half: u8) -> u8 {
        ((self.0 >> (8 * half as u32)) & 0xF) as u8
    }

    pub fn set_half(&mut self, half: u8, sel: u8, div: u8) {
        let shift = 8 * half as u32;
        self.0 &= !(0xFF << shift);
        self.0 |= (sel as u32 & 0x7) << (4 + shift);
        self.0 |= (div as u32 & 0xF) << shift;
    }
}

/// `PLL2_CONFIG`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pll2Config(pub u32);

impl Pll2Config {
    const PRE_DIV: u32 = 1 << 15;

    pub const fn pre_div(&self) -> bool {
        self.0 & Self::PRE_DIV != 0
    }

    pub fn set_pre_div(&mut self, pre_div: bool) {
        if pre_div {
            self.0 |= Self::PRE_DIV;
        } else {
            self.0 &= !Self::PRE_DIV;
        }
    }
}
