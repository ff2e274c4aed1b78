//! PLL2 programming.

use crate::regs::{Pll2Config, Reg, RegisterAccess};
use crate::table::PllConfig;

/// Writes a new L/M/N and pre-divider setting to PLL2.
///
/// PLL2 must be off and nothing may be running from it.
pub fn config_pll2<R: RegisterAccess>(regs: &mut R, pll: &PllConfig) {
    let mut config = Pll2Config(regs.read(Reg::Pll2Config));

    // Make sure write to disable PLL2 has completed before reconfiguring it.
    regs.barrier();
    regs.write(Reg::Pll2L, pll.l as u32);
    regs.write(Reg::Pll2M, pll.m);
    regs.write(Reg::Pll2N, pll.n);
    config.set_pre_div(pll.pre_div);
    regs.write(Reg::Pll2Config, config.0);

    // Make sure PLL is programmed before returning.
    regs.barrier();
}

/// L value PLL2 is currently programmed with.
pub fn read_pll2_l<R: RegisterAccess>(regs: &mut R) -> u8 {
    (regs.read(Reg::Pll2L) & 0xFF) as u8
}
