//! Glitch-free source switching through the double-buffered source mux.

use crate::regs::{ClkCtl, ClkSel, Reg, RegisterAccess};
use crate::table::OperatingPoint;

/// Sets the clock source and divider given an operating point.
///
/// The idle half of `SCSS_CLK_CTL` is programmed first, then `SRC1NO` is
/// toggled to bring it live. The caller must have enabled the source.
pub fn set_src<R: RegisterAccess>(regs: &mut R, point: &OperatingPoint) {
    let mut clk_sel = ClkSel(regs.read(Reg::ClkSel));

    // Program clock source and divider.
    let mut clk_ctl = ClkCtl(regs.read(Reg::ClkCtl));
    clk_ctl.set_half(clk_sel.src1no(), point.src_sel, point.src_div);
    regs.write(Reg::ClkCtl, clk_ctl.0);

    // Toggle clock source.
    clk_sel.toggle_src1no();
    regs.write(Reg::ClkSel, clk_sel.0);

    // Make sure switch to new source is complete.
    regs.barrier();
}

/// Feeds the CPU from the raw source mux instead of the SCPLL.
pub fn select_raw_mux<R: RegisterAccess>(regs: &mut R) {
    let mut clk_sel = ClkSel(regs.read(Reg::ClkSel));
    clk_sel.set_core_mux(ClkSel::CORE_MUX_RAW);
    regs.write(Reg::ClkSel, clk_sel.0);
    regs.barrier();
}

/// Source select and divider currently driving the CPU.
pub fn live_src<R: RegisterAccess>(regs: &mut R) -> (u8, u8) {
    let clk_sel = ClkSel(regs.read(Reg::ClkSel));
    let clk_ctl = ClkCtl(regs.read(Reg::ClkCtl));
    let half = clk_sel.live_half();
    (clk_ctl.sel(half), clk_ctl.div(half))
}
