//! Boot-time detection of the running operating point.

use super::switch::{live_src, select_raw_mux, set_src};
use crate::regs::{ClkSel, Reg, RegisterAccess};
use crate::table::{OperatingPoint, Table};
use crate::Error;

/// Operating point found at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootPoint {
    /// Index of the point in the table.
    pub index: usize,
    /// The CPU still runs from the SCPLL. It has to leave through the
    /// backup point before `index` is actually live.
    pub on_scpll: bool,
}

/// Maps the ACPU clock registers back to a table entry.
///
/// `pll2_l` is the L value PLL2 is programmed with. Only reads registers.
pub fn detect<R: RegisterAccess>(
    regs: &mut R,
    table: &Table,
    pll2_l: u8,
) -> Result<BootPoint, Error> {
    let clk_sel = ClkSel(regs.read(Reg::ClkSel));

    match clk_sel.core_mux() {
        ClkSel::CORE_MUX_RAW => {
            let (sel, div) = live_src(regs);
            let index = table
                .find_by_src(sel, div)
                .ok_or(Error::UnknownBootSource { sel, div })?;

            // PLL2 points share their encoding, the L value tells them apart.
            let index = match table.get(index) {
                Some(point) if point.src.is_pll2() => table
                    .find_pll2(pll2_l, index)
                    .ok_or(Error::UnknownPllRate { l: pll2_l })?,
                _ => index,
            };

            Ok(BootPoint {
                index,
                on_scpll: false,
            })
        }
        ClkSel::CORE_MUX_SCPLL => {
            let index = table
                .find_pll2(pll2_l, 0)
                .ok_or(Error::UnknownPllRate { l: pll2_l })?;

            Ok(BootPoint {
                index,
                on_scpll: true,
            })
        }
        mux => Err(Error::InvalidCoreMux { mux }),
    }
}

/// Moves the CPU from the SCPLL onto `backup` through the raw mux.
///
/// The backup's source must already be running and its voltage applied.
pub fn leave_scpll<R: RegisterAccess>(regs: &mut R, backup: &OperatingPoint) {
    debug!("ACPU on SCPLL, moving to raw mux at {} kHz", backup.khz);

    // Program raw clock source mux, then switch the core mux to it.
    set_src(regs, backup);
    select_raw_mux(regs);
}
