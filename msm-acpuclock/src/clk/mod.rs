//! ACPU clock sources: reference counting, the bus vote, the source mux and
//! PLL2.

use crate::table::{Pll, Source};
use crate::time::Hertz;

pub mod boot;
pub mod pll;
pub mod switch;

/// Turns the PLLs feeding the ACPU mux on and off.
pub trait SourceGate {
    fn enable(&mut self, pll: Pll);

    fn disable(&mut self, pll: Pll);
}

/// Bus vote failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusVoteError {
    /// The bus clock cannot run at the requested rate.
    Rejected,
    /// The bus clock is not available.
    Unavailable,
}

impl core::fmt::Display for BusVoteError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BusVoteError::Rejected => write!(f, "rate rejected"),
            BusVoteError::Unavailable => write!(f, "bus clock unavailable"),
        }
    }
}

/// Minimum rate vote on the AXI (EBI1) bus clock.
///
/// Voting for a rate also keeps the shared MSMC1 rail at the level that
/// rate needs.
pub trait BusVote {
    fn set_min_rate(&mut self, rate: Hertz) -> Result<(), BusVoteError>;
}

/// Per-PLL reference counts.
///
/// The first reference turns a PLL on, dropping the last one turns it off.
/// [`Source::Lpxo`] and [`Source::Axi`] are always on and never counted.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SourceRefs {
    counts: [u8; Pll::COUNT],
}

impl SourceRefs {
    pub const fn new() -> Self {
        Self {
            counts: [0; Pll::COUNT],
        }
    }

    pub fn enable<G: SourceGate>(&mut self, gate: &mut G, src: Source) {
        let Some(pll) = src.pll() else {
            return;
        };

        let count = &mut self.counts[pll as usize];
        if *count == 0 {
            trace!("Enabling PLL {}", pll as u8);
            gate.enable(pll);
        }
        *count = count.saturating_add(1);
    }

    pub fn disable<G: SourceGate>(&mut self, gate: &mut G, src: Source) {
        let Some(pll) = src.pll() else {
            return;
        };

        let count = &mut self.counts[pll as usize];
        match *count {
            0 => warn!("PLL {} disabled without a reference", pll as u8),
            1 => {
                *count = 0;
                trace!("Disabling PLL {}", pll as u8);
                gate.disable(pll);
            }
            _ => *count -= 1,
        }
    }

    pub fn count(&self, pll: Pll) -> u8 {
        self.counts[pll as usize]
    }
}
