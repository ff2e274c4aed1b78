//! Frequency units.

use core::fmt;

/// A frequency in Hz.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Hertz(pub u32);

impl Hertz {
    /// Largest representable rate. Voting for it asks the bus for its
    /// maximum frequency.
    pub const MAX: Hertz = Hertz(u32::MAX);
}

impl fmt::Display for Hertz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::MAX {
            f.write_str("max")
        } else {
            write!(f, "{} Hz", self.0)
        }
    }
}
