//! Power management: ACPU supply voltage.

pub mod vdd;
