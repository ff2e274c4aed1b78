#![no_std]
#![doc = include_str!("../README.md")]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod acpuclk;
pub mod clk;
pub mod config;
pub mod pmu;
pub mod regs;
pub mod table;
pub mod time;

#[cfg(test)]
mod sim;

// Chip operating points, generated from `data/<chip>/acpu_freq.yaml`.
include!(concat!(env!("OUT_DIR"), "/_generated.rs"));

// Reexports
pub use acpuclk::{AcpuClock, Error, Reason, Resources};
pub use config::Config;
#[cfg(feature = "time")]
pub use embassy_time::Delay;
