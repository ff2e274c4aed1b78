use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

// ---------- acpu_freq.yaml ----------

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AcpuFreq {
    /// Rate used for wait-for-interrupt and power collapse.
    pub max_axi_khz: u32,
    pub points: Vec<Point>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Point {
    pub khz: u32,
    pub src: SourceKind,
    pub sel: u8,
    pub div: u8,
    pub axi_hz: AxiRate,
    pub vdd_mv: u32,
    /// Whether the point is handed to the cpufreq governor.
    #[serde(default = "default_true")]
    pub scaling: bool,
    /// PLL2 programming, required for (and only for) `src: pll2`.
    #[serde(default)]
    pub pll2: Option<Pll2>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Lpxo,
    Axi,
    Pll0,
    Pll1,
    Pll2,
    Pll3,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Pll2 {
    pub l: u8,
    pub m: u32,
    pub n: u32,
    #[serde(default)]
    pub pre_div: bool,
}

/// Minimum AXI rate vote, either in Hz or `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxiRate {
    Hz(u32),
    Max,
}

fn default_true() -> bool {
    true
}

struct AxiRateVisitor;

impl<'de> Visitor<'de> for AxiRateVisitor {
    type Value = AxiRate;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a rate in Hz or the string `max`")
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u32::try_from(value)
            .map(AxiRate::Hz)
            .map_err(|_| E::custom(format!("AXI rate {} does not fit in 32 bits", value)))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u64::try_from(value)
            .map_err(|_| E::custom(format!("AXI rate {} is negative", value)))
            .and_then(|v| self.visit_u64(v))
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match value {
            "max" => Ok(AxiRate::Max),
            _ => Err(E::custom(format!("unknown AXI rate {:?}", value))),
        }
    }
}

impl<'de> Deserialize<'de> for AxiRate {
    fn deserialize<D>(deserializer: D) -> Result<AxiRate, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(AxiRateVisitor)
    }
}
