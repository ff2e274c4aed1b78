use std::env;
use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use proc_macro2::TokenStream;
use quote::quote;

mod build_serde;
use build_serde::{AcpuFreq, AxiRate, Point, SourceKind};

// Keep in sync with `pmu::vdd`.
const V_STEP_MV: u32 = 25;
const VDD_MIN_MV: u32 = 750;
const VDD_MAX_MV: u32 = 1525;
// Keep in sync with `table::MAX_OPERATING_POINTS`.
const MAX_OPERATING_POINTS: usize = 32;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Retrieve the enabled chip feature
    let chip_name = match env::vars()
        .map(|(a, _)| a)
        .filter(|x| x.starts_with("CARGO_FEATURE_MSM"))
        .get_one()
    {
        Ok(x) => x,
        Err(GetOneError::None) => panic!("No msmxxxx Cargo feature enabled"),
        Err(GetOneError::Multiple) => panic!("Multiple msmxxxx Cargo features enabled"),
    }
    .strip_prefix("CARGO_FEATURE_")
    .unwrap()
    .to_ascii_lowercase();

    println!("cargo:rerun-if-changed=data/{}", chip_name);
    println!("cargo:rerun-if-changed=build_serde.rs");
    let data_dir = Path::new("data").join(&chip_name);

    // Read and parse acpu_freq.yaml
    let freq_path = data_dir.join("acpu_freq.yaml");
    let freq_content = fs::read_to_string(&freq_path)
        .map_err(|e| format!("Failed to read acpu_freq.yaml: {}", e))?;

    let freq: AcpuFreq = serde_yaml::from_str(&freq_content)
        .map_err(|e| format!("Failed to parse acpu_freq.yaml: {}", e))?;

    check_freq_table(&freq).map_err(|e| format!("Invalid acpu_freq.yaml: {}", e))?;

    // Get output path from env
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let dest_path = out_dir.join("_generated.rs");

    let mut token_stream = TokenStream::new();

    // Generate the operating-point table
    token_stream.extend(generate_freq_table(&freq));

    let mut file = File::create(&dest_path).unwrap();
    write!(file, "{}", token_stream).unwrap();
    rustfmt(&dest_path);

    Ok(())
}

/// Rejects tables the driver could not run safely. Mirrors the runtime
/// checks in `Table::new` so a bad board file fails the build instead of boot.
fn check_freq_table(freq: &AcpuFreq) -> Result<(), String> {
    if freq.points.is_empty() {
        return Err("no operating points".into());
    }
    if freq.points.len() > MAX_OPERATING_POINTS {
        return Err(format!(
            "{} operating points, at most {} supported",
            freq.points.len(),
            MAX_OPERATING_POINTS
        ));
    }

    let mut prev_khz = 0;
    for (i, p) in freq.points.iter().enumerate() {
        if p.khz == 0 {
            return Err(format!("point {}: zero frequency is reserved for the sentinel", i));
        }
        if p.khz <= prev_khz {
            return Err(format!(
                "point {}: {} kHz is not above the previous point ({} kHz)",
                i, p.khz, prev_khz
            ));
        }
        prev_khz = p.khz;

        if p.vdd_mv % V_STEP_MV != 0 {
            return Err(format!(
                "{} kHz: {} mV is not a multiple of the {} mV regulator step",
                p.khz, p.vdd_mv, V_STEP_MV
            ));
        }
        if p.vdd_mv < VDD_MIN_MV || p.vdd_mv > VDD_MAX_MV {
            return Err(format!(
                "{} kHz: {} mV is outside {}..={} mV",
                p.khz, p.vdd_mv, VDD_MIN_MV, VDD_MAX_MV
            ));
        }
        if p.sel > 0x7 {
            return Err(format!("{} kHz: source select {} exceeds 3 bits", p.khz, p.sel));
        }
        if p.div > 0xF {
            return Err(format!("{} kHz: divider {} exceeds 4 bits", p.khz, p.div));
        }
        match (p.src, &p.pll2) {
            (SourceKind::Pll2, None) => {
                return Err(format!("{} kHz: PLL2 point without a pll2 entry", p.khz));
            }
            (SourceKind::Pll2, Some(_)) | (_, None) => {}
            (_, Some(_)) => {
                return Err(format!("{} kHz: pll2 entry on a non-PLL2 point", p.khz));
            }
        }
    }

    if !freq.points.iter().any(|p| p.khz == freq.max_axi_khz) {
        return Err(format!(
            "max_axi_khz {} does not match any operating point",
            freq.max_axi_khz
        ));
    }

    Ok(())
}

fn generate_freq_table(freq: &AcpuFreq) -> TokenStream {
    let max_axi_khz = freq.max_axi_khz;
    let points: Vec<_> = freq.points.iter().map(generate_point).collect();

    quote! {
        /// Rate used while waiting for an interrupt or entering power collapse.
        pub const MAX_AXI_KHZ: u32 = #max_axi_khz;

        /// Operating points of this chip, ascending.
        pub const ACPU_FREQ_TABLE: &[crate::table::OperatingPoint] = &[
            #(#points),*
        ];
    }
}

fn generate_point(p: &Point) -> TokenStream {
    let khz = p.khz;
    let sel = p.sel;
    let div = p.div;
    let vdd_mv = p.vdd_mv;
    let scaling = p.scaling;

    let src = match p.src {
        SourceKind::Lpxo => quote!(crate::table::Source::Lpxo),
        SourceKind::Axi => quote!(crate::table::Source::Axi),
        SourceKind::Pll0 => quote!(crate::table::Source::Pll(crate::table::Pll::Pll0)),
        SourceKind::Pll1 => quote!(crate::table::Source::Pll(crate::table::Pll::Pll1)),
        SourceKind::Pll2 => quote!(crate::table::Source::Pll(crate::table::Pll::Pll2)),
        SourceKind::Pll3 => quote!(crate::table::Source::Pll(crate::table::Pll::Pll3)),
    };

    let axi = match p.axi_hz {
        AxiRate::Hz(hz) => quote!(crate::time::Hertz(#hz)),
        AxiRate::Max => quote!(crate::time::Hertz::MAX),
    };

    let pll = match &p.pll2 {
        Some(pll) => {
            let l = pll.l;
            let m = pll.m;
            let n = pll.n;
            let pre_div = pll.pre_div;
            quote! {
                .with_pll(crate::table::PllConfig::new(#l, #m, #n, #pre_div))
            }
        }
        None => quote!(),
    };

    quote! {
        crate::table::OperatingPoint::new(#khz, #src, #sel, #div, #axi, #vdd_mv)
            .with_scaling(#scaling)
            #pll
    }
}

enum GetOneError {
    None,
    Multiple,
}

trait IteratorExt: Iterator {
    fn get_one(self) -> Result<Self::Item, GetOneError>;
}

impl<T: Iterator> IteratorExt for T {
    fn get_one(mut self) -> Result<Self::Item, GetOneError> {
        match self.next() {
            None => Err(GetOneError::None),
            Some(res) => match self.next() {
                Some(_) => Err(GetOneError::Multiple),
                None => Ok(res),
            },
        }
    }
}

/// rustfmt a given path.
/// Failures are logged to stderr and ignored.
fn rustfmt(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match Command::new("rustfmt").args([path]).output() {
        Err(e) => {
            eprintln!("failed to exec rustfmt {:?}: {:?}", path, e);
        }
        Ok(out) => {
            if !out.status.success() {
                eprintln!("rustfmt {:?} failed:", path);
                eprintln!("=== STDOUT:");
                std::io::stderr().write_all(&out.stdout).unwrap();
                eprintln!("=== STDERR:");
                std::io::stderr().write_all(&out.stderr).unwrap();
            }
        }
    }
}
