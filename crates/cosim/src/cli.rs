//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use cosim::PerfPolicy;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "cosim")]
#[command(about = "Lockstep co-simulation of a processor design against a reference model")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one workload, or a batch of workloads, against a DUT library
    Run(RunArgs),
    /// Check a workload list and print its entries
    Workloads {
        /// Workload list (`<image> <max_instrs>` per line)
        #[arg(value_name = "FILE")]
        list: PathBuf,
    },
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// DUT shared library
    #[arg(long, value_name = "LIB")]
    pub dut: PathBuf,

    /// Reference model shared library
    #[arg(long, value_name = "LIB")]
    pub oracle: Option<PathBuf>,

    /// Disable comparison against the reference model
    #[arg(long, conflicts_with = "oracle")]
    pub no_diff: bool,

    /// Memory image (`.zst` images are decompressed)
    #[arg(short, long)]
    pub image: Option<PathBuf>,

    /// Flash image
    #[arg(long)]
    pub flash: Option<PathBuf>,

    /// Image copied over the start of memory after loading
    #[arg(long)]
    pub restore_image: Option<PathBuf>,

    /// Bytes of the restore image to copy
    #[arg(long, value_parser = parse_u64, default_value = "0xe00")]
    pub overwrite_nbytes: u64,

    /// Per-core instruction budget (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub max_instrs: u64,

    /// Workload list for batch mode
    #[arg(long, value_name = "FILE")]
    pub workload_list: Option<PathBuf>,

    /// Write per-core CPI here when every core exhausts its budget
    #[arg(long, value_name = "FILE")]
    pub cpi_output: Option<PathBuf>,

    /// Memory size as log2 bytes
    #[arg(long, default_value = "33", value_parser = clap::value_parser!(u8).range(12..=40))]
    pub memory_bits: u8,

    /// Cycles per step call
    #[arg(long, default_value = "1000")]
    pub steps_per_call: u64,

    /// Deliver results through a deferred scope instead of return values
    #[arg(long)]
    pub deferred: bool,

    /// DUT traffic counting
    #[arg(long, value_enum, default_value = "off")]
    pub perf: PerfArg,
}

/// Perf counting policy.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PerfArg {
    Off,
    PerCall,
    PerCycle,
}

impl From<PerfArg> for PerfPolicy {
    fn from(arg: PerfArg) -> Self {
        match arg {
            PerfArg::Off => Self::Disabled,
            PerfArg::PerCall => Self::PerCall,
            PerfArg::PerCycle => Self::PerCycle,
        }
    }
}

/// Parse a decimal or `0x`-prefixed hex number.
fn parse_u64(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}
