//! cosim - lockstep co-simulation of a processor design against a reference.
//!
//! A [`StepController`] drives a design under test ([`Dut`]) one cycle at a
//! time, compares each cycle against a reference [`Oracle`], enforces
//! per-run instruction budgets and classifies how each run ends. Several
//! workloads can be batched into one process through a workload list.
//!
//! # Example
//!
//! ```ignore
//! use cosim::{DylibDut, DylibOracle, SimConfig, StepController};
//!
//! let mut config = SimConfig::default();
//! config.set_image("workload.bin")?;
//! config.set_max_instrs(1_000_000);
//!
//! let dut = DylibDut::load("libdut.so".as_ref())?;
//! let oracle = DylibOracle::load("libref.so".as_ref())?;
//! let mut controller = StepController::new(config, Box::new(dut), Some(Box::new(oracle)))?;
//! let summary = controller.run_batch(1000, |_| {})?;
//! std::process::exit(summary.status.exit_code());
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod perf;
pub mod report;
pub mod stats;
pub mod target;
#[doc(hidden)]
pub mod test_support;
pub mod workload;

pub use config::{Capabilities, SimConfig};
pub use controller::{AbortSignal, BatchSummary, CoreEndInfo, RunStatus, StepController};
pub use error::{
    ConfigError, Error, InitError, InitStep, ProtocolError, QueueOutcome, Result, TargetError,
};
pub use perf::{PerfCounters, PerfEventKind, PerfPolicy};
pub use report::{DeferredScope, DeliveryMode};
pub use target::{Divergence, Dut, DylibDut, DylibOracle, Oracle, TrapEvent};
pub use workload::{WorkloadEntry, WorkloadQueue};
