//! Interfaces to the design under test and the reference oracle.
//!
//! The controller only sees these traits. [`DylibDut`] and [`DylibOracle`]
//! implement them over native libraries with a small C ABI; tests use the
//! scripted models in [`crate::test_support`].

mod api;
mod dylib;

use cosim_mem::{FlashImage, GoldenMemory, SimMemory};
use thiserror::Error;

use crate::error::TargetError;
use crate::perf::PerfCounters;

pub use dylib::{DylibDut, DylibOracle};

/// Trap code of a voluntary, successful program end.
pub const GOOD_TRAP: i32 = 0;

/// Per-core trap record and cumulative counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapEvent {
    /// The core has reached a trap.
    pub has_trap: bool,
    /// Trap code, [`GOOD_TRAP`] for a clean end.
    pub code: i32,
    pub pc: u64,
    pub instruction_count: u64,
    pub cycle_count: u64,
}

impl TrapEvent {
    #[must_use]
    pub const fn is_good(&self) -> bool {
        self.code == GOOD_TRAP
    }

    /// Instructions per cycle, if any cycles elapsed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ipc(&self) -> Option<f64> {
        (self.cycle_count > 0).then(|| self.instruction_count as f64 / self.cycle_count as f64)
    }

    /// Cycles per instruction, if any instructions retired.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cpi(&self) -> Option<f64> {
        (self.instruction_count > 0)
            .then(|| self.cycle_count as f64 / self.instruction_count as f64)
    }
}

/// The oracle found the DUT's state different from the reference.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("core {core} diverged from reference (code {code}): {message}")]
pub struct Divergence {
    pub core: usize,
    pub code: i32,
    pub message: String,
}

/// DUT-side probe: drives the design and exposes its committed state.
///
/// Trap bookkeeping lives here rather than on the oracle because budgets and
/// trap detection must keep working with comparison disabled.
pub trait Dut {
    /// Number of cores evaluated per step.
    fn num_cores(&self) -> usize;

    /// Initialize device models against freshly loaded memory and flash.
    ///
    /// # Errors
    ///
    /// Returns an error if the device models refuse the configuration.
    fn init(&mut self, memory: &mut SimMemory, flash: &FlashImage) -> Result<(), TargetError>;

    /// Release device models. Memory handed to `init` is dropped afterwards.
    fn finish(&mut self);

    /// Advance the DUT by one cycle.
    fn tick(&mut self);

    /// Trap record for `core`.
    fn trap_event(&self, core: usize) -> TrapEvent;

    /// Aggregate trap state: the code of the first trapped core, if any.
    fn trap_state(&self) -> Option<i32> {
        (0..self.num_cores())
            .map(|core| self.trap_event(core))
            .find(|event| event.has_trap)
            .map(|event| event.code)
    }

    /// Architectural-state snapshot of `core` for the oracle, in the DUT's
    /// own layout. Valid until the next `tick`.
    fn snapshot(&self, _core: usize) -> &[u8] {
        &[]
    }

    /// Number of failed design assertions so far.
    fn assertion_count(&self) -> u64 {
        0
    }

    /// Move per-kind perf events emitted since the last drain into `perf`.
    fn drain_perf(&mut self, _perf: &mut PerfCounters) {}
}

/// Reference model judging architectural-state equivalence.
pub trait Oracle {
    /// Prepare the reference from golden memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be initialized.
    fn init(&mut self, golden: &GoldenMemory, num_cores: usize) -> Result<(), TargetError>;

    /// Compare the DUT's latest cycle for `core`.
    ///
    /// # Errors
    ///
    /// Returns the [`Divergence`] if the states differ.
    fn compare(
        &mut self,
        core: usize,
        dut: &dyn Dut,
        golden: &mut GoldenMemory,
    ) -> Result<(), Divergence>;

    /// Release the reference.
    fn finish(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_event_ratios() {
        let event = TrapEvent {
            instruction_count: 1000,
            cycle_count: 2500,
            ..Default::default()
        };
        assert_eq!(event.cpi(), Some(2.5));
        assert_eq!(event.ipc(), Some(0.4));
        assert!(event.is_good());

        let empty = TrapEvent::default();
        assert_eq!(empty.cpi(), None);
        assert_eq!(empty.ipc(), None);
    }

    struct TwoCores([TrapEvent; 2]);

    impl Dut for TwoCores {
        fn num_cores(&self) -> usize {
            2
        }
        fn init(&mut self, _: &mut SimMemory, _: &FlashImage) -> Result<(), TargetError> {
            Ok(())
        }
        fn finish(&mut self) {}
        fn tick(&mut self) {}
        fn trap_event(&self, core: usize) -> TrapEvent {
            self.0[core]
        }
    }

    #[test]
    fn test_trap_state_first_trapped_core() {
        let running = TrapEvent::default();
        let bad = TrapEvent {
            has_trap: true,
            code: 17,
            ..Default::default()
        };
        assert_eq!(TwoCores([running, running]).trap_state(), None);
        assert_eq!(TwoCores([running, bad]).trap_state(), Some(17));
    }
}
