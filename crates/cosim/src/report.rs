//! Result delivery and per-core summaries.
//!
//! A terminal [`RunStatus`] reaches the host either as the return value of
//! the step call (synchronous) or through a scope the host registered before
//! the run ended (deferred). A deferred scope is consumed exactly once.

use std::fmt;
use std::io::{self, Write};

use console::style;
use tracing::{debug, error, info, warn};

use crate::controller::RunStatus;
use crate::error::ProtocolError;
use crate::target::{Divergence, Dut, TrapEvent};

/// How terminal results reach the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    #[default]
    Synchronous,
    Deferred,
}

/// Host-side completion handle for deferred delivery.
pub trait DeferredScope {
    /// Receive the terminal status. Called at most once.
    fn complete(self: Box<Self>, status: RunStatus);
}

impl<F: FnOnce(RunStatus)> DeferredScope for F {
    fn complete(self: Box<Self>, status: RunStatus) {
        (*self)(status);
    }
}

/// Hands terminal results to the host according to the [`DeliveryMode`].
pub struct ResultReporter {
    mode: DeliveryMode,
    scope: Option<Box<dyn DeferredScope>>,
}

impl fmt::Debug for ResultReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultReporter")
            .field("mode", &self.mode)
            .field("scope", &self.scope.is_some())
            .finish()
    }
}

impl ResultReporter {
    #[must_use]
    pub const fn new(mode: DeliveryMode) -> Self {
        Self { mode, scope: None }
    }

    #[must_use]
    pub const fn mode(&self) -> DeliveryMode {
        self.mode
    }

    #[must_use]
    pub const fn has_scope(&self) -> bool {
        self.scope.is_some()
    }

    /// Store the scope that receives the next deferred result.
    ///
    /// In synchronous mode the scope is dropped uncalled.
    pub fn register_scope(&mut self, scope: Box<dyn DeferredScope>) {
        if self.mode == DeliveryMode::Synchronous {
            debug!("synchronous delivery, dropping deferred result scope");
            drop(scope);
            return;
        }
        if self.scope.is_some() {
            warn!("replacing a deferred result scope that was never used");
        }
        info!("registered deferred result scope");
        self.scope = Some(scope);
    }

    /// Deliver a terminal status.
    ///
    /// Returns `Some(status)` for synchronous delivery and `None` once a
    /// deferred scope has been called.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MissingScope`] if delivery is deferred and no scope
    /// is registered.
    pub fn deliver(&mut self, status: RunStatus) -> Result<Option<RunStatus>, ProtocolError> {
        match self.mode {
            DeliveryMode::Synchronous => Ok(Some(status)),
            DeliveryMode::Deferred => {
                let scope = self.scope.take().ok_or_else(|| {
                    error!(?status, "no deferred result scope registered");
                    ProtocolError::MissingScope
                })?;
                scope.complete(status);
                Ok(None)
            }
        }
    }
}

fn format_stats(event: &TrapEvent) -> String {
    let ipc = event.ipc().unwrap_or(0.0);
    let cpi = event.cpi().unwrap_or(0.0);
    format!(
        "instrs = {}, cycles = {}, IPC = {ipc:.6}, CPI = {cpi:.6}",
        event.instruction_count, event.cycle_count
    )
}

fn print_stats(event: &TrapEvent) {
    eprintln!("{}", format_stats(event));
}

/// Write `reason` followed by one pc and stats line per core.
///
/// # Errors
///
/// Returns any error from `out`.
pub fn write_core_summary(out: &mut impl Write, dut: &dyn Dut, reason: &str) -> io::Result<()> {
    writeln!(out, "{}", style(reason).for_stderr().red().bold())?;
    for core in 0..dut.num_cores() {
        let event = dut.trap_event(core);
        writeln!(out, "Core {core}: pc = {:#x}, {}", event.pc, format_stats(&event))?;
    }
    Ok(())
}

/// Print every core's state for a run that ends for `reason`.
pub fn print_core_summary(dut: &dyn Dut, reason: &str) {
    error!(reason, cores = dut.num_cores(), "run failed");
    let _ = write_core_summary(&mut io::stderr().lock(), dut, reason);
}

/// Print every core's end state after the DUT reported trap `code`.
pub fn print_trap_summary(dut: &dyn Dut, code: i32) {
    for core in 0..dut.num_cores() {
        let event = dut.trap_event(core);
        let pc = format!("{:#x}", event.pc);
        eprint!("Core {core}: ");
        if code == 0 && event.is_good() {
            eprintln!("{}", style(format!("HIT GOOD TRAP at pc = {pc}")).green());
            info!(core, pc = %pc, instrs = event.instruction_count, cycles = event.cycle_count, "hit good trap");
        } else {
            let core_code = if event.is_good() { code } else { event.code };
            eprintln!("{}", style(format!("Unknown trap code: {core_code}")).red());
            error!(core, pc = %pc, code = core_code, "abnormal trap");
        }
        print_stats(&event);
    }
}

/// Print the summary of a core that ran out of instruction budget.
pub fn print_budget_exhausted(core: usize, budget: u64, event: &TrapEvent) {
    eprintln!(
        "{}",
        style(format!("EXCEEDED CORE-{core} MAX INSTR: {budget}")).green()
    );
    info!(
        core,
        budget,
        instrs = event.instruction_count,
        cycles = event.cycle_count,
        "core exhausted its instruction budget"
    );
    print_stats(event);
}

/// Print every core's state after the oracle rejected a cycle.
pub fn print_divergence(dut: &dyn Dut, divergence: &Divergence) {
    error!(
        core = divergence.core,
        code = divergence.code,
        message = %divergence.message,
        "divergence from reference"
    );
    let _ = write_core_summary(&mut io::stderr().lock(), dut, &divergence.to_string());
}
