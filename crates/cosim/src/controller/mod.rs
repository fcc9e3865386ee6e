//! Lockstep step controller.
//!
//! [`StepController`] owns everything a run needs: configuration, the DUT and
//! oracle, per-run resources, completion bookkeeping and the latched result.
//! The host drives it strictly in sequence:
//!
//! ```text
//! initialize() -> run_steps(n)* -> (terminal) teardown + delivery
//! ```
//!
//! Every core is evaluated inside one step in index order, and the oracle
//! comparison of step N completes before step N+1 starts.

mod end_info;


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use metrics::gauge;
use tracing::{debug, error, info, warn};

pub use end_info::CoreEndInfo;

use crate::config::{Capabilities, SimConfig};
use crate::error::{ConfigError, Error, QueueOutcome, Result};
use crate::lifecycle::Lifecycle;
use crate::perf::{PerfCounters, PerfPolicy};
use crate::report::{self, DeferredScope, DeliveryMode, ResultReporter};
use crate::stats;
use crate::target::{Dut, GOOD_TRAP, Oracle};
use crate::workload::{WorkloadEntry, WorkloadQueue};

/// Outcome of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// Keep stepping.
    #[default]
    Continue,
    /// Good trap, or every core exhausted its budget.
    Done,
    /// Abnormal trap, divergence, assertion or abort.
    Fail,
}

impl RunStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Continue)
    }

    /// Process exit code for a finished run.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Done => 0,
            Self::Continue | Self::Fail => 1,
        }
    }
}

/// Externally raised abort. Once raised, every step fails.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of [`StepController::run_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Runs that reached a terminal status.
    pub runs: usize,
    /// Status of the last run, `Done` if the batch was empty.
    pub status: RunStatus,
}

/// Co-simulation state machine.
pub struct StepController {
    config: SimConfig,
    capabilities: Capabilities,
    dut: Box<dyn Dut>,
    oracle: Option<Box<dyn Oracle>>,
    lifecycle: Lifecycle,
    end_info: CoreEndInfo,
    result: RunStatus,
    abort: AbortSignal,
    reporter: ResultReporter,
    perf: PerfCounters,
    queue: Option<WorkloadQueue>,
    started: Option<Instant>,
}

impl StepController {
    /// Build a controller. Capabilities are taken from `config` once, here.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingOracle`] if comparison is enabled without an
    /// oracle.
    pub fn new(
        config: SimConfig,
        dut: Box<dyn Dut>,
        oracle: Option<Box<dyn Oracle>>,
    ) -> std::result::Result<Self, ConfigError> {
        let capabilities = config.capabilities();
        let oracle = match (capabilities.comparison, oracle) {
            (true, None) => return Err(ConfigError::MissingOracle),
            (false, Some(_)) => {
                warn!("comparison is disabled, ignoring the oracle");
                None
            }
            (_, oracle) => oracle,
        };

        let num_cores = dut.num_cores();
        let queue = config.workload_list().map(WorkloadQueue::new);
        info!(
            num_cores,
            comparison = capabilities.comparison,
            delivery = ?capabilities.delivery,
            perf = ?capabilities.perf,
            batch = queue.is_some(),
            "step controller ready"
        );

        Ok(Self {
            capabilities,
            dut,
            oracle,
            lifecycle: Lifecycle::new(),
            end_info: CoreEndInfo::new(num_cores),
            result: RunStatus::Continue,
            abort: AbortSignal::default(),
            reporter: ResultReporter::new(capabilities.delivery),
            perf: PerfCounters::new(capabilities.perf, num_cores),
            queue,
            started: None,
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Mutable configuration for settings that apply to the next run
    /// (image, budget, ...). Capabilities stay as resolved at construction.
    pub const fn config_mut(&mut self) -> &mut SimConfig {
        &mut self.config
    }

    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    #[must_use]
    pub fn dut(&self) -> &dyn Dut {
        self.dut.as_ref()
    }

    #[must_use]
    pub const fn end_info(&self) -> &CoreEndInfo {
        &self.end_info
    }

    #[must_use]
    pub const fn perf(&self) -> &PerfCounters {
        &self.perf
    }

    pub const fn perf_mut(&mut self) -> &mut PerfCounters {
        &mut self.perf
    }

    #[must_use]
    pub const fn queue(&self) -> Option<&WorkloadQueue> {
        self.queue.as_ref()
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.lifecycle.is_initialized()
    }

    /// Latched status of the current run.
    #[must_use]
    pub const fn result(&self) -> RunStatus {
        self.result
    }

    /// Handle the host can raise to fail the next step.
    #[must_use]
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Register the scope that receives the next deferred result.
    ///
    /// Ignored in synchronous mode, where results are returned directly.
    pub fn register_scope(&mut self, scope: impl DeferredScope + 'static) {
        self.reporter.register_scope(Box::new(scope));
    }

    /// Prepare the next run.
    ///
    /// In batch mode the next workload entry is applied to the configuration
    /// first. Returns that entry, or `None` outside batch mode.
    ///
    /// # Errors
    ///
    /// - [`Error::Batch`] when the workload list is exhausted, malformed or
    ///   unreadable.
    /// - [`Error::Init`] when a lifecycle step fails.
    pub fn initialize(&mut self) -> Result<Option<WorkloadEntry>> {
        let entry = match self.queue.as_mut() {
            Some(queue) => Some(queue.advance(&mut self.config)?),
            None => None,
        };

        self.result = RunStatus::Continue;
        self.lifecycle
            .initialize(&self.config, self.dut.as_mut(), &mut self.oracle)?;

        let num_cores = self.dut.num_cores();
        if self.end_info.num_cores() != num_cores {
            self.end_info.resize(num_cores);
        }
        self.started = Some(Instant::now());
        Ok(entry)
    }

    /// Advance the simulation by one cycle and classify the outcome.
    ///
    /// Outside an initialized run nothing is driven: the latched result is
    /// returned, or `Continue` before the first run.
    pub fn step(&mut self) -> RunStatus {
        if !self.lifecycle.is_initialized() || self.result.is_terminal() {
            return self.result;
        }
        if self.abort.is_raised() {
            warn!("abort signal raised");
            report::print_core_summary(self.dut.as_ref(), "ABORTED by host signal");
            return RunStatus::Fail;
        }
        let assertions = self.dut.assertion_count();
        if assertions > 0 {
            error!(assertions, "design assertions failed");
            report::print_core_summary(
                self.dut.as_ref(),
                &format!("ASSERTION FAILED: {assertions} design assertion(s)"),
            );
            return RunStatus::Fail;
        }

        self.perf.on_step();
        self.dut.tick();
        if self.perf.policy() != PerfPolicy::Disabled {
            self.dut.drain_perf(&mut self.perf);
        }

        if let Some(oracle) = self.oracle.as_mut() {
            let Some(golden) = self.lifecycle.golden_mut() else {
                error!("oracle enabled without golden memory");
                return RunStatus::Fail;
            };
            for core in 0..self.dut.num_cores() {
                if let Err(divergence) = oracle.compare(core, self.dut.as_ref(), golden) {
                    report::print_divergence(self.dut.as_ref(), &divergence);
                    return RunStatus::Fail;
                }
            }
        }

        if let Some(code) = self.dut.trap_state() {
            return self.classify_trap(code);
        }

        self.check_budget()
    }

    fn classify_trap(&self, code: i32) -> RunStatus {
        let dut = self.dut.as_ref();
        report::print_trap_summary(dut, code);
        let all_good =
            code == GOOD_TRAP && (0..dut.num_cores()).all(|core| dut.trap_event(core).is_good());
        if all_good {
            RunStatus::Done
        } else {
            RunStatus::Fail
        }
    }

    fn check_budget(&mut self) -> RunStatus {
        let budget = self.config.max_instrs();
        if budget == 0 {
            return RunStatus::Continue;
        }

        for core in 0..self.dut.num_cores() {
            if self.end_info.is_trapped(core) {
                continue;
            }
            let event = self.dut.trap_event(core);
            if event.instruction_count < budget {
                continue;
            }

            let cpi = event.cpi().unwrap_or_default();
            self.end_info.mark(core, cpi);
            report::print_budget_exhausted(core, budget, &event);
            gauge!("cosim_core_cpi", "core" => core.to_string()).set(cpi);

            if self.end_info.all_trapped() {
                return self.write_cpi();
            }
        }
        RunStatus::Continue
    }

    fn write_cpi(&self) -> RunStatus {
        let Some(path) = self.config.cpi_output() else {
            return RunStatus::Done;
        };
        match stats::write_cpi(path, self.end_info.cpi()) {
            Ok(()) => RunStatus::Done,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to write cpi output");
                report::print_core_summary(
                    self.dut.as_ref(),
                    &format!("FAILED TO WRITE CPI OUTPUT {}: {e}", path.display()),
                );
                RunStatus::Fail
            }
        }
    }

    /// Run up to `n` steps, stopping at the first terminal status.
    ///
    /// A terminal status is latched, the run is torn down and the status is
    /// delivered. In deferred mode the return value stays `Continue` and the
    /// status reaches the host through its registered scope.
    pub fn run_steps(&mut self, n: u64) -> RunStatus {
        let deferred = self.reporter.mode() == DeliveryMode::Deferred;
        if self.result == RunStatus::Fail {
            return if deferred {
                RunStatus::Continue
            } else {
                RunStatus::Fail
            };
        }
        if !self.lifecycle.is_initialized() {
            debug!("run_steps called without an initialized run");
            return RunStatus::Continue;
        }

        self.perf.on_run_steps();

        for _ in 0..n {
            let status = self.step();
            if status.is_terminal() {
                return self.finish_run(status);
            }
        }
        RunStatus::Continue
    }

    fn finish_run(&mut self, status: RunStatus) -> RunStatus {
        self.result = status;
        self.lifecycle.teardown(
            self.dut.as_mut(),
            &mut self.oracle,
            &mut self.end_info,
            &mut self.perf,
        );
        let elapsed = self.started.take().map(|t| t.elapsed());
        crate::metrics::record_run(status, elapsed);
        info!(?status, "run finished");

        match self.reporter.deliver(status) {
            Ok(Some(status)) => status,
            Ok(None) => RunStatus::Continue,
            Err(e) => {
                error!(error = %e, "deferred result protocol violated");
                std::process::abort();
            }
        }
    }

    /// Run every workload until one fails or the list is exhausted.
    ///
    /// Without a workload list this is a single run. `before_run` is called
    /// after each successful initialization; deferred hosts register their
    /// scope there.
    ///
    /// # Errors
    ///
    /// Initialization failures end the batch with an error. A malformed or
    /// unreadable workload list ends it with status `Fail`.
    pub fn run_batch<F>(&mut self, steps_per_call: u64, mut before_run: F) -> Result<BatchSummary>
    where
        F: FnMut(&mut Self),
    {
        let steps = steps_per_call.max(1);
        let mut summary = BatchSummary {
            runs: 0,
            status: RunStatus::Done,
        };

        loop {
            match self.initialize() {
                Ok(entry) => {
                    if let Some(entry) = entry {
                        info!(
                            image = %entry.image_path.display(),
                            budget = entry.instruction_budget,
                            run = summary.runs + 1,
                            "starting workload"
                        );
                    }
                }
                Err(Error::Batch(QueueOutcome::Exhausted)) => break,
                Err(Error::Batch(outcome)) => {
                    error!(error = %outcome, runs = summary.runs, "workload list failed");
                    summary.status = RunStatus::Fail;
                    break;
                }
                Err(e) => return Err(e),
            }

            before_run(self);
            while !self.result.is_terminal() {
                self.run_steps(steps);
            }

            summary.runs += 1;
            summary.status = self.result;
            if self.result == RunStatus::Fail || self.queue.is_none() {
                break;
            }
        }

        info!(runs = summary.runs, status = ?summary.status, "batch finished");
        Ok(summary)
    }
}
