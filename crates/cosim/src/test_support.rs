//! Scripted in-process DUT and oracle for tests.
//!
//! [`ScriptedDut`] retires a fixed number of instructions and cycles per tick
//! on each core and can be told to trap at a given tick. [`ScriptedOracle`]
//! accepts every cycle unless told to diverge. Both report into a shared
//! [`Probe`] that stays readable after the models are moved into a
//! controller.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cosim_mem::{FlashImage, GoldenMemory, SimMemory};

use crate::error::TargetError;
use crate::perf::{PerfCounters, PerfEventKind};
use crate::target::{Divergence, Dut, Oracle, TrapEvent};

/// Lifecycle calls observed by the scripted models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    DutInit,
    DutFinish,
    OracleInit,
    OracleFinish,
}

#[derive(Debug, Default)]
struct ProbeState {
    calls: RefCell<Vec<Call>>,
    ticks: Cell<u64>,
    total_ticks: Cell<u64>,
    compares: Cell<u64>,
    assertions: Cell<u64>,
    memory_size: Cell<usize>,
}

/// Shared view of what the scripted models did.
#[derive(Debug, Clone, Default)]
pub struct Probe(Rc<ProbeState>);

impl Probe {
    fn push(&self, call: Call) {
        self.0.calls.borrow_mut().push(call);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.0.calls.borrow().clone()
    }

    #[must_use]
    pub fn count(&self, call: Call) -> usize {
        self.0.calls.borrow().iter().filter(|&&c| c == call).count()
    }

    /// Ticks since the last DUT init.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.0.ticks.get()
    }

    /// Ticks across all runs.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        self.0.total_ticks.get()
    }

    #[must_use]
    pub fn compares(&self) -> u64 {
        self.0.compares.get()
    }

    /// Memory size handed to the last DUT init.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.0.memory_size.get()
    }

    /// Set the DUT's failed-assertion count.
    pub fn set_assertions(&self, count: u64) {
        self.0.assertions.set(count);
    }
}

#[derive(Debug, Clone, Copy)]
struct CoreScript {
    instrs_per_tick: u64,
    cycles_per_tick: u64,
    trap: Option<(u64, i32)>,
    perf: Option<(PerfEventKind, u64)>,
}

impl Default for CoreScript {
    fn default() -> Self {
        Self {
            instrs_per_tick: 1,
            cycles_per_tick: 2,
            trap: None,
            perf: None,
        }
    }
}

/// DUT whose per-core progress follows a fixed script.
#[derive(Debug)]
pub struct ScriptedDut {
    scripts: Vec<CoreScript>,
    events: Vec<TrapEvent>,
    pending_perf: Vec<(usize, PerfEventKind, u64)>,
    fail_init: bool,
    probe: Probe,
}

impl ScriptedDut {
    /// `num_cores` cores, each retiring 1 instruction in 2 cycles per tick.
    #[must_use]
    pub fn new(num_cores: usize) -> Self {
        Self {
            scripts: vec![CoreScript::default(); num_cores],
            events: vec![TrapEvent::default(); num_cores],
            pending_perf: Vec::new(),
            fail_init: false,
            probe: Probe::default(),
        }
    }

    /// Set the per-tick instruction and cycle increments of `core`.
    #[must_use]
    pub fn with_rate(mut self, core: usize, instrs_per_tick: u64, cycles_per_tick: u64) -> Self {
        self.scripts[core].instrs_per_tick = instrs_per_tick;
        self.scripts[core].cycles_per_tick = cycles_per_tick;
        self
    }

    /// Make `core` trap with `code` on tick `tick` (1-based, per run).
    #[must_use]
    pub fn with_trap(mut self, core: usize, tick: u64, code: i32) -> Self {
        self.scripts[core].trap = Some((tick, code));
        self
    }

    /// Emit one `kind` perf event of `bytes` bytes on `core` every tick.
    #[must_use]
    pub fn with_perf(mut self, core: usize, kind: PerfEventKind, bytes: u64) -> Self {
        self.scripts[core].perf = Some((kind, bytes));
        self
    }

    /// Make every `init` fail.
    pub fn fail_init(&mut self) {
        self.fail_init = true;
    }

    #[must_use]
    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }
}

impl Dut for ScriptedDut {
    fn num_cores(&self) -> usize {
        self.scripts.len()
    }

    fn init(&mut self, memory: &mut SimMemory, _flash: &FlashImage) -> Result<(), TargetError> {
        self.probe.push(Call::DutInit);
        if self.fail_init {
            return Err(TargetError::Model("scripted init failure".to_string()));
        }
        self.probe.0.memory_size.set(memory.size());
        self.probe.0.ticks.set(0);
        self.events.fill(TrapEvent::default());
        self.pending_perf.clear();
        Ok(())
    }

    fn finish(&mut self) {
        self.probe.push(Call::DutFinish);
    }

    fn tick(&mut self) {
        let tick = self.probe.0.ticks.get() + 1;
        self.probe.0.ticks.set(tick);
        self.probe.0.total_ticks.set(self.probe.0.total_ticks.get() + 1);

        for (core, (script, event)) in self.scripts.iter().zip(&mut self.events).enumerate() {
            if event.has_trap {
                continue;
            }
            if let Some((kind, bytes)) = script.perf {
                self.pending_perf.push((core, kind, bytes));
            }
            event.instruction_count += script.instrs_per_tick;
            event.cycle_count += script.cycles_per_tick;
            event.pc += 4 * script.instrs_per_tick;
            if let Some((at, code)) = script.trap {
                if at == tick {
                    event.has_trap = true;
                    event.code = code;
                }
            }
        }
    }

    fn trap_event(&self, core: usize) -> TrapEvent {
        self.events[core]
    }

    fn assertion_count(&self) -> u64 {
        self.probe.0.assertions.get()
    }

    fn drain_perf(&mut self, perf: &mut PerfCounters) {
        for (core, kind, bytes) in self.pending_perf.drain(..) {
            perf.record(core, kind, bytes);
        }
    }
}

/// Oracle that agrees with the DUT unless scripted otherwise.
#[derive(Debug)]
pub struct ScriptedOracle {
    probe: Probe,
    diverge: Option<(u64, usize)>,
    fail_init: bool,
}

impl ScriptedOracle {
    /// Oracle reporting into the DUT's probe.
    #[must_use]
    pub fn new(probe: &Probe) -> Self {
        Self {
            probe: probe.clone(),
            diverge: None,
            fail_init: false,
        }
    }

    /// Report a divergence on `core` at tick `tick` of a run.
    #[must_use]
    pub const fn diverge_at(mut self, tick: u64, core: usize) -> Self {
        self.diverge = Some((tick, core));
        self
    }

    pub fn fail_init(&mut self) {
        self.fail_init = true;
    }
}

impl Oracle for ScriptedOracle {
    fn init(&mut self, _golden: &GoldenMemory, _num_cores: usize) -> Result<(), TargetError> {
        self.probe.push(Call::OracleInit);
        if self.fail_init {
            return Err(TargetError::CallFailed {
                call: "scripted oracle init",
                status: -1,
            });
        }
        Ok(())
    }

    fn compare(
        &mut self,
        core: usize,
        dut: &dyn Dut,
        _golden: &mut GoldenMemory,
    ) -> Result<(), Divergence> {
        self.probe.0.compares.set(self.probe.0.compares.get() + 1);
        match self.diverge {
            Some((tick, bad_core)) if tick == self.probe.ticks() && bad_core == core => {
                Err(Divergence {
                    core,
                    code: 1,
                    message: format!("pc {:#x} differs", dut.trap_event(core).pc),
                })
            }
            _ => Ok(()),
        }
    }

    fn finish(&mut self) {
        self.probe.push(Call::OracleFinish);
    }
}
