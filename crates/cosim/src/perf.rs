//! Performance counters for DUT-to-controller traffic.
//!
//! Counts how often each event class crosses into the controller and how many
//! bytes it moves. Purely observational: nothing here changes a run's result.

use metrics::counter;
use tracing::{debug, info};

/// When the step entry point is counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PerfPolicy {
    #[default]
    Disabled,
    /// Once per `run_steps` call.
    PerCall,
    /// Once per simulated cycle.
    PerCycle,
}

macro_rules! perf_events {
    ($($variant:ident => $name:literal,)*) => {
        /// Event classes exchanged between the DUT and the controller.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PerfEventKind {
            $($variant,)*
        }

        impl PerfEventKind {
            pub const ALL: &'static [Self] = &[$(Self::$variant,)*];
            pub const COUNT: usize = Self::ALL.len();

            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }
        }
    };
}

perf_events! {
    RefillEvent => "refill",
    L1TlbEvent => "l1tlb",
    InstrCommit => "instr_commit",
    LoadEvent => "load",
    TrapEvent => "trap",
    ArchIntRegState => "arch_int_reg",
    ArchFpRegState => "arch_fp_reg",
    ArchVecRegState => "arch_vec_reg",
    ArchEvent => "arch_event",
    CsrState => "csr",
    HcsrState => "hcsr",
    DebugMode => "debug_mode",
    VecCsrState => "vec_csr",
    IntWriteback => "int_writeback",
    FpWriteback => "fp_writeback",
    VecWriteback => "vec_writeback",
    L2TlbEvent => "l2tlb",
    AtomicEvent => "atomic",
    LrScEvent => "lr_sc",
    SbufferEvent => "sbuffer",
    StoreEvent => "store",
}

impl PerfEventKind {
    const fn index(self) -> usize {
        self as usize
    }

    /// Kind with wire number `index`, in declaration order.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Call count and byte volume of one event class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accumulator {
    pub calls: u64,
    pub bytes: u64,
}

impl Accumulator {
    const fn add(&mut self, bytes: u64) {
        self.calls += 1;
        self.bytes += bytes;
    }

    const fn is_zero(&self) -> bool {
        self.calls == 0 && self.bytes == 0
    }
}

/// Per-core, per-kind accumulators plus the step entry point.
#[derive(Debug, Clone)]
pub struct PerfCounters {
    policy: PerfPolicy,
    cores: Vec<[Accumulator; PerfEventKind::COUNT]>,
    step: Accumulator,
}

impl PerfCounters {
    #[must_use]
    pub fn new(policy: PerfPolicy, num_cores: usize) -> Self {
        Self {
            policy,
            cores: vec![[Accumulator::default(); PerfEventKind::COUNT]; num_cores],
            step: Accumulator::default(),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> PerfPolicy {
        self.policy
    }

    /// Count one `run_steps` call.
    pub fn on_run_steps(&mut self) {
        if self.policy == PerfPolicy::PerCall {
            self.step.add(1);
        }
    }

    /// Count one simulated cycle.
    pub fn on_step(&mut self) {
        if self.policy == PerfPolicy::PerCycle {
            self.step.add(1);
        }
    }

    /// Count one event of `kind` on `core` moving `bytes` bytes.
    pub fn record(&mut self, core: usize, kind: PerfEventKind, bytes: u64) {
        if self.policy == PerfPolicy::Disabled {
            return;
        }
        if let Some(slots) = self.cores.get_mut(core) {
            slots[kind.index()].add(bytes);
        }
    }

    #[must_use]
    pub const fn step_entry(&self) -> Accumulator {
        self.step
    }

    #[must_use]
    pub fn get(&self, core: usize, kind: PerfEventKind) -> Accumulator {
        self.cores
            .get(core)
            .map_or_else(Accumulator::default, |slots| slots[kind.index()])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.step.is_zero() && self.cores.iter().flatten().all(Accumulator::is_zero)
    }

    /// Log and publish accumulated counts, then clear them.
    pub fn flush(&mut self) {
        if self.policy == PerfPolicy::Disabled || self.is_empty() {
            return;
        }

        info!(
            calls = self.step.calls,
            bytes = self.step.bytes,
            "perf: step entry"
        );
        counter!("cosim_perf_calls_total", "event" => "step").increment(self.step.calls);
        counter!("cosim_perf_bytes_total", "event" => "step").increment(self.step.bytes);

        for (core, slots) in self.cores.iter().enumerate() {
            for &kind in PerfEventKind::ALL {
                let acc = slots[kind.index()];
                if acc.is_zero() {
                    continue;
                }
                debug!(core, event = kind.name(), calls = acc.calls, bytes = acc.bytes, "perf");
                let labels = [
                    ("event", kind.name().to_string()),
                    ("core", core.to_string()),
                ];
                counter!("cosim_perf_calls_total", &labels).increment(acc.calls);
                counter!("cosim_perf_bytes_total", &labels).increment(acc.bytes);
            }
        }

        self.clear();
    }

    fn clear(&mut self) {
        self.step = Accumulator::default();
        for slots in &mut self.cores {
            *slots = [Accumulator::default(); PerfEventKind::COUNT];
        }
    }
}
