//! DUT and oracle implementations backed by native libraries.
//!
//! DUT library symbols:
//!
//! ```c
//! uint32_t cosim_dut_num_cores(void);
//! int32_t  cosim_dut_init(uint8_t *ram, size_t ram_size, const uint8_t *flash, size_t flash_size);
//! void     cosim_dut_finish(void);
//! void     cosim_dut_tick(void);
//! void     cosim_dut_trap_event(uint32_t core, cosim_trap_event_t *out);
//! size_t   cosim_dut_snapshot(uint32_t core, const uint8_t **out);   // optional
//! uint64_t cosim_dut_assert_count(void);                             // optional
//! size_t   cosim_dut_perf_drain(cosim_perf_record_t *out, size_t cap); // optional
//! ```
//!
//! `cosim_dut_perf_drain` fills up to `cap` records and returns how many it
//! wrote; it is called until it returns fewer than `cap`.
//!
//! Oracle library symbols:
//!
//! ```c
//! int32_t cosim_ref_init(const uint8_t *golden, size_t size, uint32_t num_cores);
//! int32_t cosim_ref_compare(uint32_t core, const uint8_t *snapshot, size_t len,
//!                           uint8_t *golden, size_t golden_size);
//! void    cosim_ref_finish(void);
//! ```

use std::path::Path;

use cosim_mem::{FlashImage, GoldenMemory, SimMemory};
use libloading::os::unix::Library;
use tracing::{debug, trace};

use super::api::{check_status, load_optional_symbol, load_symbol, open_library};
use super::{Divergence, Dut, Oracle, TrapEvent};
use crate::error::TargetError;
use crate::perf::{PerfCounters, PerfEventKind};

/// C layout of `cosim_trap_event_t`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct RawTrapEvent {
    has_trap: u8,
    code: i32,
    pc: u64,
    instr_cnt: u64,
    cycle_cnt: u64,
}

impl From<RawTrapEvent> for TrapEvent {
    fn from(raw: RawTrapEvent) -> Self {
        Self {
            has_trap: raw.has_trap != 0,
            code: raw.code,
            pc: raw.pc,
            instruction_count: raw.instr_cnt,
            cycle_count: raw.cycle_cnt,
        }
    }
}

/// C layout of `cosim_perf_record_t`. `kind` indexes [`PerfEventKind::ALL`].
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct RawPerfRecord {
    core: u32,
    kind: u32,
    bytes: u64,
}

const PERF_DRAIN_BATCH: usize = 64;

type NumCoresFn = unsafe extern "C" fn() -> u32;
type DutInitFn = unsafe extern "C" fn(*mut u8, usize, *const u8, usize) -> i32;
type VoidFn = unsafe extern "C" fn();
type TrapEventFn = unsafe extern "C" fn(u32, *mut RawTrapEvent);
type SnapshotFn = unsafe extern "C" fn(u32, *mut *const u8) -> usize;
type AssertCountFn = unsafe extern "C" fn() -> u64;
type PerfDrainFn = unsafe extern "C" fn(*mut RawPerfRecord, usize) -> usize;

type RefInitFn = unsafe extern "C" fn(*const u8, usize, u32) -> i32;
type RefCompareFn = unsafe extern "C" fn(u32, *const u8, usize, *mut u8, usize) -> i32;

#[derive(Clone, Copy)]
struct DutApi {
    num_cores: NumCoresFn,
    init: DutInitFn,
    finish: VoidFn,
    tick: VoidFn,
    trap_event: TrapEventFn,
    snapshot: Option<SnapshotFn>,
    assert_count: Option<AssertCountFn>,
    perf_drain: Option<PerfDrainFn>,
}

impl DutApi {
    unsafe fn load(lib: &Library) -> Result<Self, TargetError> {
        unsafe {
            Ok(Self {
                num_cores: load_symbol(lib, b"cosim_dut_num_cores", "cosim_dut_num_cores")?,
                init: load_symbol(lib, b"cosim_dut_init", "cosim_dut_init")?,
                finish: load_symbol(lib, b"cosim_dut_finish", "cosim_dut_finish")?,
                tick: load_symbol(lib, b"cosim_dut_tick", "cosim_dut_tick")?,
                trap_event: load_symbol(lib, b"cosim_dut_trap_event", "cosim_dut_trap_event")?,
                snapshot: load_optional_symbol(lib, b"cosim_dut_snapshot"),
                assert_count: load_optional_symbol(lib, b"cosim_dut_assert_count"),
                perf_drain: load_optional_symbol(lib, b"cosim_dut_perf_drain"),
            })
        }
    }
}

/// DUT model compiled into a shared library.
pub struct DylibDut {
    _lib: Library,
    api: DutApi,
    num_cores: usize,
}

impl DylibDut {
    /// Load a DUT library.
    ///
    /// # Errors
    ///
    /// Fails if the library is missing or lacks a required symbol.
    pub fn load(path: &Path) -> Result<Self, TargetError> {
        let lib = open_library(path)?;
        let api = unsafe { DutApi::load(&lib)? };
        let num_cores = unsafe { (api.num_cores)() } as usize;
        if num_cores == 0 {
            return Err(TargetError::Model(format!(
                "{} reports zero cores",
                path.display()
            )));
        }
        debug!(
            path = %path.display(),
            num_cores,
            snapshot = api.snapshot.is_some(),
            perf = api.perf_drain.is_some(),
            "loaded DUT library"
        );
        Ok(Self {
            _lib: lib,
            api,
            num_cores,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn core_index(core: usize) -> u32 {
    core as u32
}

impl Dut for DylibDut {
    fn num_cores(&self) -> usize {
        self.num_cores
    }

    fn init(&mut self, memory: &mut SimMemory, flash: &FlashImage) -> Result<(), TargetError> {
        let flash = flash.as_slice();
        let status = unsafe {
            (self.api.init)(memory.as_ptr(), memory.size(), flash.as_ptr(), flash.len())
        };
        check_status("cosim_dut_init", status)
    }

    fn finish(&mut self) {
        unsafe { (self.api.finish)() };
    }

    fn tick(&mut self) {
        unsafe { (self.api.tick)() };
    }

    fn trap_event(&self, core: usize) -> TrapEvent {
        let mut out = RawTrapEvent::default();
        unsafe { (self.api.trap_event)(core_index(core), &raw mut out) };
        out.into()
    }

    fn snapshot(&self, core: usize) -> &[u8] {
        let Some(snapshot) = self.api.snapshot else {
            return &[];
        };
        let mut ptr: *const u8 = std::ptr::null();
        let len = unsafe { snapshot(core_index(core), &raw mut ptr) };
        if ptr.is_null() || len == 0 {
            return &[];
        }
        // The library keeps the buffer alive until the next tick.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }

    fn assertion_count(&self) -> u64 {
        self.api.assert_count.map_or(0, |f| unsafe { f() })
    }

    fn drain_perf(&mut self, perf: &mut PerfCounters) {
        let Some(drain) = self.api.perf_drain else {
            return;
        };
        let mut buf = [RawPerfRecord::default(); PERF_DRAIN_BATCH];
        loop {
            let n = unsafe { drain(buf.as_mut_ptr(), buf.len()) }.min(buf.len());
            record_perf(perf, &buf[..n]);
            if n < buf.len() {
                break;
            }
        }
    }
}

fn record_perf(perf: &mut PerfCounters, records: &[RawPerfRecord]) {
    for record in records {
        let Some(kind) = PerfEventKind::from_index(record.kind as usize) else {
            trace!(kind = record.kind, core = record.core, "unknown perf event kind");
            continue;
        };
        perf.record(record.core as usize, kind, record.bytes);
    }
}

#[derive(Clone, Copy)]
struct RefApi {
    init: RefInitFn,
    compare: RefCompareFn,
    finish: VoidFn,
}

/// Reference model compiled into a shared library.
pub struct DylibOracle {
    _lib: Library,
    api: RefApi,
}

impl DylibOracle {
    /// Load an oracle library.
    ///
    /// # Errors
    ///
    /// Fails if the library is missing or lacks a required symbol.
    pub fn load(path: &Path) -> Result<Self, TargetError> {
        let lib = open_library(path)?;
        let api = unsafe {
            RefApi {
                init: load_symbol(&lib, b"cosim_ref_init", "cosim_ref_init")?,
                compare: load_symbol(&lib, b"cosim_ref_compare", "cosim_ref_compare")?,
                finish: load_symbol(&lib, b"cosim_ref_finish", "cosim_ref_finish")?,
            }
        };
        debug!(path = %path.display(), "loaded oracle library");
        Ok(Self { _lib: lib, api })
    }
}

impl Oracle for DylibOracle {
    fn init(&mut self, golden: &GoldenMemory, num_cores: usize) -> Result<(), TargetError> {
        let bytes = golden.as_slice();
        let status = unsafe { (self.api.init)(bytes.as_ptr(), bytes.len(), core_index(num_cores)) };
        check_status("cosim_ref_init", status)
    }

    fn compare(
        &mut self,
        core: usize,
        dut: &dyn Dut,
        golden: &mut GoldenMemory,
    ) -> Result<(), Divergence> {
        let snapshot = dut.snapshot(core);
        let golden = golden.as_mut_slice();
        let status = unsafe {
            (self.api.compare)(
                core_index(core),
                snapshot.as_ptr(),
                snapshot.len(),
                golden.as_mut_ptr(),
                golden.len(),
            )
        };
        trace!(core, status, "reference compare");
        if status == 0 {
            Ok(())
        } else {
            Err(Divergence {
                core,
                code: status,
                message: "reference model reported a mismatch".to_string(),
            })
        }
    }

    fn finish(&mut self) {
        unsafe { (self.api.finish)() };
    }
}
