//! Per-run resource setup and teardown.
//!
//! Initialization runs a fixed sequence of steps (see [`InitStep`]); a failing
//! step releases everything acquired before it. Teardown releases in the
//! reverse dependency order: flash, oracle, golden memory, devices, memory.

use cosim_mem::{FlashImage, GoldenMemory, SimMemory};
use tracing::{debug, error, info, warn};

use crate::config::SimConfig;
use crate::controller::CoreEndInfo;
use crate::error::{InitError, InitStep};
use crate::perf::PerfCounters;
use crate::target::{Dut, Oracle};

/// Resources owned for the duration of one run.
#[derive(Default)]
pub struct Lifecycle {
    memory: Option<SimMemory>,
    flash: Option<FlashImage>,
    golden: Option<GoldenMemory>,
    oracle_ready: bool,
    devices_ready: bool,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True between a successful [`initialize`](Self::initialize) and the
    /// next [`teardown`](Self::teardown).
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.devices_ready
    }

    #[must_use]
    pub const fn memory(&self) -> Option<&SimMemory> {
        self.memory.as_ref()
    }

    #[must_use]
    pub const fn golden(&self) -> Option<&GoldenMemory> {
        self.golden.as_ref()
    }

    pub const fn golden_mut(&mut self) -> Option<&mut GoldenMemory> {
        self.golden.as_mut()
    }

    #[must_use]
    pub const fn flash(&self) -> Option<&FlashImage> {
        self.flash.as_ref()
    }

    /// Acquire memory, flash, golden memory and devices for a new run.
    ///
    /// The oracle is only initialized when `oracle` is `Some`.
    ///
    /// # Errors
    ///
    /// Returns the failing step. Resources acquired by earlier steps are
    /// released before returning.
    pub fn initialize(
        &mut self,
        config: &SimConfig,
        dut: &mut dyn Dut,
        oracle: &mut Option<Box<dyn Oracle>>,
    ) -> Result<(), InitError> {
        if self.memory.is_some() {
            warn!("initializing over a run that was not torn down");
            self.release(dut, oracle);
        }

        let result = self.acquire(config, dut, oracle);
        match &result {
            Ok(()) => info!(image = %config.image().display(), "simulation initialized"),
            Err(e) => {
                error!(step = %e.step(), error = %e, "initialization failed");
                self.release(dut, oracle);
            }
        }
        result
    }

    fn acquire(
        &mut self,
        config: &SimConfig,
        dut: &mut dyn Dut,
        oracle: &mut Option<Box<dyn Oracle>>,
    ) -> Result<(), InitError> {
        let memory_err = |step| move |source| InitError::Memory { step, source };
        let target_err = |step| move |source| InitError::Target { step, source };

        let memory = self.memory.insert(
            SimMemory::with_image(config.image(), config.memory_size())
                .map_err(memory_err(InitStep::LoadImage))?,
        );

        if let Some(restore) = config.restore_image() {
            let nbytes = usize::try_from(config.overwrite_nbytes()).unwrap_or(usize::MAX);
            memory
                .overwrite(restore, nbytes)
                .map_err(memory_err(InitStep::RestoreImage))?;
        }

        let flash = self.flash.insert(
            FlashImage::load(config.flash_image()).map_err(memory_err(InitStep::Flash))?,
        );

        if let Some(oracle) = oracle.as_mut() {
            let golden = self
                .golden
                .insert(GoldenMemory::mirror(memory).map_err(memory_err(InitStep::Oracle))?);
            oracle
                .init(golden, dut.num_cores())
                .map_err(target_err(InitStep::Oracle))?;
            self.oracle_ready = true;
            debug!(cores = dut.num_cores(), "oracle initialized");
        }

        dut.init(memory, flash)
            .map_err(target_err(InitStep::Devices))?;
        self.devices_ready = true;
        Ok(())
    }

    /// End the run: flush perf output, release every resource and clear
    /// the per-core completion state.
    pub fn teardown(
        &mut self,
        dut: &mut dyn Dut,
        oracle: &mut Option<Box<dyn Oracle>>,
        end_info: &mut CoreEndInfo,
        perf: &mut PerfCounters,
    ) {
        perf.flush();
        self.release(dut, oracle);
        end_info.reset();
        debug!("simulation torn down");
    }

    fn release(&mut self, dut: &mut dyn Dut, oracle: &mut Option<Box<dyn Oracle>>) {
        self.flash = None;
        if self.oracle_ready {
            if let Some(oracle) = oracle.as_mut() {
                oracle.finish();
            }
            self.oracle_ready = false;
        }
        self.golden = None;
        if self.devices_ready {
            dut.finish();
            self.devices_ready = false;
        }
        self.memory = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perf::PerfPolicy;
    use crate::test_support::{Call, ScriptedDut, ScriptedOracle};

    const MEM: usize = 1 << 16;

    fn config() -> SimConfig {
        let mut config = SimConfig::default();
        config.set_memory_size(MEM).unwrap();
        config
    }

    #[test]
    fn test_initialize_and_teardown_order() {
        let mut dut = ScriptedDut::new(2);
        let probe = dut.probe();
        let mut oracle: Option<Box<dyn Oracle>> = Some(Box::new(ScriptedOracle::new(&probe)));
        let mut lifecycle = Lifecycle::new();

        lifecycle.initialize(&config(), &mut dut, &mut oracle).unwrap();
        assert!(lifecycle.is_initialized());
        assert!(lifecycle.golden().is_some());
        assert_eq!(lifecycle.memory().map(SimMemory::size), Some(MEM));
        assert!(!lifecycle.flash().is_some_and(FlashImage::is_programmed));

        let mut end_info = CoreEndInfo::new(2);
        end_info.mark(0, 1.0);
        let mut perf = PerfCounters::new(PerfPolicy::Disabled, 2);
        lifecycle.teardown(&mut dut, &mut oracle, &mut end_info, &mut perf);

        assert!(!lifecycle.is_initialized());
        assert!(lifecycle.memory().is_none());
        assert_eq!(end_info.trapped_count(), 0);
        assert_eq!(
            probe.calls(),
            vec![Call::OracleInit, Call::DutInit, Call::OracleFinish, Call::DutFinish]
        );
    }

    #[test]
    fn test_no_oracle_skips_golden() {
        let mut dut = ScriptedDut::new(1);
        let mut oracle = None;
        let mut lifecycle = Lifecycle::new();
        lifecycle.initialize(&config(), &mut dut, &mut oracle).unwrap();
        assert!(lifecycle.golden().is_none());
        assert!(lifecycle.is_initialized());
    }

    #[test]
    fn test_missing_image_fails_first_step() {
        let mut dut = ScriptedDut::new(1);
        let probe = dut.probe();
        let mut oracle: Option<Box<dyn Oracle>> = Some(Box::new(ScriptedOracle::new(&probe)));
        let mut config = config();
        config.set_image("/nonexistent/image.bin").unwrap();

        let mut lifecycle = Lifecycle::new();
        let err = lifecycle
            .initialize(&config, &mut dut, &mut oracle)
            .unwrap_err();
        assert_eq!(err.step(), InitStep::LoadImage);
        assert!(lifecycle.memory().is_none());
        assert!(probe.calls().is_empty());
    }

    #[test]
    fn test_device_failure_releases_oracle() {
        let mut dut = ScriptedDut::new(1);
        dut.fail_init();
        let probe = dut.probe();
        let mut oracle: Option<Box<dyn Oracle>> = Some(Box::new(ScriptedOracle::new(&probe)));

        let mut lifecycle = Lifecycle::new();
        let err = lifecycle
            .initialize(&config(), &mut dut, &mut oracle)
            .unwrap_err();
        assert_eq!(err.step(), InitStep::Devices);
        assert!(!lifecycle.is_initialized());
        assert!(lifecycle.golden().is_none());
        assert_eq!(
            probe.calls(),
            vec![Call::OracleInit, Call::DutInit, Call::OracleFinish]
        );
    }

    #[test]
    fn test_restore_image_overwrites_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("image.bin");
        let restore = dir.path().join("restore.bin");
        std::fs::write(&image, [0x11u8; 64]).unwrap();
        std::fs::write(&restore, [0x22u8; 64]).unwrap();

        let mut config = config();
        config.set_image(&image).unwrap();
        config.set_restore_image(&restore).unwrap();
        config.set_overwrite_nbytes(16);

        let mut dut = ScriptedDut::new(1);
        let mut oracle = None;
        let mut lifecycle = Lifecycle::new();
        lifecycle.initialize(&config, &mut dut, &mut oracle).unwrap();

        let memory = lifecycle.memory().unwrap().as_slice();
        assert!(memory[..16].iter().all(|&b| b == 0x22));
        assert!(memory[16..64].iter().all(|&b| b == 0x11));
    }
}
