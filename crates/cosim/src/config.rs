//! Control-plane configuration.
//!
//! Every setting is independently settable before initialization. Paths are
//! validated here so that later stages can assume they are usable strings.

use std::path::{Path, PathBuf};

use cosim_mem::DEFAULT_MEMORY_SIZE;
use tracing::info;

use crate::error::ConfigError;
use crate::perf::PerfPolicy;
use crate::report::DeliveryMode;

/// Longest accepted path, in bytes.
pub const MAX_PATH_LEN: usize = 255;

/// Image used when none is configured: memory stays zeroed.
pub const DEFAULT_IMAGE: &str = "/dev/zero";

/// Bytes of the restore image copied over the memory prefix by default.
pub const DEFAULT_OVERWRITE_NBYTES: u64 = 0xe00;

/// Feature set resolved once when the controller is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Compare every cycle against the oracle.
    pub comparison: bool,
    pub delivery: DeliveryMode,
    pub perf: PerfPolicy,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            comparison: true,
            delivery: DeliveryMode::Synchronous,
            perf: PerfPolicy::Disabled,
        }
    }
}

/// Run configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    image: PathBuf,
    flash_image: Option<PathBuf>,
    restore_image: Option<PathBuf>,
    overwrite_nbytes: u64,
    max_instrs: u64,
    oracle_lib: Option<PathBuf>,
    workload_list: Option<PathBuf>,
    cpi_output: Option<PathBuf>,
    memory_size: usize,
    capabilities: Capabilities,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            image: PathBuf::from(DEFAULT_IMAGE),
            flash_image: None,
            restore_image: None,
            overwrite_nbytes: DEFAULT_OVERWRITE_NBYTES,
            max_instrs: 0,
            oracle_lib: None,
            workload_list: None,
            cpi_output: None,
            memory_size: DEFAULT_MEMORY_SIZE,
            capabilities: Capabilities::default(),
        }
    }
}

fn validate_path(field: &'static str, path: &Path) -> Result<PathBuf, ConfigError> {
    let len = path.as_os_str().len();
    if len == 0 {
        return Err(ConfigError::EmptyPath { field });
    }
    if len > MAX_PATH_LEN {
        return Err(ConfigError::PathTooLong {
            field,
            path: path.display().to_string(),
            max: MAX_PATH_LEN,
        });
    }
    Ok(path.to_path_buf())
}

impl SimConfig {
    /// Set the DUT memory image.
    ///
    /// # Errors
    ///
    /// Rejects empty paths and paths longer than [`MAX_PATH_LEN`].
    pub fn set_image(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.image = validate_path("image", path.as_ref())?;
        info!(path = %self.image.display(), "ram image");
        Ok(())
    }

    /// Set the flash (peripheral) image.
    ///
    /// # Errors
    ///
    /// Rejects empty or overlong paths.
    pub fn set_flash_image(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = validate_path("flash image", path.as_ref())?;
        info!(path = %path.display(), "flash image");
        self.flash_image = Some(path);
        Ok(())
    }

    /// Set the restore image copied over the memory prefix after loading.
    ///
    /// # Errors
    ///
    /// Rejects empty or overlong paths.
    pub fn set_restore_image(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = validate_path("restore image", path.as_ref())?;
        info!(path = %path.display(), "restore image");
        self.restore_image = Some(path);
        Ok(())
    }

    pub const fn set_overwrite_nbytes(&mut self, nbytes: u64) {
        self.overwrite_nbytes = nbytes;
    }

    /// Set the per-run instruction budget (`0` = unbounded).
    pub fn set_max_instrs(&mut self, max_instrs: u64) {
        info!(max_instrs, "set max instrs");
        self.max_instrs = max_instrs;
    }

    /// Select the oracle library.
    ///
    /// # Errors
    ///
    /// Rejects empty or overlong paths.
    pub fn set_oracle_lib(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = validate_path("oracle library", path.as_ref())?;
        info!(path = %path.display(), "diff-test ref so");
        self.oracle_lib = Some(path);
        Ok(())
    }

    /// Enable batch mode with the given workload list.
    ///
    /// # Errors
    ///
    /// Rejects empty or overlong paths.
    pub fn set_workload_list(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = validate_path("workload list", path.as_ref())?;
        info!(path = %path.display(), "set workload list");
        self.workload_list = Some(path);
        Ok(())
    }

    /// Write per-core CPI to `path` when every core exhausts its budget.
    ///
    /// # Errors
    ///
    /// Rejects empty or overlong paths.
    pub fn set_cpi_output(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.cpi_output = Some(validate_path("cpi output", path.as_ref())?);
        Ok(())
    }

    /// Set the DUT memory size in bytes.
    ///
    /// # Errors
    ///
    /// Rejects a zero size.
    pub fn set_memory_size(&mut self, bytes: usize) -> Result<(), ConfigError> {
        if bytes == 0 {
            return Err(ConfigError::ZeroMemorySize);
        }
        self.memory_size = bytes;
        Ok(())
    }

    /// Skip the oracle and golden memory; no divergence detection occurs.
    pub fn disable_comparison(&mut self) {
        info!("disable diff-test");
        self.capabilities.comparison = false;
    }

    pub const fn set_delivery(&mut self, mode: DeliveryMode) {
        self.capabilities.delivery = mode;
    }

    pub const fn set_perf_policy(&mut self, policy: PerfPolicy) {
        self.capabilities.perf = policy;
    }

    #[must_use]
    pub fn image(&self) -> &Path {
        &self.image
    }

    #[must_use]
    pub fn flash_image(&self) -> Option<&Path> {
        self.flash_image.as_deref()
    }

    #[must_use]
    pub fn restore_image(&self) -> Option<&Path> {
        self.restore_image.as_deref()
    }

    #[must_use]
    pub const fn overwrite_nbytes(&self) -> u64 {
        self.overwrite_nbytes
    }

    #[must_use]
    pub const fn max_instrs(&self) -> u64 {
        self.max_instrs
    }

    #[must_use]
    pub fn oracle_lib(&self) -> Option<&Path> {
        self.oracle_lib.as_deref()
    }

    #[must_use]
    pub fn workload_list(&self) -> Option<&Path> {
        self.workload_list.as_deref()
    }

    #[must_use]
    pub fn cpi_output(&self) -> Option<&Path> {
        self.cpi_output.as_deref()
    }

    #[must_use]
    pub const fn memory_size(&self) -> usize {
        self.memory_size
    }

    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    #[must_use]
    pub const fn comparison_enabled(&self) -> bool {
        self.capabilities.comparison
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.image(), Path::new(DEFAULT_IMAGE));
        assert_eq!(config.overwrite_nbytes(), DEFAULT_OVERWRITE_NBYTES);
        assert_eq!(config.max_instrs(), 0);
        assert!(config.comparison_enabled());
        assert!(config.workload_list().is_none());
        assert_eq!(config.capabilities().delivery, DeliveryMode::Synchronous);
    }

    #[test]
    fn test_empty_path_rejected() {
        let mut config = SimConfig::default();
        let err = config.set_image("").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPath { field: "image" }));
        assert_eq!(config.image(), Path::new(DEFAULT_IMAGE));
    }

    #[test]
    fn test_long_path_rejected() {
        let mut config = SimConfig::default();
        let long = "a".repeat(MAX_PATH_LEN + 1);
        assert!(matches!(
            config.set_workload_list(&long),
            Err(ConfigError::PathTooLong { max: MAX_PATH_LEN, .. })
        ));
        let exact = "b".repeat(MAX_PATH_LEN);
        assert!(config.set_workload_list(&exact).is_ok());
    }

    #[test]
    fn test_disable_comparison() {
        let mut config = SimConfig::default();
        config.disable_comparison();
        assert!(!config.comparison_enabled());
    }

    #[test]
    fn test_zero_memory_rejected() {
        let mut config = SimConfig::default();
        assert!(matches!(config.set_memory_size(0), Err(ConfigError::ZeroMemorySize)));
        config.set_memory_size(4096).unwrap();
        assert_eq!(config.memory_size(), 4096);
    }
}
