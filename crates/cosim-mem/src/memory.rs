//! Guarded DUT memory with mmap.
//!
//! The DUT's RAM is `[GUARD][MEMORY][GUARD]`, with the guard pages mapped
//! `PROT_NONE` so a model that walks off either end faults immediately.

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::path::Path;
use std::ptr::NonNull;

use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, mprotect, munmap};
use thiserror::Error;
use tracing::{debug, info};

use crate::image::{fill_from, open_image};

/// Guard page size (16KB, must be >= page size).
pub const GUARD_SIZE: usize = 1 << 14;

/// Default DUT memory size (8GB, reserved lazily).
pub const DEFAULT_MEMORY_SIZE: usize = 1 << 33;

/// Image path meaning "leave memory zeroed".
const ZERO_IMAGE: &str = "/dev/zero";

/// Memory allocation and image loading errors.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("mmap failed: {0}")]
    MmapFailed(#[from] nix::Error),

    #[error("invalid memory size: {0}")]
    InvalidSize(usize),

    #[error("failed to read image {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("image {path} does not fit in {capacity:#x} bytes of memory")]
    ImageTooLarge { path: String, capacity: usize },
}

/// DUT RAM backed by an anonymous mapping with guard pages.
pub struct SimMemory {
    region: NonNull<c_void>,
    total_size: usize,
    memory_size: usize,
    /// High-water mark of bytes written by image loads.
    loaded: usize,
}

impl SimMemory {
    /// Allocate `memory_size` bytes of zeroed DUT memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or mmap fails.
    pub fn new(memory_size: usize) -> Result<Self, MemoryError> {
        if memory_size == 0 {
            return Err(MemoryError::InvalidSize(memory_size));
        }

        let total_size = memory_size
            .checked_add(2 * GUARD_SIZE)
            .ok_or(MemoryError::InvalidSize(memory_size))?;
        let total_size_nz =
            NonZeroUsize::new(total_size).ok_or(MemoryError::InvalidSize(memory_size))?;

        let region = unsafe {
            mmap_anonymous(
                None,
                total_size_nz,
                ProtFlags::PROT_NONE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_NORESERVE,
            )?
        };

        let usable = unsafe {
            NonNull::new_unchecked(region.as_ptr().cast::<u8>().add(GUARD_SIZE).cast::<c_void>())
        };
        let protect = unsafe {
            mprotect(usable, memory_size, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE)
        };
        if let Err(e) = protect {
            unsafe {
                let _ = munmap(region, total_size);
            }
            return Err(e.into());
        }

        Ok(Self {
            region,
            total_size,
            memory_size,
            loaded: 0,
        })
    }

    /// Allocate memory and load `image` at offset 0.
    ///
    /// # Errors
    ///
    /// Fails if allocation fails, the image cannot be read, or it is larger
    /// than `memory_size`.
    pub fn with_image(image: &Path, memory_size: usize) -> Result<Self, MemoryError> {
        let mut memory = Self::new(memory_size)?;
        memory.load_image(image)?;
        Ok(memory)
    }

    /// Pointer to the usable region (after the first guard page).
    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        unsafe { self.region.as_ptr().cast::<u8>().add(GUARD_SIZE) }
    }

    /// Size of the usable region in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.memory_size
    }

    /// Number of leading bytes touched by image loads.
    #[must_use]
    pub const fn loaded_len(&self) -> usize {
        self.loaded
    }

    #[must_use]
    pub const fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.memory_size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.as_ptr(), self.memory_size) }
    }

    /// Load an image at offset 0, replacing whatever the prefix held.
    ///
    /// Returns the number of bytes loaded.
    ///
    /// # Errors
    ///
    /// Fails if the image cannot be read or does not fit.
    pub fn load_image(&mut self, path: &Path) -> Result<usize, MemoryError> {
        if path == Path::new(ZERO_IMAGE) {
            debug!("no memory image, DUT memory stays zeroed");
            return Ok(0);
        }
        let mut reader = open_image(path)?;
        let capacity = self.memory_size;
        let (len, truncated) =
            fill_from(&mut reader, self.as_mut_slice()).map_err(|source| MemoryError::Io {
                path: path.display().to_string(),
                source,
            })?;
        if truncated {
            return Err(MemoryError::ImageTooLarge {
                path: path.display().to_string(),
                capacity,
            });
        }
        self.loaded = self.loaded.max(len);
        info!(path = %path.display(), bytes = len, "loaded memory image");
        Ok(len)
    }

    /// Overwrite at most `nbytes` leading bytes with the contents of `path`.
    ///
    /// A shorter image only overwrites its own length. Returns the number of
    /// bytes written.
    ///
    /// # Errors
    ///
    /// Fails if the image cannot be read.
    pub fn overwrite(&mut self, path: &Path, nbytes: usize) -> Result<usize, MemoryError> {
        let mut reader = open_image(path)?;
        let limit = nbytes.min(self.memory_size);
        let (len, _) = fill_from(&mut reader, &mut self.as_mut_slice()[..limit]).map_err(
            |source| MemoryError::Io {
                path: path.display().to_string(),
                source,
            },
        )?;
        self.loaded = self.loaded.max(len);
        info!(path = %path.display(), bytes = len, "overwrote memory prefix");
        Ok(len)
    }
}

impl Drop for SimMemory {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.region, self.total_size);
        }
    }
}

// Owns its mapping exclusively.
unsafe impl Send for SimMemory {}

/// Reference copy of DUT memory used by the oracle.
///
/// Sized like the DUT memory; only the loaded prefix is copied so that
/// untouched pages of a large reservation stay unbacked.
pub struct GoldenMemory {
    inner: SimMemory,
}

impl GoldenMemory {
    /// Allocate a shadow matching `dut` and seed it with the loaded prefix.
    ///
    /// # Errors
    ///
    /// Fails if allocation fails.
    pub fn mirror(dut: &SimMemory) -> Result<Self, MemoryError> {
        let mut inner = SimMemory::new(dut.size())?;
        let len = dut.loaded_len();
        inner.as_mut_slice()[..len].copy_from_slice(&dut.as_slice()[..len]);
        inner.loaded = len;
        debug!(size = dut.size(), seeded = len, "initialized golden memory");
        Ok(Self { inner })
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.inner.size()
    }

    #[must_use]
    pub const fn as_slice(&self) -> &[u8] {
        self.inner.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.inner.as_mut_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap().write_all(data).unwrap();
        path
    }

    #[test]
    fn test_sim_memory_alloc() {
        let mem = SimMemory::new(4096).expect("allocation should succeed");
        assert_eq!(mem.size(), 4096);
        assert_eq!(mem.loaded_len(), 0);
        assert!(mem.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sim_memory_invalid_size() {
        assert!(matches!(SimMemory::new(0), Err(MemoryError::InvalidSize(0))));
    }

    #[test]
    fn test_load_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "ram.bin", &[1, 2, 3, 4, 5]);

        let mem = SimMemory::with_image(&path, 4096).unwrap();
        assert_eq!(&mem.as_slice()[..6], &[1, 2, 3, 4, 5, 0]);
        assert_eq!(mem.loaded_len(), 5);
    }

    #[test]
    fn test_zero_image_is_noop() {
        let mut mem = SimMemory::new(4096).unwrap();
        assert_eq!(mem.load_image(Path::new("/dev/zero")).unwrap(), 0);
        assert_eq!(mem.loaded_len(), 0);
    }

    #[test]
    fn test_load_image_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "big.bin", &[0xFF; 8192]);

        let result = SimMemory::with_image(&path, 4096);
        assert!(matches!(result, Err(MemoryError::ImageTooLarge { capacity: 4096, .. })));
    }

    #[test]
    fn test_overwrite_limits_length() {
        let dir = tempfile::tempdir().unwrap();
        let ram = write_file(dir.path(), "ram.bin", &[0x11; 64]);
        let restore = write_file(dir.path(), "gcpt.bin", &[0x22; 32]);

        let mut mem = SimMemory::with_image(&ram, 4096).unwrap();
        let written = mem.overwrite(&restore, 16).unwrap();
        assert_eq!(written, 16);
        assert!(mem.as_slice()[..16].iter().all(|&b| b == 0x22));
        assert!(mem.as_slice()[16..64].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_overwrite_short_image() {
        let dir = tempfile::tempdir().unwrap();
        let restore = write_file(dir.path(), "gcpt.bin", &[0x33; 8]);

        let mut mem = SimMemory::new(4096).unwrap();
        let written = mem.overwrite(&restore, 0xe00).unwrap();
        assert_eq!(written, 8);
        assert_eq!(mem.loaded_len(), 8);
        assert_eq!(mem.as_slice()[8], 0);
    }

    #[test]
    fn test_golden_mirrors_loaded_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "ram.bin", &[9, 8, 7]);

        let mem = SimMemory::with_image(&path, 4096).unwrap();
        let golden = GoldenMemory::mirror(&mem).unwrap();
        assert_eq!(golden.size(), mem.size());
        assert_eq!(&golden.as_slice()[..3], &[9, 8, 7]);
    }
}
