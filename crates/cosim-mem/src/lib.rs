//! Memory models backing a co-simulation run.
//!
//! - [`SimMemory`]: the DUT's addressable RAM, an mmap'd region with guard pages.
//! - [`GoldenMemory`]: the reference shadow of DUT RAM handed to the oracle.
//! - [`FlashImage`]: the peripheral flash contents (possibly unprogrammed).
//!
//! Images are raw binaries; a `.zst` suffix selects zstd decompression.

mod flash;
mod image;
mod memory;

pub use flash::FlashImage;
pub use image::{ImageReader, open_image};
pub use memory::{DEFAULT_MEMORY_SIZE, GUARD_SIZE, GoldenMemory, MemoryError, SimMemory};
