//! Flash model contents.

use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::MemoryError;
use crate::image::open_image;

/// Flash contents as seen by the peripheral models.
///
/// An unprogrammed flash has no backing image and reads as empty.
#[derive(Debug, Default, Clone)]
pub struct FlashImage {
    data: Vec<u8>,
    source: Option<PathBuf>,
}

impl FlashImage {
    /// Flash with no programmed contents.
    #[must_use]
    pub fn unprogrammed() -> Self {
        Self::default()
    }

    /// Load flash contents from `path`, or leave it unprogrammed when `None`.
    ///
    /// # Errors
    ///
    /// Fails if the image cannot be read.
    pub fn load(path: Option<&Path>) -> Result<Self, MemoryError> {
        let Some(path) = path else {
            debug!("no flash image configured, flash is unprogrammed");
            return Ok(Self::unprogrammed());
        };
        let mut data = Vec::new();
        open_image(path)?
            .read_to_end(&mut data)
            .map_err(|source| MemoryError::Io {
                path: path.display().to_string(),
                source,
            })?;
        info!(path = %path.display(), bytes = data.len(), "loaded flash image");
        Ok(Self {
            data,
            source: Some(path.to_path_buf()),
        })
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn is_programmed(&self) -> bool {
        self.source.is_some()
    }

    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unprogrammed_flash() {
        let flash = FlashImage::load(None).unwrap();
        assert!(!flash.is_programmed());
        assert!(flash.as_slice().is_empty());
    }

    #[test]
    fn test_load_flash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");
        std::fs::write(&path, [0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        let flash = FlashImage::load(Some(&path)).unwrap();
        assert!(flash.is_programmed());
        assert_eq!(flash.as_slice(), &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(flash.source(), Some(path.as_path()));
    }
}
