//! Image file access with transparent zstd decompression.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use tracing::debug;

use crate::MemoryError;

/// Reader over a memory image, raw or zstd-compressed.
pub enum ImageReader {
    Raw(BufReader<File>),
    Zstd(zstd::stream::Decoder<'static, BufReader<File>>),
}

impl Read for ImageReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Raw(r) => r.read(buf),
            Self::Zstd(r) => r.read(buf),
        }
    }
}

fn is_zstd(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "zst" || ext == "zstd")
}

/// Open an image file, selecting the decoder from its extension.
///
/// # Errors
///
/// Returns [`MemoryError::Io`] if the file cannot be opened or the zstd
/// frame header is invalid.
pub fn open_image(path: &Path) -> Result<ImageReader, MemoryError> {
    let io_err = |source| MemoryError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    if is_zstd(path) {
        debug!(path = %path.display(), "opening zstd-compressed image");
        let decoder = zstd::stream::Decoder::new(file).map_err(io_err)?;
        Ok(ImageReader::Zstd(decoder))
    } else {
        Ok(ImageReader::Raw(BufReader::new(file)))
    }
}

/// Fill `dst` from `reader` until EOF or `dst` is full.
///
/// Returns the number of bytes written and whether the reader still had data.
pub(crate) fn fill_from(reader: &mut impl Read, dst: &mut [u8]) -> io::Result<(usize, bool)> {
    let mut filled = 0;
    while filled < dst.len() {
        match reader.read(&mut dst[filled..]) {
            Ok(0) => return Ok((filled, false)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    let mut probe = [0u8; 1];
    loop {
        match reader.read(&mut probe) {
            Ok(n) => return Ok((filled, n != 0)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fill_from_exact_and_short() {
        let data = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        let (n, more) = fill_from(&mut &data[..], &mut dst).unwrap();
        assert_eq!((n, more), (4, false));

        let mut dst = [0u8; 8];
        let (n, more) = fill_from(&mut &data[..], &mut dst).unwrap();
        assert_eq!((n, more), (4, false));
        assert_eq!(&dst[..4], &data);
    }

    #[test]
    fn test_fill_from_overflow() {
        let data = [0xAAu8; 16];
        let mut dst = [0u8; 8];
        let (n, more) = fill_from(&mut &data[..], &mut dst).unwrap();
        assert_eq!(n, 8);
        assert!(more);
    }

    #[test]
    fn test_open_zstd_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.bin.zst");
        let payload: Vec<u8> = (0..=255u8).collect();
        let compressed = zstd::encode_all(&payload[..], 3).unwrap();
        File::create(&path).unwrap().write_all(&compressed).unwrap();

        let mut reader = open_image(&path).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_open_missing_image() {
        let result = open_image(Path::new("/nonexistent/image.bin"));
        assert!(matches!(result, Err(MemoryError::Io { .. })));
    }
}
