//! CPI statistics sink.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::info;

/// Write one `<core>,<cpi>` line per core.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_cpi(path: &Path, cpi: &[f64]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for (core, value) in cpi.iter().enumerate() {
        writeln!(out, "{core},{value:.6}")?;
    }
    out.flush()?;
    info!(path = %path.display(), cores = cpi.len(), "wrote per-core cpi");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_cpi_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpi.csv");
        write_cpi(&path, &[2.5, 1.0 / 3.0]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "0,2.500000\n1,0.333333\n");
    }

    #[test]
    fn test_write_cpi_bad_path() {
        assert!(write_cpi(Path::new("/nonexistent/dir/cpi.csv"), &[1.0]).is_err());
    }
}
