//! Native library loading helpers.

use std::path::Path;

use libloading::os::unix::{Library, RTLD_NOW, Symbol};
use tracing::{debug, error};

use crate::error::TargetError;

/// Open a shared library, resolving all symbols eagerly.
pub fn open_library(path: &Path) -> Result<Library, TargetError> {
    if !path.exists() {
        error!(path = %path.display(), "shared library not found");
        return Err(TargetError::LibraryNotFound(path.display().to_string()));
    }
    debug!(path = %path.display(), "loading shared library");
    let lib = unsafe { Library::open(Some(path), RTLD_NOW)? };
    Ok(lib)
}

/// Resolve a required function symbol.
pub unsafe fn load_symbol<T: Copy>(
    lib: &Library,
    symbol: &'static [u8],
    label: &'static str,
) -> Result<T, TargetError> {
    unsafe {
        let sym: Symbol<T> = lib.get(symbol).map_err(|e| {
            error!(symbol = label, "symbol not found in library");
            TargetError::SymbolNotFound(label.to_string(), e)
        })?;
        Ok(*sym)
    }
}

/// Resolve an optional function symbol.
pub unsafe fn load_optional_symbol<T: Copy>(lib: &Library, symbol: &'static [u8]) -> Option<T> {
    unsafe {
        let sym: Symbol<T> = lib.get(symbol).ok()?;
        Some(*sym)
    }
}

/// Map a C status return (`0` = success) to a result.
pub fn check_status(call: &'static str, status: i32) -> Result<(), TargetError> {
    if status == 0 {
        Ok(())
    } else {
        Err(TargetError::CallFailed { call, status })
    }
}
