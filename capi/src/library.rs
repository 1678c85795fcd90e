use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::Exception;

/// Shared libraries opened for extensions. Kept open for the VM's lifetime,
/// since resolved entry points point into them.
pub struct NativeLibraries {
    loaded: Mutex<HashMap<PathBuf, Arc<Library>, ahash::RandomState>>,
}

impl NativeLibraries {
    pub fn new() -> Self {
        Self {
            loaded: Mutex::new(HashMap::default()),
        }
    }

    pub fn open(&self, path: &Path) -> Result<Arc<Library>, Exception> {
        let mut loaded = self.loaded.lock();
        if let Some(library) = loaded.get(path) {
            return Ok(library.clone());
        }

        let ext = path.extension().and_then(|e| e.to_str());
        if !matches!(ext, Some("so" | "dylib" | "dll" | "bundle")) {
            warn!(
                "extension '{}' has an unexpected file extension",
                path.display()
            );
        }

        // SAFETY: running a library's initializers is the point of loading
        // an extension.
        let library = unsafe { Library::new(path) }
            .map_err(|e| Exception::load(format!("{}: {e}", path.display())))?;
        debug!("opened native library {}", path.display());
        let library = Arc::new(library);
        loaded.insert(path.to_path_buf(), library.clone());
        Ok(library)
    }

    /// Address of `symbol` in the library at `path`.
    pub fn resolve_entry_point(&self, path: &Path, symbol: &str) -> Result<*const c_void, Exception> {
        let library = self.open(path)?;
        // SAFETY: the address is only reinterpreted by the caller, which
        // knows the symbol's signature.
        let address = unsafe {
            let symbol = library
                .get::<*const c_void>(symbol.as_bytes())
                .map_err(|e| Exception::load(format!("{symbol} in {}: {e}", path.display())))?;
            *symbol
        };
        debug!("resolved {symbol} in {} at {address:?}", path.display());
        Ok(address)
    }

    pub fn len(&self) -> usize {
        self.loaded.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NativeLibraries {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_load_error() {
        let libraries = NativeLibraries::new();
        let err = libraries
            .resolve_entry_point(Path::new("/nonexistent/libnothing.so"), "Init_nothing")
            .unwrap_err();
        assert!(matches!(err, Exception::Load { .. }));
        assert!(libraries.is_empty());
    }
}
