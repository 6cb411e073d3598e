use std::fs;
use std::path::Path;

use crate::error::CompileError;

/// Bumped whenever the on-disk entry layout changes.
pub const FORMAT_VERSION: u32 = 2;

pub const ENTRY_EXTENSION: &str = "cubin";

/// Extension of the optional kernel source written next to an entry.
pub const SOURCE_EXTENSION: &str = "cu";

/// `<key>_<version>.cubin`
pub fn entry_file_name(key: &str) -> String {
    format!("{key}_{FORMAT_VERSION}.{ENTRY_EXTENSION}")
}

/// Creates `dir` if needed.
///
/// Several processes may race to create the directory the first time; losing
/// that race is fine as long as the directory exists afterwards.
pub fn ensure_dir(dir: &Path) -> Result<(), CompileError> {
    if dir.is_dir() {
        return Ok(());
    }
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(_) if dir.is_dir() => Ok(()),
        Err(source) => Err(CompileError::Storage {
            path: dir.to_path_buf(),
            source,
        }),
    }
}
