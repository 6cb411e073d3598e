//! Content-addressed entry files.
//!
//! An entry file holds the hex digest of its payload followed by the payload.
//! Writers stage the bytes in a temporary file inside the cache directory and
//! rename it into place, so the final path only ever shows a complete file.
//! Nothing is locked: every producer of a key writes the same bytes, so it
//! does not matter whose rename lands last. Readers still verify the digest
//! and treat a mismatch as a miss, which covers filesystems whose rename is
//! not truly atomic.
//!
//! The staging file and the entry must live on the same filesystem for the
//! rename to be atomic. Network filesystems without atomic rename break this
//! model.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::key::{CacheKey, DIGEST_HEX_LEN, digest_hex};
use super::path::{SOURCE_EXTENSION, ensure_dir, entry_file_name};
use crate::error::CompileError;

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A verified payload.
    Hit(Vec<u8>),
    /// Absent, truncated or corrupted.
    Miss,
}

impl Lookup {
    pub const fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    save_source: bool,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            save_source: false,
        }
    }

    /// Also keep the kernel source next to every entry written.
    #[must_use]
    pub const fn with_save_source(mut self, enabled: bool) -> Self {
        self.save_source = enabled;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(entry_file_name(key.as_str()))
    }

    /// Path of the optional source file kept beside an entry.
    pub fn source_path(&self, key: &CacheKey) -> PathBuf {
        let mut name = entry_file_name(key.as_str());
        name.push('.');
        name.push_str(SOURCE_EXTENSION);
        self.dir.join(name)
    }

    pub fn ensure_dir(&self) -> Result<(), CompileError> {
        ensure_dir(&self.dir)
    }

    /// Reads and verifies the entry for `key`.
    ///
    /// Missing, short and corrupted entries are all [`Lookup::Miss`]; only
    /// unexpected I/O failures are errors.
    pub fn read(&self, key: &CacheKey) -> Result<Lookup, CompileError> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Lookup::Miss),
            Err(source) => return Err(CompileError::Storage { path, source }),
        };

        match decode_entry(&raw) {
            Some(payload) => Ok(Lookup::Hit(payload.to_vec())),
            None => {
                debug!(path = %path.display(), bytes = raw.len(), "ignoring corrupted cache entry");
                Ok(Lookup::Miss)
            }
        }
    }

    /// Atomically publishes `payload` as the entry for `key`.
    ///
    /// When source saving is enabled `source` is written next to the entry.
    /// That side file is best effort and never fails the write.
    pub fn write(
        &self,
        key: &CacheKey,
        payload: &[u8],
        source: Option<&str>,
    ) -> Result<PathBuf, CompileError> {
        self.ensure_dir()?;
        let path = self.entry_path(key);
        self.publish(&path, &encode_entry(payload))?;
        debug!(path = %path.display(), bytes = payload.len(), "stored cache entry");

        if self.save_source {
            if let Some(source) = source {
                let source_path = self.source_path(key);
                if let Err(err) = self.publish(&source_path, source.as_bytes()) {
                    warn!(path = %source_path.display(), %err, "failed to save kernel source");
                }
            }
        }
        Ok(path)
    }

    fn publish(&self, path: &Path, bytes: &[u8]) -> Result<(), CompileError> {
        let mut staged = tempfile::Builder::new()
            .prefix(".staged-")
            .tempfile_in(&self.dir)
            .map_err(CompileError::storage(&self.dir))?;
        write_all(&mut staged, bytes).map_err(CompileError::storage(staged.path()))?;
        staged.persist(path).map_err(|err| CompileError::Storage {
            path: path.to_path_buf(),
            source: err.error,
        })?;
        Ok(())
    }
}

fn write_all(file: &mut NamedTempFile, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes)?;
    file.flush()
}

/// Digest-prefixed entry bytes for `payload`.
pub fn encode_entry(payload: &[u8]) -> Vec<u8> {
    let digest = digest_hex(payload);
    let mut entry = Vec::with_capacity(digest.len() + payload.len());
    entry.extend_from_slice(digest.as_bytes());
    entry.extend_from_slice(payload);
    entry
}

/// The payload of `entry` if its stored digest matches.
pub fn decode_entry(entry: &[u8]) -> Option<&[u8]> {
    if entry.len() < DIGEST_HEX_LEN {
        return None;
    }
    let (stored, payload) = entry.split_at(DIGEST_HEX_LEN);
    (stored == digest_hex(payload).as_bytes()).then_some(payload)
}
