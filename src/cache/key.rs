//! Cache-key derivation.
//!
//! A key covers the compile environment, the baseline (what the compiler
//! makes of an empty source in that environment), the kernel source and any
//! extra source text. Folding in the baseline invalidates entries whenever the
//! compiler starts behaving differently, even if nothing else changed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::arch::Arch;
use crate::backend::Backend;
use crate::error::CompileError;
use crate::options::CompileOptions;
use crate::toolchain::CompilerVersion;

/// Width of a hex-rendered SHA-1 digest.
pub const DIGEST_HEX_LEN: usize = 40;

/// Lowercase hex SHA-1 of `bytes`.
pub fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha1::digest(bytes))
}

/// Everything about a compilation except the source itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompileEnv {
    pub arch: Arch,
    /// User options followed by the forced flags.
    pub options: CompileOptions,
    pub compiler_version: CompilerVersion,
    pub backend: Backend,
}

impl fmt::Display for CompileEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {:?}, ({}, {}), {:?})",
            self.arch,
            self.options.as_slice(),
            self.compiler_version.major,
            self.compiler_version.minor,
            self.backend.tag()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest of the deterministic rendering of all key inputs.
pub fn build_key(
    env: &CompileEnv,
    baseline: &str,
    source: &str,
    extra_source: Option<&str>,
) -> CacheKey {
    let material = format!("{env} {baseline} {source} {extra_source:?}");
    CacheKey(digest_hex(material.as_bytes()))
}

/// Baselines already computed in this process, one per environment.
///
/// Never evicted; the number of distinct environments a process uses is small.
#[derive(Debug, Default)]
pub struct BaselineCache {
    entries: Mutex<HashMap<CompileEnv, Arc<str>>>,
}

impl BaselineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored baseline for `env`, running `compute` on first use.
    ///
    /// The lock is not held while compiling; two threads may both compute the
    /// same baseline, and the first one stored wins.
    pub fn get_or_compute(
        &self,
        env: &CompileEnv,
        compute: impl FnOnce() -> Result<String, CompileError>,
    ) -> Result<Arc<str>, CompileError> {
        if let Some(found) = self.entries.lock().get(env) {
            return Ok(Arc::clone(found));
        }
        let baseline: Arc<str> = compute()?.into();
        debug!(%env, bytes = baseline.len(), "computed compiler baseline");
        let mut entries = self.entries.lock();
        Ok(Arc::clone(entries.entry(env.clone()).or_insert(baseline)))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
