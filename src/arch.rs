//! Target architecture selection.
//!
//! The compiler refuses code generation above a version-dependent ceiling, so
//! the device capability is clamped to what the installed compiler accepts.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::debug;

use crate::error::CompileError;
use crate::toolchain::{CompilerVersion, Device};

/// Compute capability code, e.g. `70` for 7.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Arch(u32);

impl Arch {
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> u32 {
        self.0
    }

    /// Virtual architecture name, `compute_<arch>`.
    pub fn virtual_name(self) -> String {
        format!("compute_{}", self.0)
    }

    /// Real architecture name, `sm_<arch>`.
    pub fn real_name(self) -> String {
        format!("sm_{}", self.0)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid architecture `{0}`, expected a code such as 70, sm_70 or compute_70")]
pub struct ParseArchError(String);

impl FromStr for Arch {
    type Err = ParseArchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("compute_")
            .or_else(|| trimmed.strip_prefix("sm_"))
            .unwrap_or(trimmed);
        digits
            .parse::<u32>()
            .map(Self)
            .map_err(|_| ParseArchError(s.to_string()))
    }
}

/// Highest architecture a compiler of `version` generates code for.
pub fn max_arch_for(version: CompilerVersion) -> Arch {
    let code = match (version.major, version.minor) {
        (major, _) if major < 9 => 50,
        (9, _) => 70,
        (10, _) => 75,
        (11, 0) => 80,
        (11, minor) if minor < 8 => 86,
        _ => 90,
    };
    Arch(code)
}

/// Resolves the architecture to compile for.
///
/// The ceiling is computed on first use and kept for the life of the
/// resolver; the device is queried on every call.
#[derive(Debug, Default)]
pub struct ArchResolver {
    ceiling: OnceCell<Arch>,
}

impl ArchResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ceiling(
        &self,
        version: impl FnOnce() -> Result<CompilerVersion, CompileError>,
    ) -> Result<Arch, CompileError> {
        self.ceiling
            .get_or_try_init(|| {
                let version = version()?;
                let ceiling = max_arch_for(version);
                debug!(%version, %ceiling, "architecture ceiling resolved");
                Ok(ceiling)
            })
            .copied()
    }

    /// `min(device capability, compiler ceiling)`.
    pub fn resolve(
        &self,
        device: &dyn Device,
        version: impl FnOnce() -> Result<CompilerVersion, CompileError>,
    ) -> Result<Arch, CompileError> {
        let ceiling = self.ceiling(version)?;
        let capability = device.compute_capability().map_err(CompileError::Device)?;
        Ok(capability.min(ceiling))
    }
}
