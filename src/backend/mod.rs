//! The two compilation paths behind one capability.
//!
//! The in-process compiler yields assembly text that still needs linking;
//! the external toolchain writes the requested artifact kind directly.

mod external;
mod in_process;
mod scratch;

use std::fmt;
use std::str::FromStr;

pub use external::{ExternalToolBackend, OutputKind};
pub use in_process::{InProcessBackend, Program};
pub use scratch::ScratchDir;

use crate::arch::Arch;
use crate::error::CompileError;
use crate::options::CompileOptions;

/// Which compiler produces an artifact. Part of every cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    InProcess,
    ExternalTool,
}

impl Backend {
    /// Stable tag folded into cache keys.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::InProcess => "nvrtc",
            Self::ExternalTool => "nvcc",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Backend {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nvrtc" | "in-process" => Ok(Self::InProcess),
            "nvcc" | "external" => Ok(Self::ExternalTool),
            other => Err(CompileError::Precondition(format!(
                "invalid backend `{other}`, expected nvrtc or nvcc"
            ))),
        }
    }
}

/// Output of a backend compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledArtifact {
    Assembly(String),
    Binary(Vec<u8>),
}

impl CompiledArtifact {
    pub fn into_assembly(self) -> Option<String> {
        match self {
            Self::Assembly(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

/// Capability shared by both compilation paths.
pub trait KernelBackend {
    /// Compiles `source` to assembly text. Used for the cache-key baseline.
    fn preprocess(
        &self,
        source: &str,
        options: &CompileOptions,
        arch: Arch,
    ) -> Result<String, CompileError>;

    /// Compiles `source` for a cache entry. `file_name` names the scratch
    /// source file the compiler sees.
    fn compile(
        &self,
        source: &str,
        options: &CompileOptions,
        arch: Arch,
        file_name: &str,
    ) -> Result<CompiledArtifact, CompileError>;
}
