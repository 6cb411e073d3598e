//! Just-in-time compilation of device kernels with a persistent,
//! content-addressed cache.
//!
//! Kernel source synthesised at runtime is compiled either by an in-process
//! compiler (assembly text, then a link step) or by an external toolchain
//! (binary directly). The linked binary is stored under a key derived from
//! the compile environment, a compiler baseline and the source, so repeated
//! requests skip the compiler entirely.

pub mod arch;
pub mod backend;
pub mod cache;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod error;
pub mod options;
pub mod toolchain;

pub use arch::{Arch, ArchResolver};
pub use backend::{Backend, CompiledArtifact, OutputKind};
pub use cache::{CacheKey, CacheStore, Lookup};
pub use compiler::{CompileRequest, KernelCompiler, LoadedKernel, Origin, is_valid_kernel_name};
pub use config::Config;
pub use error::{CompileError, CompileException, EngineError};
pub use options::CompileOptions;
pub use toolchain::{
    BinaryLoader, CompilerVersion, Device, FixedDevice, Linker, ModuleLoader, ProcessRunner,
    ProgramHandle, RuntimeCompiler, ToolOutput, ToolRunner, Toolchain,
};
