//! Seams to the native compiler stack.
//!
//! The compiler engines, the linker, the device query and the module loader
//! are consumed as opaque capabilities. Tests substitute fakes for every one
//! of them.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::arch::Arch;
use crate::error::EngineError;

/// `(major, minor)` version of the installed compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompilerVersion {
    pub major: u32,
    pub minor: u32,
}

impl CompilerVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Extracts the version from toolchain banner text containing
    /// `release X.Y`, as printed by `nvcc --version`.
    pub fn parse_release(banner: &str) -> Option<Self> {
        let (_, rest) = banner.split_once("release ")?;
        let number: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let (major, minor) = number.split_once('.')?;
        Some(Self::new(major.parse().ok()?, minor.parse().ok()?))
    }
}

impl fmt::Display for CompilerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Reports the compute capability of the active device.
pub trait Device: Send + Sync {
    fn compute_capability(&self) -> Result<Arch, EngineError>;
}

/// A device whose capability is known up front.
#[derive(Debug, Clone, Copy)]
pub struct FixedDevice(pub Arch);

impl Device for FixedDevice {
    fn compute_capability(&self) -> Result<Arch, EngineError> {
        Ok(self.0)
    }
}

/// Opaque handle to a program owned by a [`RuntimeCompiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

/// An in-process compiler producing assembly text.
pub trait RuntimeCompiler: Send + Sync {
    fn version(&self) -> Result<CompilerVersion, EngineError>;

    fn create_program(
        &self,
        source: &str,
        name: &str,
        headers: &[String],
        include_names: &[String],
    ) -> Result<ProgramHandle, EngineError>;

    /// On failure the diagnostic is available from [`Self::program_log`].
    fn compile_program(&self, program: ProgramHandle, options: &[String]) -> Result<(), EngineError>;

    fn assembly(&self, program: ProgramHandle) -> Result<String, EngineError>;

    fn program_log(&self, program: ProgramHandle) -> String;

    /// Must be called exactly once per created program.
    fn destroy_program(&self, program: ProgramHandle);
}

/// Combines assembly text into a device-loadable binary.
pub trait Linker: Send + Sync {
    fn link(&self, assembly: &str, name: &str) -> Result<Vec<u8>, EngineError>;
}

/// Turns a verified binary into whatever the caller executes.
pub trait ModuleLoader {
    type Module;

    fn load(&self, binary: &[u8]) -> Result<Self::Module, EngineError>;
}

/// Loader that hands the binary back unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryLoader;

impl ModuleLoader for BinaryLoader {
    type Module = Vec<u8>;

    fn load(&self, binary: &[u8]) -> Result<Self::Module, EngineError> {
        Ok(binary.to_vec())
    }
}

/// Exit state and merged stdout/stderr of an external tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub output: Vec<u8>,
}

/// Runs an external executable synchronously.
///
/// An `Err` means the process could not be launched at all.
pub trait ToolRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[OsString], cwd: &Path) -> io::Result<ToolOutput>;
}

/// Spawns real processes, with stderr folded into stdout.
///
/// There is no timeout: a hung tool blocks the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, program: &Path, args: &[OsString], cwd: &Path) -> io::Result<ToolOutput> {
        // a `&Path` would be dotified to `./nvcc`, skipping the `PATH` search
        let output = duct::cmd(program.as_os_str(), args)
            .dir(cwd)
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked()
            .run()?;
        Ok(ToolOutput {
            success: output.status.success(),
            code: output.status.code(),
            output: output.stdout,
        })
    }
}

/// The collaborators a [`KernelCompiler`](crate::KernelCompiler) drives.
#[derive(Clone)]
pub struct Toolchain {
    pub device: Arc<dyn Device>,
    pub runtime: Option<Arc<dyn RuntimeCompiler>>,
    pub linker: Option<Arc<dyn Linker>>,
    pub runner: Arc<dyn ToolRunner>,
}

impl Toolchain {
    /// A toolchain with only the external compiler available.
    pub fn external(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            runtime: None,
            linker: None,
            runner: Arc::new(ProcessRunner),
        }
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn RuntimeCompiler>, linker: Arc<dyn Linker>) -> Self {
        self.runtime = Some(runtime);
        self.linker = Some(linker);
        self
    }

    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn ToolRunner>) -> Self {
        self.runner = runner;
        self
    }
}
