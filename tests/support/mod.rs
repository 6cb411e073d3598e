#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use kernjit::{
    Arch, CompileOptions, CompilerVersion, Config, EngineError, FixedDevice, KernelCompiler,
    Linker, ProgramHandle, RuntimeCompiler, ToolOutput, ToolRunner, Toolchain,
};
use parking_lot::Mutex;

/// Marker that makes every fake compiler reject a source.
pub const FAIL_MARKER: &str = "#error";

pub const FAKE_DIAGNOSTIC: &str = "kern.cu(1): error: #error directive: boom";

#[derive(Default)]
struct FakeProgram {
    source: String,
    failed: bool,
}

/// In-process compiler that renders assembly from the source and options.
pub struct FakeRuntime {
    version: CompilerVersion,
    next_handle: AtomicU64,
    programs: Mutex<HashMap<u64, FakeProgram>>,
    last_options: Mutex<Vec<String>>,
    pub created: AtomicUsize,
    pub compiled: AtomicUsize,
    pub destroyed: AtomicUsize,
}

impl FakeRuntime {
    pub fn new(version: CompilerVersion) -> Self {
        Self {
            version,
            next_handle: AtomicU64::new(1),
            programs: Mutex::new(HashMap::new()),
            last_options: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            compiled: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        }
    }

    pub fn last_options(&self) -> Vec<String> {
        self.last_options.lock().clone()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.lock().len()
    }
}

impl RuntimeCompiler for FakeRuntime {
    fn version(&self) -> Result<CompilerVersion, EngineError> {
        Ok(self.version)
    }

    fn create_program(
        &self,
        source: &str,
        _name: &str,
        _headers: &[String],
        _include_names: &[String],
    ) -> Result<ProgramHandle, EngineError> {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.programs.lock().insert(
            id,
            FakeProgram {
                source: source.to_string(),
                failed: false,
            },
        );
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(ProgramHandle(id))
    }

    fn compile_program(&self, program: ProgramHandle, options: &[String]) -> Result<(), EngineError> {
        self.compiled.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock() = options.to_vec();
        let mut programs = self.programs.lock();
        let entry = programs
            .get_mut(&program.0)
            .ok_or_else(|| EngineError::new("invalid program handle"))?;
        if entry.source.contains(FAIL_MARKER) {
            entry.failed = true;
            return Err(EngineError::new("NVRTC_ERROR_COMPILATION"));
        }
        Ok(())
    }

    fn assembly(&self, program: ProgramHandle) -> Result<String, EngineError> {
        let programs = self.programs.lock();
        let entry = programs
            .get(&program.0)
            .ok_or_else(|| EngineError::new("invalid program handle"))?;
        Ok(format!(
            "// options: {}\n{}",
            self.last_options.lock().join(" "),
            entry.source
        ))
    }

    fn program_log(&self, program: ProgramHandle) -> String {
        match self.programs.lock().get(&program.0) {
            Some(entry) if entry.failed => FAKE_DIAGNOSTIC.to_string(),
            _ => String::new(),
        }
    }

    fn destroy_program(&self, program: ProgramHandle) {
        self.programs.lock().remove(&program.0);
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Linker that wraps the assembly it is given.
#[derive(Default)]
pub struct FakeLinker {
    pub links: AtomicUsize,
}

impl Linker for FakeLinker {
    fn link(&self, assembly: &str, _name: &str) -> Result<Vec<u8>, EngineError> {
        self.links.fetch_add(1, Ordering::SeqCst);
        if assembly.contains("#link-fail") {
            return Err(EngineError::new("undefined reference to `missing`"));
        }
        Ok(format!("LINKED[{assembly}]").into_bytes())
    }
}

/// Stands in for the external compiler binary and counts its invocations.
pub struct CountingRunner {
    banner: String,
    missing: bool,
    pub binary_runs: AtomicUsize,
    pub assembly_runs: AtomicUsize,
    pub version_runs: AtomicUsize,
    last_cwd: Mutex<Option<PathBuf>>,
}

impl CountingRunner {
    pub fn new() -> Self {
        Self {
            banner: "nvcc: NVIDIA (R) Cuda compiler driver\n\
                     Cuda compilation tools, release 11.8, V11.8.89\n"
                .to_string(),
            missing: false,
            binary_runs: AtomicUsize::new(0),
            assembly_runs: AtomicUsize::new(0),
            version_runs: AtomicUsize::new(0),
            last_cwd: Mutex::new(None),
        }
    }

    /// A runner whose executable does not exist.
    pub fn missing() -> Self {
        Self {
            missing: true,
            ..Self::new()
        }
    }

    pub fn total_runs(&self) -> usize {
        self.binary_runs.load(Ordering::SeqCst)
            + self.assembly_runs.load(Ordering::SeqCst)
            + self.version_runs.load(Ordering::SeqCst)
    }

    pub fn binary_runs(&self) -> usize {
        self.binary_runs.load(Ordering::SeqCst)
    }

    pub fn last_cwd(&self) -> Option<PathBuf> {
        self.last_cwd.lock().clone()
    }
}

impl ToolRunner for CountingRunner {
    fn run(&self, program: &Path, args: &[OsString], cwd: &Path) -> io::Result<ToolOutput> {
        if self.missing {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", program.display()),
            ));
        }
        if args.len() == 1 && args[0] == "--version" {
            self.version_runs.fetch_add(1, Ordering::SeqCst);
            return Ok(ToolOutput {
                success: true,
                code: Some(0),
                output: self.banner.clone().into_bytes(),
            });
        }

        *self.last_cwd.lock() = Some(cwd.to_path_buf());
        let kind = args[0].to_string_lossy().trim_start_matches("--").to_string();
        match kind.as_str() {
            "cubin" => self.binary_runs.fetch_add(1, Ordering::SeqCst),
            _ => self.assembly_runs.fetch_add(1, Ordering::SeqCst),
        };

        let source_path = PathBuf::from(&args[args.len() - 1]);
        let source = fs::read_to_string(&source_path)?;
        if source.contains(FAIL_MARKER) {
            return Ok(ToolOutput {
                success: false,
                code: Some(1),
                output: format!("{FAKE_DIAGNOSTIC}\n").into_bytes(),
            });
        }

        let flags: Vec<String> = args[1..args.len() - 1]
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        let artifact = format!("{kind}[{}]{source}", flags.join(" "));
        fs::write(source_path.with_extension(&kind), artifact)?;
        Ok(ToolOutput {
            success: true,
            code: Some(0),
            output: Vec::new(),
        })
    }
}

/// Writer whose bytes stay readable after it is handed away.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Fake collaborators plus a private cache directory.
pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub linker: Arc<FakeLinker>,
    pub runner: Arc<CountingRunner>,
    pub device: Arch,
    pub cache: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_runner(CountingRunner::new())
    }

    pub fn with_runner(runner: CountingRunner) -> Self {
        Self {
            runtime: Arc::new(FakeRuntime::new(CompilerVersion::new(11, 8))),
            linker: Arc::new(FakeLinker::default()),
            runner: Arc::new(runner),
            device: Arch::new(75),
            cache: tempfile::Builder::new()
                .prefix("kernjit-cache-test")
                .tempdir()
                .expect("failed to create temp dir"),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache.path()
    }

    pub fn config(&self) -> Config {
        Config::default()
            .with_cache_dir(self.cache_dir())
            .with_external_tool("nvcc")
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain::external(Arc::new(FixedDevice(self.device)))
            .with_runtime(self.runtime.clone(), self.linker.clone())
            .with_runner(self.runner.clone())
    }

    pub fn compiler(&self) -> KernelCompiler {
        KernelCompiler::new(self.config(), self.toolchain())
    }

    pub fn compiler_with(&self, config: Config) -> KernelCompiler {
        KernelCompiler::new(config, self.toolchain())
    }

    /// File names of published cache entries.
    pub fn entries(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.cache_dir())
            .map(|dir| {
                dir.filter_map(Result::ok)
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .filter(|name| name.ends_with("_2.cubin"))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

pub fn options(flags: &[&str]) -> CompileOptions {
    flags.iter().copied().collect()
}
