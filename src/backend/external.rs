use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use super::{CompiledArtifact, KernelBackend, ScratchDir};
use crate::arch::Arch;
use crate::error::{CompileError, CompileException};
use crate::options::CompileOptions;
use crate::toolchain::{CompilerVersion, ToolRunner};

/// Artifact kinds the external toolchain is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    /// Fully linked, device-loadable module.
    Binary,
    /// Assembly text that still needs a link step.
    Assembly,
}

impl OutputKind {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Binary => "cubin",
            Self::Assembly => "ptx",
        }
    }

    fn flag(self) -> String {
        format!("--{}", self.extension())
    }
}

impl FromStr for OutputKind {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cubin" => Ok(Self::Binary),
            "ptx" => Ok(Self::Assembly),
            other => Err(CompileError::Precondition(format!(
                "output kind must be one of (cubin, ptx), got `{other}`"
            ))),
        }
    }
}

/// Compiles by running the external toolchain as a subprocess.
///
/// Every call works in a fresh scratch directory; the backend keeps no state
/// between calls.
pub struct ExternalToolBackend<'a> {
    executable: &'a Path,
    runner: &'a dyn ToolRunner,
}

impl<'a> ExternalToolBackend<'a> {
    pub fn new(executable: &'a Path, runner: &'a dyn ToolRunner) -> Self {
        Self { executable, runner }
    }

    /// Like [`Self::compile_to`], with the kind given by name. Unknown kinds
    /// are rejected before anything is launched.
    pub fn compile_kind(
        &self,
        source: &str,
        options: &CompileOptions,
        arch: Arch,
        file_name: &str,
        kind: &str,
    ) -> Result<CompiledArtifact, CompileError> {
        let kind = kind.parse::<OutputKind>()?;
        self.compile_to(source, options, arch, file_name, kind)
    }

    /// Writes `source` to `<stem>.cu` in a scratch directory, runs the tool
    /// there and reads back `<stem>.<kind>`. `<stem>` is `file_name` up to
    /// its first `.`.
    pub fn compile_to(
        &self,
        source: &str,
        options: &CompileOptions,
        arch: Arch,
        file_name: &str,
        kind: OutputKind,
    ) -> Result<CompiledArtifact, CompileError> {
        let stem = file_name.split('.').next().unwrap_or(file_name);
        let scratch = ScratchDir::new().map_err(CompileError::storage(std::env::temp_dir()))?;

        scratch.run(|dir| {
            let source_path = dir.join(format!("{stem}.cu"));
            let result_path = dir.join(format!("{stem}.{}", kind.extension()));
            fs::write(&source_path, source).map_err(CompileError::storage(&source_path))?;

            let mut args: Vec<OsString> = Vec::with_capacity(options.len() + 3);
            args.push(kind.flag().into());
            args.push(gencode_flag(arch).into());
            args.extend(options.iter().map(OsString::from));
            args.push(source_path.clone().into_os_string());

            self.invoke(&args, dir).map_err(|failure| match failure {
                Invocation::NotLaunched(err) => err,
                Invocation::Failed(message) => CompileError::ToolFailed(CompileException::new(
                    message,
                    source,
                    source_path.to_string_lossy(),
                    options.as_slice(),
                )),
            })?;

            let bytes = fs::read(&result_path).map_err(CompileError::storage(&result_path))?;
            match kind {
                OutputKind::Binary => Ok(CompiledArtifact::Binary(bytes)),
                OutputKind::Assembly => String::from_utf8(bytes)
                    .map(CompiledArtifact::Assembly)
                    .map_err(|err| CompileError::Storage {
                        path: result_path.clone(),
                        source: io::Error::new(io::ErrorKind::InvalidData, err),
                    }),
            }
        })
    }

    /// Asks the tool for its release version.
    pub fn version(&self) -> Result<CompilerVersion, CompileError> {
        let cwd = std::env::temp_dir();
        let args = [OsString::from("--version")];
        let banner = self.invoke(&args, &cwd).map_err(|failure| match failure {
            Invocation::NotLaunched(err) => err,
            Invocation::Failed(message) => {
                CompileError::ToolFailed(CompileException::new(message, "", "--version", &[]))
            }
        })?;
        CompilerVersion::parse_release(&banner).ok_or_else(|| {
            CompileError::Precondition(format!(
                "could not read a release version from `{} --version`: {}",
                self.executable.display(),
                banner.trim()
            ))
        })
    }

    fn invoke(&self, args: &[OsString], cwd: &Path) -> Result<String, Invocation> {
        let tool = self.executable.display().to_string();
        debug!(%tool, ?args, cwd = %cwd.display(), "invoking external compiler");

        let output = self.runner.run(self.executable, args, cwd).map_err(|source| {
            Invocation::NotLaunched(CompileError::ToolNotFound {
                tool: tool.clone(),
                source,
            })
        })?;
        let text = String::from_utf8_lossy(&output.output).into_owned();
        if output.success {
            return Ok(text);
        }

        let command = std::iter::once(tool.clone())
            .chain(args.iter().map(|arg| arg.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ");
        let code = output
            .code
            .map_or_else(|| "terminated by signal".to_string(), |code| code.to_string());
        Err(Invocation::Failed(format!(
            "`{tool}` command returns non-zero exit status.\n\
             command: {command}\n\
             return-code: {code}\n\
             stdout/stderr:\n{text}"
        )))
    }
}

enum Invocation {
    NotLaunched(CompileError),
    Failed(String),
}

fn gencode_flag(arch: Arch) -> String {
    format!(
        "-gencode=arch={},code={}",
        arch.virtual_name(),
        arch.real_name()
    )
}

impl KernelBackend for ExternalToolBackend<'_> {
    fn preprocess(
        &self,
        source: &str,
        options: &CompileOptions,
        arch: Arch,
    ) -> Result<String, CompileError> {
        self.compile_to(source, options, arch, "preprocess.cu", OutputKind::Assembly)?
            .into_assembly()
            .ok_or_else(|| CompileError::Precondition("tool returned a binary for a ptx request".into()))
    }

    fn compile(
        &self,
        source: &str,
        options: &CompileOptions,
        arch: Arch,
        file_name: &str,
    ) -> Result<CompiledArtifact, CompileError> {
        self.compile_to(source, options, arch, file_name, OutputKind::Binary)
    }
}
