use std::fs;

use tracing::debug;

use super::{CompiledArtifact, KernelBackend, ScratchDir};
use crate::arch::Arch;
use crate::error::{CompileError, CompileException};
use crate::options::CompileOptions;
use crate::toolchain::{ProgramHandle, RuntimeCompiler};

/// A program held by the in-process compiler.
///
/// The underlying handle is destroyed exactly once, either by an explicit
/// [`Program::release`] or on drop. Further releases are no-ops.
pub struct Program<'a> {
    compiler: &'a dyn RuntimeCompiler,
    handle: Option<ProgramHandle>,
    source: String,
    name: String,
}

impl<'a> Program<'a> {
    pub fn create(
        compiler: &'a dyn RuntimeCompiler,
        source: &str,
        name: &str,
        headers: &[String],
        include_names: &[String],
    ) -> Result<Self, CompileError> {
        if headers.len() != include_names.len() {
            return Err(CompileError::Precondition(format!(
                "{} header sources given for {} include names",
                headers.len(),
                include_names.len()
            )));
        }
        let handle = compiler
            .create_program(source, name, headers, include_names)
            .map_err(|err| CompileError::Compile(CompileException::new(err.0, source, name, &[])))?;
        Ok(Self {
            compiler,
            handle: Some(handle),
            source: source.to_string(),
            name: name.to_string(),
        })
    }

    /// Compiles the program and returns its assembly text. May be called
    /// repeatedly until the program is released.
    pub fn compile(&mut self, options: &[String]) -> Result<String, CompileError> {
        let handle = self.handle.ok_or_else(|| {
            CompileError::Precondition(format!("program `{}` was already released", self.name))
        })?;
        self.compiler
            .compile_program(handle, options)
            .and_then(|()| self.compiler.assembly(handle))
            .map_err(|err| {
                let log = self.compiler.program_log(handle);
                let message = if log.trim().is_empty() { err.0 } else { log };
                CompileError::Compile(CompileException::new(
                    message,
                    self.source.as_str(),
                    self.name.as_str(),
                    options,
                ))
            })
    }

    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.compiler.destroy_program(handle);
        }
    }

    pub const fn is_released(&self) -> bool {
        self.handle.is_none()
    }
}

impl Drop for Program<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Compiles through a [`RuntimeCompiler`] living in this process.
pub struct InProcessBackend<'a> {
    compiler: &'a dyn RuntimeCompiler,
}

impl<'a> InProcessBackend<'a> {
    pub fn new(compiler: &'a dyn RuntimeCompiler) -> Self {
        Self { compiler }
    }

    fn flags(options: &CompileOptions, arch: Arch) -> Vec<String> {
        let mut flags = options.as_slice().to_vec();
        flags.push(format!("-arch={}", arch.virtual_name()));
        flags
    }
}

impl KernelBackend for InProcessBackend<'_> {
    fn preprocess(
        &self,
        source: &str,
        options: &CompileOptions,
        arch: Arch,
    ) -> Result<String, CompileError> {
        let mut program = Program::create(self.compiler, source, "", &[], &[])?;
        program.compile(&Self::flags(options, arch))
    }

    fn compile(
        &self,
        source: &str,
        options: &CompileOptions,
        arch: Arch,
        file_name: &str,
    ) -> Result<CompiledArtifact, CompileError> {
        let flags = Self::flags(options, arch);
        let scratch = ScratchDir::new().map_err(CompileError::storage(std::env::temp_dir()))?;
        let assembly = scratch.run(|dir| {
            let path = dir.join(file_name);
            fs::write(&path, source).map_err(CompileError::storage(&path))?;
            let name = path.to_string_lossy();
            debug!(program = %name, "compiling in process");
            let mut program = Program::create(self.compiler, source, &name, &[], &[])?;
            program.compile(&flags)
        })?;
        Ok(CompiledArtifact::Assembly(assembly))
    }
}
