//! Cached kernel compilation.
//!
//! [`KernelCompiler::get_or_compile`] resolves the architecture, derives the
//! cache key, and either loads a verified cache entry or compiles, persists
//! and loads a fresh one. Whichever backend produced an entry, the cache only
//! ever holds the linked binary.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::arch::{Arch, ArchResolver};
use crate::backend::{
    Backend, CompiledArtifact, ExternalToolBackend, InProcessBackend, KernelBackend,
};
use crate::cache::{
    BaselineCache, CacheKey, CacheStore, CompileEnv, Lookup, build_key, entry_file_name,
};
use crate::config::Config;
use crate::error::{CompileError, CompileException};
use crate::options::CompileOptions;
use crate::toolchain::{CompilerVersion, ModuleLoader, Toolchain};

/// Name given to assembly text handed to the linker.
const LINK_INPUT_NAME: &str = "kernjit.ptx";

/// Everything that identifies one compilation.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub source: &'a str,
    pub options: CompileOptions,
    /// Resolved from the device when absent.
    pub arch: Option<Arch>,
    /// Defaults to the configured cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Only folded into the cache key, never compiled.
    pub extra_source: Option<&'a str>,
    pub backend: Backend,
}

impl<'a> CompileRequest<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            options: CompileOptions::new(),
            arch: None,
            cache_dir: None,
            extra_source: None,
            backend: Backend::InProcess,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = Some(arch);
        self
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn with_extra_source(mut self, extra: &'a str) -> Self {
        self.extra_source = Some(extra);
        self
    }

    #[must_use]
    pub const fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    CacheHit,
    Compiled,
}

/// A loaded module plus where it came from.
#[derive(Debug)]
pub struct LoadedKernel<M> {
    pub module: M,
    pub key: CacheKey,
    pub path: PathBuf,
    pub origin: Origin,
}

/// Compiles kernels through an on-disk cache.
///
/// Holds the process-lifetime state: the compiler version, the architecture
/// ceiling and the baseline per compile environment. Independent instances
/// share nothing but the cache directory, which is safe to use concurrently.
pub struct KernelCompiler {
    config: Config,
    toolchain: Toolchain,
    arch: ArchResolver,
    version: OnceCell<CompilerVersion>,
    baselines: BaselineCache,
    dump_sink: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for KernelCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelCompiler")
            .field("config", &self.config)
            .field("version", &self.version.get())
            .field("baselines", &self.baselines.len())
            .finish_non_exhaustive()
    }
}

impl KernelCompiler {
    /// Source dumps go to stderr unless [`Self::with_dump_sink`] says otherwise.
    pub fn new(config: Config, toolchain: Toolchain) -> Self {
        Self {
            config,
            toolchain,
            arch: ArchResolver::new(),
            version: OnceCell::new(),
            baselines: BaselineCache::new(),
            dump_sink: Mutex::new(Box::new(io::stderr())),
        }
    }

    /// Where diagnostics are dumped when `dump_source_on_error` is set.
    #[must_use]
    pub fn with_dump_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.dump_sink = Mutex::new(Box::new(sink));
        self
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn baselines(&self) -> &BaselineCache {
        &self.baselines
    }

    /// Version of the in-process compiler, or of the external tool when no
    /// in-process compiler is available. Probed once.
    pub fn compiler_version(&self) -> Result<CompilerVersion, CompileError> {
        self.version
            .get_or_try_init(|| match &self.toolchain.runtime {
                Some(runtime) => runtime.version().map_err(CompileError::Runtime),
                None => self.external().version(),
            })
            .copied()
    }

    /// Device capability clamped to the compiler's ceiling.
    pub fn resolve_arch(&self) -> Result<Arch, CompileError> {
        self.arch
            .resolve(self.toolchain.device.as_ref(), || self.compiler_version())
    }

    /// `options` followed by the flags every compile carries.
    pub fn expand_options(&self, options: &CompileOptions) -> CompileOptions {
        options.with_forced_flags(self.config.compile_with_debug)
    }

    /// Derives the cache key for `source` compiled with the user `options`.
    pub fn build_key(
        &self,
        source: &str,
        options: &CompileOptions,
        arch: Arch,
        backend: Backend,
        extra_source: Option<&str>,
    ) -> Result<CacheKey, CompileError> {
        let expanded = self.expand_options(options);
        self.key_for(source, expanded, arch, backend, extra_source)
    }

    /// Returns the loaded module for `request`, compiling only on a cache miss.
    pub fn get_or_compile<L: ModuleLoader>(
        &self,
        request: &CompileRequest<'_>,
        loader: &L,
    ) -> Result<LoadedKernel<L::Module>, CompileError> {
        let arch = match request.arch {
            Some(arch) => arch,
            None => self.resolve_arch()?,
        };
        let options = self.expand_options(&request.options);
        let key = self.key_for(
            request.source,
            options.clone(),
            arch,
            request.backend,
            request.extra_source,
        )?;

        let store = self.store(request.cache_dir.as_deref());
        store.ensure_dir()?;
        let path = store.entry_path(&key);

        if let Lookup::Hit(binary) = store.read(&key)? {
            debug!(%key, "kernel cache hit");
            let module = loader.load(&binary).map_err(CompileError::Load)?;
            return Ok(LoadedKernel {
                module,
                key,
                path,
                origin: Origin::CacheHit,
            });
        }

        info!(
            %key,
            backend = %request.backend,
            %arch,
            options = %options.joined(),
            "kernel cache miss, compiling"
        );
        let file_name = format!("{}.cu", entry_file_name(key.as_str()));
        let binary = self.compile_binary(request.backend, request.source, &options, arch, &file_name)?;
        store.write(&key, &binary, Some(request.source))?;

        let module = loader.load(&binary).map_err(CompileError::Load)?;
        Ok(LoadedKernel {
            module,
            key,
            path,
            origin: Origin::Compiled,
        })
    }

    /// Compiles `source` with the in-process compiler and returns assembly
    /// text. No cache is involved and no forced flags are added.
    pub fn compile_using_in_process(
        &self,
        source: &str,
        options: &CompileOptions,
        arch: Option<Arch>,
        file_name: &str,
    ) -> Result<String, CompileError> {
        let arch = match arch {
            Some(arch) => arch,
            None => self.resolve_arch()?,
        };
        let artifact = self
            .in_process()?
            .compile(source, options, arch, file_name)
            .map_err(|err| self.report(err))?;
        artifact.into_assembly().ok_or_else(|| {
            CompileError::Precondition("in-process compiler returned a binary".to_string())
        })
    }

    /// Compiles `source` with the external toolchain to the artifact kind
    /// named by `kind` (`cubin` or `ptx`). No cache is involved.
    pub fn compile_using_external(
        &self,
        source: &str,
        options: &CompileOptions,
        arch: Option<Arch>,
        file_name: &str,
        kind: &str,
    ) -> Result<CompiledArtifact, CompileError> {
        let arch = match arch {
            Some(arch) => arch,
            None => self.resolve_arch()?,
        };
        self.external()
            .compile_kind(source, options, arch, file_name, kind)
            .map_err(|err| self.report(err))
    }

    fn key_for(
        &self,
        source: &str,
        options: CompileOptions,
        arch: Arch,
        backend: Backend,
        extra_source: Option<&str>,
    ) -> Result<CacheKey, CompileError> {
        let env = CompileEnv {
            arch,
            options,
            compiler_version: self.compiler_version()?,
            backend,
        };
        let baseline = self.baselines.get_or_compute(&env, || {
            self.backend(backend)?
                .preprocess("", &env.options, arch)
                .map_err(|err| self.report(err))
        })?;
        Ok(build_key(&env, &baseline, source, extra_source))
    }

    fn compile_binary(
        &self,
        backend: Backend,
        source: &str,
        options: &CompileOptions,
        arch: Arch,
        file_name: &str,
    ) -> Result<Vec<u8>, CompileError> {
        let artifact = self
            .backend(backend)?
            .compile(source, options, arch, file_name)
            .map_err(|err| self.report(err))?;

        match artifact {
            CompiledArtifact::Binary(binary) => Ok(binary),
            CompiledArtifact::Assembly(assembly) => {
                let linker = self.toolchain.linker.as_deref().ok_or_else(|| {
                    CompileError::Precondition("no linker available for assembly output".to_string())
                })?;
                linker.link(&assembly, LINK_INPUT_NAME).map_err(|err| {
                    self.report(CompileError::Link(CompileException::new(
                        err.0,
                        source,
                        file_name,
                        options.as_slice(),
                    )))
                })
            }
        }
    }

    fn backend(&self, backend: Backend) -> Result<Box<dyn KernelBackend + '_>, CompileError> {
        match backend {
            Backend::InProcess => Ok(Box::new(self.in_process()?)),
            Backend::ExternalTool => Ok(Box::new(self.external())),
        }
    }

    fn in_process(&self) -> Result<InProcessBackend<'_>, CompileError> {
        self.toolchain
            .runtime
            .as_deref()
            .map(InProcessBackend::new)
            .ok_or_else(|| {
                CompileError::Precondition("the in-process compiler is not available".to_string())
            })
    }

    fn external(&self) -> ExternalToolBackend<'_> {
        ExternalToolBackend::new(&self.config.external_tool, self.toolchain.runner.as_ref())
    }

    fn store(&self, cache_dir: Option<&Path>) -> CacheStore {
        CacheStore::new(cache_dir.unwrap_or(&self.config.cache_dir))
            .with_save_source(self.config.save_source)
    }

    /// Dumps the diagnostic to the dump sink when configured, then hands the
    /// error back.
    fn report(&self, err: CompileError) -> CompileError {
        if self.config.dump_source_on_error {
            if let Some(exception) = err.exception() {
                let mut sink = self.dump_sink.lock();
                if let Err(io_err) = exception.dump(&mut **sink) {
                    warn!(%io_err, "failed to dump kernel source");
                }
            }
        }
        err
    }
}

/// Whether `name` can be used as a kernel entry-point identifier.
pub fn is_valid_kernel_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
