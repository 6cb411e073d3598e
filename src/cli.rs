use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use tracing::debug;

use crate::arch::Arch;
use crate::backend::Backend;
use crate::compiler::{CompileRequest, KernelCompiler, LoadedKernel, Origin};
use crate::config::Config;
use crate::options::CompileOptions;
use crate::toolchain::{BinaryLoader, FixedDevice, Toolchain};

/// Marker in the summary error returned when any kernel failed to build.
pub const BUILD_FAILED: &str = "kernel(s) failed to build";

#[derive(Parser, Debug)]
#[command(name = "kernjit", version, about = "Device kernel compiler with a persistent cache")]
pub struct KernjitCli {
    #[command(subcommand)]
    command: Command,
}

impl KernjitCli {
    pub const fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compiles kernel sources to binaries, reusing cached entries.
    Build(BuildArgs),
    /// Prints the cache directory in effect.
    CacheDir,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Kernel source files.
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// Target architecture, e.g. 70, sm_70 or compute_70. Clamped to what the compiler supports.
    #[arg(long)]
    pub arch: Arch,

    /// Compiler backend. Only `nvcc` is available from the command line.
    #[arg(long, default_value = "nvcc")]
    pub backend: Backend,

    /// Extra compiler option, may be repeated.
    #[arg(short = 'X', long = "option", allow_hyphen_values = true)]
    pub options: Vec<String>,

    /// File whose contents are folded into every cache key but never compiled.
    #[arg(long)]
    pub extra_source: Option<PathBuf>,

    /// Where `<stem>.cubin` files are written.
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Overrides `KERNJIT_CACHE_DIR`.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

pub fn run() -> Result<()> {
    kernjit_utils::logger::init_logging();
    let cli = KernjitCli::parse();
    match cli.command() {
        Command::Build(args) => handle_build(args),
        Command::CacheDir => {
            println!("{}", Config::from_env().cache_dir.display());
            Ok(())
        }
    }
}

fn handle_build(args: &BuildArgs) -> Result<()> {
    if args.backend == Backend::InProcess {
        bail!("the in-process compiler is not available from the command line, use --backend nvcc");
    }

    let mut config = Config::from_env();
    if let Some(dir) = &args.cache_dir {
        config = config.with_cache_dir(dir);
    }
    let toolchain = Toolchain::external(Arc::new(FixedDevice(args.arch)));
    let compiler = KernelCompiler::new(config, toolchain);

    let arch = compiler
        .resolve_arch()
        .context("failed to determine the target architecture")?;
    if arch != args.arch {
        println!(
            "{} sm_{} is above what the compiler supports, using {}",
            "note".yellow().bold(),
            args.arch,
            arch.real_name()
        );
    }

    let extra_source = args
        .extra_source
        .as_deref()
        .map(read_source)
        .transpose()?;
    let options: CompileOptions = args.options.iter().cloned().collect();

    fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            args.output_dir.display()
        )
    })?;

    let results: Vec<(&PathBuf, Result<(PathBuf, LoadedKernel<Vec<u8>>)>)> = args
        .sources
        .par_iter()
        .map(|path| {
            let request = BuildRequest {
                path,
                arch,
                backend: args.backend,
                options: &options,
                extra_source: extra_source.as_deref(),
                output_dir: &args.output_dir,
            };
            (path, build_one(&compiler, &request))
        })
        .collect();

    let mut failures = 0usize;
    for (path, result) in results {
        match result {
            Ok((output, kernel)) => {
                let status = match kernel.origin {
                    Origin::CacheHit => "cache hit".green().bold(),
                    Origin::Compiled => "compiled".cyan().bold(),
                };
                println!(
                    "{status} {} -> {} ({} bytes)",
                    path.display(),
                    output.display(),
                    kernel.module.len()
                );
            }
            Err(err) => {
                failures += 1;
                eprintln!("{} {}: {err:#}", "error".red().bold(), path.display());
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} {BUILD_FAILED}", args.sources.len());
    }
    Ok(())
}

struct BuildRequest<'a> {
    path: &'a Path,
    arch: Arch,
    backend: Backend,
    options: &'a CompileOptions,
    extra_source: Option<&'a str>,
    output_dir: &'a Path,
}

fn build_one(
    compiler: &KernelCompiler,
    request: &BuildRequest<'_>,
) -> Result<(PathBuf, LoadedKernel<Vec<u8>>)> {
    let source = read_source(request.path)?;
    let mut compile = CompileRequest::new(&source)
        .with_options(request.options.clone())
        .with_arch(request.arch)
        .with_backend(request.backend);
    if let Some(extra) = request.extra_source {
        compile = compile.with_extra_source(extra);
    }

    let kernel = compiler
        .get_or_compile(&compile, &BinaryLoader)
        .with_context(|| format!("failed to build {}", request.path.display()))?;
    debug!(key = %kernel.key, entry = %kernel.path.display(), "kernel ready");

    let output = output_path(request.path, request.output_dir);
    fs::write(&output, &kernel.module)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok((output, kernel))
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn output_path(source: &Path, output_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map_or_else(|| "kernel".into(), |stem| stem.to_string_lossy());
    output_dir.join(format!("{stem}.cubin"))
}
