//! Error taxonomy for kernel compilation.
//!
//! Compile, link and tool diagnostics always surface to the caller. A
//! missing or corrupted cache entry is not an error at all: the cache store
//! reports it as [`Lookup::Miss`](crate::cache::Lookup).

use std::io::{self, Write};
use std::path::PathBuf;

use kernjit_utils::listing;
use thiserror::Error;

/// Failure reported by an opaque collaborator such as the device query,
/// the in-process compiler engine, the linker or the module loader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A compiler diagnostic together with the inputs that produced it.
///
/// The generated kernel source is normally never seen by the caller, so the
/// exception keeps the full text around for [`CompileException::dump`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CompileException {
    message: String,
    source_text: String,
    name: String,
    options: Vec<String>,
}

impl CompileException {
    pub fn new(
        message: impl Into<String>,
        source_text: impl Into<String>,
        name: impl Into<String>,
        options: &[String],
    ) -> Self {
        Self {
            message: message.into(),
            source_text: source_text.into(),
            name: name.into(),
            options: options.to_vec(),
        }
    }

    /// The verbatim compiler, linker or tool output.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Writes a report with the diagnostic, the program name, the options and
    /// the line-numbered source, then flushes `sink`.
    pub fn dump<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<()> {
        writeln!(sink, "Kernel compilation error: {self}")?;
        writeln!(sink, "-----")?;
        writeln!(sink, "Name: {}", self.name)?;
        writeln!(sink, "Options: {}", self.options.join(" "))?;
        writeln!(sink, "Kernel source:")?;
        listing::write_numbered(sink, &self.source_text)?;
        writeln!(sink, "-----")?;
        sink.flush()
    }
}

/// Errors returned by compilation and cache persistence.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The external toolchain executable could not be launched.
    #[error("failed to run `{tool}`, check the PATH environment variable: {source}")]
    ToolNotFound {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// The external toolchain ran and exited with a nonzero status.
    #[error("{0}")]
    ToolFailed(CompileException),

    /// The in-process compiler rejected the program.
    #[error("{0}")]
    Compile(CompileException),

    /// Assembly text could not be linked into a loadable binary.
    #[error("link failed: {0}")]
    Link(CompileException),

    /// The request itself is invalid, e.g. an unsupported output kind.
    #[error("{0}")]
    Precondition(String),

    /// Unexpected filesystem failure around compiler scratch files or cache entries.
    #[error("I/O error at {}: {source}", .path.display())]
    Storage { path: PathBuf, source: io::Error },

    #[error("device query failed: {0}")]
    Device(EngineError),

    #[error("in-process compiler failed: {0}")]
    Runtime(EngineError),

    #[error("module load failed: {0}")]
    Load(EngineError),
}

impl CompileError {
    pub(crate) fn storage(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Storage { path, source }
    }

    /// The diagnostic carried by compile, link and tool failures.
    pub fn exception(&self) -> Option<&CompileException> {
        match self {
            Self::ToolFailed(exception) | Self::Compile(exception) | Self::Link(exception) => {
                Some(exception)
            }
            _ => None,
        }
    }
}
