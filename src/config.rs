//! Runtime configuration read from `KERNJIT_*` environment variables.

use std::path::PathBuf;

use directories::BaseDirs;
use kernjit_utils::parse_bool_flag;

pub const CACHE_DIR_VAR: &str = "KERNJIT_CACHE_DIR";
pub const DUMP_SOURCE_VAR: &str = "KERNJIT_DUMP_SOURCE_ON_ERROR";
pub const DEBUG_FLAGS_VAR: &str = "KERNJIT_COMPILE_WITH_DEBUG";
pub const SAVE_SOURCE_VAR: &str = "KERNJIT_CACHE_SAVE_SOURCE";
pub const EXTERNAL_TOOL_VAR: &str = "KERNJIT_NVCC";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding cache entries.
    pub cache_dir: PathBuf,
    /// Dump the line-numbered source to stderr when a compile fails.
    pub dump_source_on_error: bool,
    /// Append device-debug and line-info flags to every compile.
    pub compile_with_debug: bool,
    /// Write `<entry>.cu` with the kernel source next to each cache entry.
    pub save_source: bool,
    /// External toolchain executable, looked up on `PATH` when bare.
    pub external_tool: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| parse_bool_flag(lookup(name).as_deref(), false);
        let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());

        Self {
            cache_dir: non_empty(CACHE_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_dir),
            dump_source_on_error: flag(DUMP_SOURCE_VAR),
            compile_with_debug: flag(DEBUG_FLAGS_VAR),
            save_source: flag(SAVE_SOURCE_VAR),
            external_tool: non_empty(EXTERNAL_TOOL_VAR)
                .map_or_else(|| PathBuf::from("nvcc"), PathBuf::from),
        }
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn with_dump_source_on_error(mut self, enabled: bool) -> Self {
        self.dump_source_on_error = enabled;
        self
    }

    #[must_use]
    pub const fn with_compile_with_debug(mut self, enabled: bool) -> Self {
        self.compile_with_debug = enabled;
        self
    }

    #[must_use]
    pub const fn with_save_source(mut self, enabled: bool) -> Self {
        self.save_source = enabled;
        self
    }

    #[must_use]
    pub fn with_external_tool(mut self, tool: impl Into<PathBuf>) -> Self {
        self.external_tool = tool.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// `~/.kernjit/kernel_cache`, or a relative fallback when no home directory
/// can be determined.
pub fn default_cache_dir() -> PathBuf {
    BaseDirs::new().map_or_else(
        || PathBuf::from(".kernjit").join("kernel_cache"),
        |dirs| dirs.home_dir().join(".kernjit").join("kernel_cache"),
    )
}
