use std::slice;

/// Flushes denormals to zero; appended to every compile.
pub const FLUSH_TO_ZERO_FLAG: &str = "-ftz=true";

/// Appended after the flush flag when debug compilation is enabled.
pub const DEBUG_FLAGS: [&str; 2] = ["--device-debug", "--generate-line-info"];

/// Ordered compiler flags.
///
/// Order is significant: the flags take part in the cache key verbatim, so
/// `["-a", "-b"]` and `["-b", "-a"]` address different entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CompileOptions(Vec<String>);

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, flag: impl Into<String>) {
        self.0.push(flag.into());
    }

    #[must_use]
    pub fn with(mut self, flag: impl Into<String>) -> Self {
        self.push(flag);
        self
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Space-joined form used in diagnostics.
    pub fn joined(&self) -> String {
        self.0.join(" ")
    }

    /// Copy of these options with the flags every compile is forced to carry.
    #[must_use]
    pub fn with_forced_flags(&self, debug: bool) -> Self {
        let mut expanded = self.clone();
        expanded.push(FLUSH_TO_ZERO_FLAG);
        if debug {
            for flag in DEBUG_FLAGS {
                expanded.push(flag);
            }
        }
        expanded
    }
}

impl<S: Into<String>> FromIterator<S> for CompileOptions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<String>> for CompileOptions {
    fn from(flags: Vec<String>) -> Self {
        Self(flags)
    }
}

impl<'a> IntoIterator for &'a CompileOptions {
    type Item = &'a String;
    type IntoIter = slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
