use std::io;
use std::path::Path;

use tempfile::TempDir;
use tracing::{debug, warn};

/// Temporary working directory for one compiler invocation.
///
/// Removed when the work inside it succeeds; left on disk when it fails so
/// the compiler inputs can be inspected afterwards.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("kernjit-").tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Runs `work` inside the directory, then removes or keeps the directory
    /// depending on the outcome.
    pub fn run<T, E>(self, work: impl FnOnce(&Path) -> Result<T, E>) -> Result<T, E> {
        let outcome = work(self.dir.path());
        if outcome.is_ok() {
            let path = self.dir.path().to_path_buf();
            if let Err(err) = self.dir.close() {
                debug!(path = %path.display(), %err, "failed to remove scratch directory");
            }
        } else {
            let kept = self.dir.keep();
            warn!(path = %kept.display(), "compile failed, keeping scratch directory");
        }
        outcome
    }
}
