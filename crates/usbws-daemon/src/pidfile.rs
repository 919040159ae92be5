//! PID file written at startup and removed at exit.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Default location used when `--pid` is given without a file name.
pub const DEFAULT_PID_FILE: &str = "/var/run/usbwsd";

/// Owns a PID file for the lifetime of the daemon.  Dropping it removes the
/// file.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the current process id (one line) to `path`, replacing any
    /// stale file.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be written.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        std::fs::write(&path, format!("{}\n", std::process::id()))?;
        debug!(path = %path.display(), "wrote pid file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to remove pid file: {e}");
        }
    }
}
