use crate::error::{PipelineError, Result};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// Registry of every temporary artifact allocated during one run.
///
/// Owned by the run; drained by [`TempArena::cleanup_all`] or, on any early
/// exit, when dropped.
#[derive(Debug)]
pub struct TempArena {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl TempArena {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            paths: Vec::new(),
        }
    }

    pub fn in_system_temp() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Reserve a fresh `<random>-<name><extension>` path in the arena's
    /// directory and register it for removal.
    pub fn allocate(&mut self, name: &str, extension: &str) -> Result<PathBuf> {
        let suffix = format!("-{}{}", name, extension);
        let path = tempfile::Builder::new()
            .prefix("ac")
            .suffix(&suffix)
            .rand_bytes(8)
            .tempfile_in(&self.dir)
            .map_err(PipelineError::TempArtifact)?
            .into_temp_path()
            .keep()
            .map_err(|err| PipelineError::TempArtifact(err.error))?;
        debug!(path = %path.display(), "adding temporary file");
        self.paths.push(path.clone());
        Ok(path)
    }

    /// Remove every registered path that still exists. Missing files are
    /// ignored; other failures are logged. Returns the number removed.
    pub fn cleanup_all(&mut self) -> usize {
        let mut removed = 0;
        for path in self.paths.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    debug!(
                        error = %err,
                        path = %path.display(),
                        "failed to remove temporary file"
                    );
                }
            }
        }
        removed
    }
}

impl Drop for TempArena {
    fn drop(&mut self) {
        self.cleanup_all();
    }
}
