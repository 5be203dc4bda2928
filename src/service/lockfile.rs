use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "brook.pid";

/// Exclusive claim on a data directory, held for the life of the process.
/// The lock file is removed on drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Create `<dir>/brook.pid` holding this process id. An existing lock
    /// is an error unless `force` is set, in which case it is overwritten.
    pub fn acquire(dir: &Path, force: bool) -> Result<Self, LockError> {
        let path = dir.join(LOCK_FILE);
        let pid = std::process::id();

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", pid)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                if !force {
                    return Err(LockError::AlreadyRunning { path, pid: holder });
                }
                tracing::warn!(
                    "Overwriting lock {} held by pid {}",
                    path.display(),
                    holder
                );
                std::fs::write(&path, format!("{}\n", pid))?;
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!("Acquired lock {} (pid {})", path.display(), pid);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Another instance (pid {pid}) holds {path}; pass --force to start anyway")]
    AlreadyRunning { path: PathBuf, pid: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
