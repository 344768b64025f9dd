use crate::errors::{StackError, Result};
use std::fs;
use std::path::Path;

/// Shorten an object id for display
pub fn short_id(id: &git2::Oid) -> String {
    let full = id.to_string();
    full[..8.min(full.len())].to_string()
}

/// Atomic file operations to prevent corruption during writes
pub mod atomic_file {
    use super::*;

    /// Write string content to a file atomically using a temporary file + rename strategy
    pub fn write_string(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, content)
            .map_err(|e| StackError::config(format!("Failed to write temporary file: {e}")))?;

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            StackError::config(format!("Failed to finalize file write: {e}"))
        })
    }
}

/// Advisory lock files guarding a stack against concurrent writers
pub mod file_locking {
    use super::*;
    use crate::config::LockSettings;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::{Duration, Instant, SystemTime};

    const RETRY_INTERVAL: Duration = Duration::from_millis(50);

    /// An exclusive lock, released when dropped
    #[derive(Debug)]
    pub struct FileLock {
        lock_path: PathBuf,
        owner: String,
    }

    impl FileLock {
        /// Acquire the lock at `lock_path`, polling until `settings.timeout_ms` elapses.
        /// Lock files older than `settings.stale_after_secs` are treated as abandoned.
        pub fn acquire(lock_path: &Path, owner: &str, settings: &LockSettings) -> Result<Self> {
            let timeout = Duration::from_millis(settings.timeout_ms);
            let stale_after = Duration::from_secs(settings.stale_after_secs);
            let start_time = Instant::now();

            if let Some(parent) = lock_path.parent() {
                fs::create_dir_all(parent)?;
            }

            loop {
                match Self::try_acquire(lock_path, owner) {
                    Ok(lock) => return Ok(lock),
                    Err(TryLockError::Held) => {
                        if is_stale(lock_path, stale_after) {
                            tracing::warn!(
                                "Breaking abandoned lock {} (held by {})",
                                lock_path.display(),
                                holder(lock_path)
                            );
                            let _ = fs::remove_file(lock_path);
                            continue;
                        }

                        if start_time.elapsed() >= timeout {
                            return Err(StackError::lock_contention(format!(
                                "{} is held by {} (waited {}ms)",
                                lock_path.display(),
                                holder(lock_path),
                                timeout.as_millis()
                            )));
                        }
                        std::thread::sleep(RETRY_INTERVAL);
                    }
                    Err(TryLockError::Io(e)) => return Err(e.into()),
                }
            }
        }

        fn try_acquire(lock_path: &Path, owner: &str) -> std::result::Result<Self, TryLockError> {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(lock_path)
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::AlreadyExists => TryLockError::Held,
                    _ => TryLockError::Io(e),
                })?;

            let lock = Self {
                lock_path: lock_path.to_path_buf(),
                owner: owner.to_string(),
            };
            writeln!(file, "{} pid={}", owner, std::process::id()).map_err(TryLockError::Io)?;

            tracing::debug!("Acquired {} for {}", lock_path.display(), owner);
            Ok(lock)
        }

        pub fn path(&self) -> &Path {
            &self.lock_path
        }

        pub fn owner(&self) -> &str {
            &self.owner
        }
    }

    impl Drop for FileLock {
        fn drop(&mut self) {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                tracing::debug!("Failed to remove lock {}: {}", self.lock_path.display(), e);
            }
        }
    }

    enum TryLockError {
        Held,
        Io(std::io::Error),
    }

    fn is_stale(lock_path: &Path, stale_after: Duration) -> bool {
        fs::metadata(lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age >= stale_after)
    }

    fn holder(lock_path: &Path) -> String {
        fs::read_to_string(lock_path)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "an unknown process".to_string())
    }
}
