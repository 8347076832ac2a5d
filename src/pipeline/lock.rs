//! Cross-process run lock.
//!
//! The rendering profile directory cannot be shared between two cycles,
//! so every cycle holds this lock from start to finish.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;

use crate::error::{AppError, Result};

/// Exclusive lock file, removed when dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create the lock file exclusively.
    ///
    /// A lock file older than `stale` is treated as left behind by a
    /// crashed process and taken over.
    pub fn acquire(path: impl AsRef<Path>, stale: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let age = Self::age(&path)?;
                if age < stale {
                    return Err(AppError::lock(format!(
                        "{} is held by another run ({}s old)",
                        path.display(),
                        age.as_secs()
                    )));
                }
                log::warn!(
                    "Taking over stale lock {} ({}s old)",
                    path.display(),
                    age.as_secs()
                );
                fs::remove_file(&path)?;
                Self::create(&path).map_err(|e| {
                    AppError::lock(format!("{}: {e}", path.display()))
                })
            }
            Err(e) => Err(AppError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the lock as still held, restarting its staleness clock.
    pub fn refresh(&self) -> Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_modified(SystemTime::now())?;
        Ok(())
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "pid={}", std::process::id())?;
        writeln!(file, "acquired_at={}", Utc::now().to_rfc3339())?;
        file.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn age(path: &Path) -> Result<Duration> {
        let modified = fs::metadata(path)?.modified()?;
        Ok(SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO))
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exclusive_and_released_on_drop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("locks/run.lock");

        let lock = RunLock::acquire(&path, Duration::from_secs(3600)).unwrap();
        assert!(path.exists());
        let err = RunLock::acquire(&path, Duration::from_secs(3600)).unwrap_err();
        assert!(matches!(err, AppError::Lock(_)));

        drop(lock);
        assert!(!path.exists());
        assert!(RunLock::acquire(&path, Duration::from_secs(3600)).is_ok());
    }

    #[test]
    fn test_stale_lock_taken_over() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run.lock");
        fs::write(&path, "pid=1\n").unwrap();

        let lock = RunLock::acquire(&path, Duration::ZERO).unwrap();
        let content = fs::read_to_string(lock.path()).unwrap();
        assert!(content.contains(&format!("pid={}", std::process::id())));
    }

    #[test]
    fn test_refresh_keeps_long_run_from_going_stale() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run.lock");
        let lock = RunLock::acquire(&path, Duration::from_secs(60)).unwrap();

        let old = SystemTime::now() - Duration::from_secs(600);
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();
        lock.refresh().unwrap();

        let err = RunLock::acquire(&path, Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, AppError::Lock(_)));
        assert!(path.exists());
    }
}
