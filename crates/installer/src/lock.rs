//! Single-run lock.
//!
//! Two pipelines against the same inventory would race on the registry and
//! vault files, so a run holds `<state_dir>/run.lock` for its whole lifetime.
//! A lock whose recorded process is gone (killed run) is taken over.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::error::{ProvisionError, ProvisionResult};

const LOCK_FILE: &str = "run.lock";

/// Held while a run is in progress; the file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create the lock file exclusively.
    ///
    /// # Errors
    ///
    /// Returns `Locked` naming the current holder if the file already exists
    /// and its process is still running.
    pub fn acquire(state_dir: &Path) -> ProvisionResult<Self> {
        std::fs::create_dir_all(state_dir).map_err(|e| ProvisionError::io(state_dir, e))?;
        let path = state_dir.join(LOCK_FILE);

        match Self::create(&path)? {
            Some(lock) => Ok(lock),
            None => {
                let holder = read_holder(&path);
                if !is_stale(&holder) {
                    return Err(ProvisionError::Locked { path, holder });
                }
                warn!(lock = %path.display(), holder = %holder, "Removing stale run lock");
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(ProvisionError::io(&path, e)),
                }
                // Another run may have won the race for the fresh file.
                Self::create(&path)?.ok_or_else(|| ProvisionError::Locked {
                    holder: read_holder(&path),
                    path,
                })
            }
        }
    }

    /// `None` if the file already exists.
    fn create(path: &Path) -> ProvisionResult<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let holder = format!(
                    "pid {} since {}",
                    std::process::id(),
                    chrono::Utc::now().to_rfc3339()
                );
                file.write_all(holder.as_bytes())
                    .map_err(|e| ProvisionError::io(path, e))?;
                debug!(lock = %path.display(), "Acquired run lock");
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(ProvisionError::io(path, e)),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to remove run lock");
        }
    }
}

fn read_holder(path: &Path) -> String {
    std::fs::read_to_string(path)
        .map(|h| h.trim().to_string())
        .unwrap_or_else(|_| "unknown holder".to_string())
}

fn holder_pid(holder: &str) -> Option<u32> {
    holder.strip_prefix("pid ")?.split_whitespace().next()?.parse().ok()
}

/// The holder names a pid that no longer runs. Unreadable holders are
/// never stale.
fn is_stale(holder: &str) -> bool {
    let Some(pid) = holder_pid(holder) else {
        return false;
    };
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_first_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunLock::acquire(dir.path()).unwrap();
        assert!(first.path().exists());

        match RunLock::acquire(dir.path()) {
            Err(ProvisionError::Locked { holder, .. }) => {
                assert!(holder.starts_with(&format!("pid {}", std::process::id())));
            }
            other => panic!("expected Locked, got {other:?}"),
        }

        drop(first);
        assert!(!dir.path().join(LOCK_FILE).exists());
        let _again = RunLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn test_lock_left_by_dead_process_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);
        std::fs::write(&path, "pid 999999999 since 2026-01-01T00:00:00Z").unwrap();

        let lock = RunLock::acquire(dir.path()).unwrap();

        let holder = std::fs::read_to_string(lock.path()).unwrap();
        assert!(holder.starts_with(&format!("pid {} since", std::process::id())), "{holder}");
    }

    #[test]
    fn test_unrecognised_holder_is_not_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);
        std::fs::write(&path, "held by hand").unwrap();

        assert!(matches!(
            RunLock::acquire(dir.path()),
            Err(ProvisionError::Locked { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "held by hand");
    }

    #[test]
    fn test_holder_pid() {
        assert_eq!(holder_pid("pid 4242 since 2026-01-01T00:00:00Z"), Some(4242));
        assert_eq!(holder_pid("pid abc since now"), None);
        assert_eq!(holder_pid("unknown holder"), None);
    }
}
