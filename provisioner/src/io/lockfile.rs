//! Host-wide run lock.
//!
//! Every action mutates shared host state (packages, files, services), so at
//! most one provisioning run may be active per host. The lock is an
//! exclusively-created file holding the owner's pid and run id; it is
//! removed when the guard drops. A crash leaves the file behind on purpose:
//! the operator sees who held it and removes it once satisfied the run is
//! gone.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

/// Guard for the exclusive right to mutate this host.
#[derive(Debug)]
pub struct HostLock {
    path: PathBuf,
}

impl HostLock {
    /// Create the lock file, failing if another run holds it.
    pub fn acquire(path: &Path, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock directory {}", parent.display()))?;
        }

        match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "pid={}", std::process::id()).context("write lock pid")?;
                writeln!(file, "run_id={run_id}").context("write lock run id")?;
                debug!(path = %path.display(), run_id, "host lock acquired");
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                Err(anyhow!(
                    "another provisioning run appears to be active on this host \
                     (lock {} held by: {}); if that run is gone, remove the lock file and retry",
                    path.display(),
                    holder.trim().replace('\n', ", "),
                ))
            }
            Err(err) => {
                Err(err).with_context(|| format!("create lock file {}", path.display()))
            }
        }
    }
}

impl Drop for HostLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), err = %err, "failed to remove host lock");
        } else {
            debug!(path = %self.path.display(), "host lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_holder_info() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state/provision.lock");

        let _lock = HostLock::acquire(&path, "run-42").expect("acquire");
        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains(&format!("pid={}", std::process::id())));
        assert!(contents.contains("run_id=run-42"));
    }

    #[test]
    fn second_acquire_fails_and_names_the_holder() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("provision.lock");

        let _lock = HostLock::acquire(&path, "run-1").expect("acquire");
        let err = HostLock::acquire(&path, "run-2").expect_err("must be exclusive");
        let msg = format!("{err:#}");
        assert!(msg.contains("run_id=run-1"));
        assert!(msg.contains("remove the lock file"));
    }

    #[test]
    fn drop_releases_the_lock() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("provision.lock");

        {
            let _lock = HostLock::acquire(&path, "run-1").expect("acquire");
            assert!(path.exists());
        }
        assert!(!path.exists());

        let _relock = HostLock::acquire(&path, "run-2").expect("reacquire after drop");
    }
}
