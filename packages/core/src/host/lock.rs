//! Per-host PID lock
//!
//! Mutating operations on one host hold `<machine dir>/machina.pid` so two
//! machina processes never drive the same machine at once. A lock left by a
//! process that no longer exists is treated as stale and replaced.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::error::HostError;
use crate::process::is_process_running;

pub const LOCK_FILENAME: &str = "machina.pid";

/// Guard for one host; the lock file is removed on drop
#[derive(Debug)]
pub struct HostLock {
    name: String,
    pid_path: PathBuf,
}

impl HostLock {
    /// Lock the host whose record directory is `machine_dir`
    pub fn acquire(name: &str, machine_dir: &Path) -> Result<Self, HostError> {
        let failed = |message: String| HostError::LockFailed {
            name: name.to_string(),
            message,
        };

        fs::create_dir_all(machine_dir).map_err(|e| failed(e.to_string()))?;
        let pid_path = machine_dir.join(LOCK_FILENAME);

        // Two attempts: the second follows removal of a stale lock
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&pid_path)
            {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id()).map_err(|e| failed(e.to_string()))?;
                    tracing::debug!("Acquired host lock: {}", pid_path.display());
                    return Ok(Self {
                        name: name.to_string(),
                        pid_path,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let contents = fs::read_to_string(&pid_path).unwrap_or_default();
                    if let Ok(pid) = contents.trim().parse::<u32>() {
                        if is_process_running(pid) {
                            return Err(HostError::Locked {
                                name: name.to_string(),
                                pid,
                            });
                        }
                        tracing::info!("Removing stale host lock (PID {} not running)", pid);
                    }
                    match fs::remove_file(&pid_path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(failed(e.to_string())),
                    }
                }
                Err(e) => return Err(failed(e.to_string())),
            }
        }

        Err(failed(format!(
            "{} keeps reappearing",
            pid_path.display()
        )))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }
}

impl Drop for HostLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.pid_path) {
            tracing::warn!("Failed to remove host lock on drop: {}", e);
        } else {
            tracing::debug!("Released host lock: {}", self.pid_path.display());
        }
    }
}
