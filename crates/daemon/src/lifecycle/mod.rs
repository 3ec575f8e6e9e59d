// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon process lifecycle: startup, lock acquisition, shutdown (§10.5).
//!
//! Adapted from this workspace's sibling daemon crate's `lifecycle`
//! module: the lock-file-first, external-resources-last startup
//! ordering and the `LockFailed`-skips-cleanup rule both transfer
//! directly. The WAL, snapshot, and breadcrumb-orphan-recovery
//! machinery that module also has do not apply here — this daemon
//! persists nothing across restarts (§1 non-goals) — so only the parts
//! relevant to a detector-plus-workers daemon are kept.

mod startup;

pub use startup::startup;

use std::fs::File;
use std::path::PathBuf;

use thiserror::Error;

/// Daemon configuration: every path derived from one `state_dir` call,
/// matching the teacher's `Config::load` (§10.4).
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = crate::config::state_dir()?;
        Ok(Self {
            lock_path: state_dir.join("pdispatchd.pid"),
            log_path: state_dir.join("pdispatchd.log"),
            state_dir,
        })
    }
}

/// What `startup` hands back: the daemon's held lock (dropped releases
/// the flock) and the resolved configuration it started with.
pub struct DaemonState {
    pub config: Config,
    #[allow(dead_code)]
    lock_file: File,
}

impl DaemonState {
    /// Remove the PID file. The lock itself is released when
    /// `self.lock_file` drops, mirroring the teacher's shutdown order
    /// (transient files first, flock release via `Drop` last).
    pub fn shutdown(self) {
        if self.config.lock_path.exists() {
            if let Err(err) = std::fs::remove_file(&self.config.lock_path) {
                tracing::warn!(%err, "failed to remove pid file on shutdown");
            }
        }
        tracing::info!("daemon shutdown complete");
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn config_load_derives_paths_from_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("PDISPATCHD_STATE_DIR", dir.path());
        let config = Config::load().unwrap();
        assert_eq!(config.lock_path, dir.path().join("pdispatchd.pid"));
        assert_eq!(config.log_path, dir.path().join("pdispatchd.log"));
        std::env::remove_var("PDISPATCHD_STATE_DIR");
    }
}
