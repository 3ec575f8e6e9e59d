// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup: lock acquisition and directory bring-up (§10.5).

use std::io::Write;

use fs2::FileExt;

use super::{Config, DaemonState, LifecycleError};

/// Start the daemon: ensure the state directory exists, acquire the
/// exclusive lock file, and write our PID into it.
///
/// Cleanup on failure is skipped specifically when the lock was already
/// held — those files belong to the already-running daemon, not to us
/// (mirrors the teacher's `startup`/`cleanup_on_failure` split).
pub fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    match startup_inner(config) {
        Ok(state) => Ok(state),
        Err(err) => {
            if !matches!(err, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(err)
        }
    }
}

fn startup_inner(config: &Config) -> Result<DaemonState, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    // Acquire the lock before truncating the file — otherwise a failed
    // acquisition would have already wiped the running daemon's PID.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;

    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    tracing::info!(state_dir = %config.state_dir.display(), pid = std::process::id(), "daemon started");

    Ok(DaemonState { config: config.clone(), lock_file })
}

fn cleanup_on_failure(config: &Config) {
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            state_dir: dir.to_path_buf(),
            lock_path: dir.join("pdispatchd.pid"),
            log_path: dir.join("pdispatchd.log"),
        }
    }

    #[test]
    #[serial]
    fn startup_writes_pid_and_holds_lock() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let state = startup(&config).unwrap();
        let pid: u32 = std::fs::read_to_string(&config.lock_path).unwrap().trim().parse().unwrap();
        assert_eq!(pid, std::process::id());
        state.shutdown();
        assert!(!config.lock_path.exists());
    }

    #[test]
    #[serial]
    fn second_startup_fails_while_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let first = startup(&config).unwrap();
        let second = startup(&config);
        assert!(matches!(second, Err(LifecycleError::LockFailed(_))));
        // The lock file from the first daemon must survive the second's
        // failed startup — cleanup_on_failure is skipped for LockFailed.
        assert!(config.lock_path.exists());
        first.shutdown();
    }
}
