// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate (§10.4).
//!
//! Every env var the daemon reads is resolved here, exactly once, behind
//! a named function — call sites never touch `std::env::var` directly.
//! Mirrors the precedence/fallback style of this workspace's sibling
//! daemon crate's `env.rs`.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// `PDISPATCHD_STATE_DIR` > `XDG_STATE_HOME/pdispatchd` > `~/.local/state/pdispatchd`.
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("PDISPATCHD_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("pdispatchd"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/pdispatchd"))
}

/// Blacklist cool-off duration (§4.5 "Blacklisting"). Default 30s, matching
/// the §8 boundary scenario.
pub fn blacklist_secs() -> u64 {
    std::env::var("PDISPATCHD_BLACKLIST_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30)
}

/// Detector poll bound (§4.5 step 7). Default 10s, capped at the spec's
/// 10s ceiling regardless of what the env var asks for.
pub fn detector_interval() -> Duration {
    let ms = std::env::var("PDISPATCHD_DETECTOR_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10_000);
    Duration::from_millis(ms.min(10_000))
}

/// Printer worker temperature poll interval (§4.6). Default 5s.
pub fn temp_poll_interval() -> Duration {
    let ms = std::env::var("PDISPATCHD_TEMP_POLL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5_000);
    Duration::from_millis(ms)
}

/// Directory the device factory loads printer profiles from.
pub fn profile_dir() -> Option<PathBuf> {
    std::env::var("PDISPATCHD_PROFILE_DIR").ok().map(PathBuf::from)
}

/// The client transport address string (§6/§8), parsed by [`crate::address::Address`].
pub fn listen_address() -> Option<String> {
    std::env::var("PDISPATCHD_LISTEN").ok().filter(|s| !s.is_empty())
}

/// `tracing_subscriber::EnvFilter` directive string, falling back to
/// `"info"` when unset or invalid (§10.2).
pub fn log_filter() -> String {
    std::env::var("PDISPATCHD_LOG").unwrap_or_else(|_| "info".to_string())
}

/// Path to the slicer executable invoked by the slice task (§6).
pub fn slicer_executable() -> PathBuf {
    std::env::var("PDISPATCHD_SLICER_EXECUTABLE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("miracle_grue"))
}

/// Path to the slicer's configuration file, passed as `-c` (§6). The
/// default pipeline never varies this per job — `SlicerSettings::raw` is
/// forwarded to the slicer through this same file's directory by a
/// production configuration loader, out of scope for this workspace.
pub fn slicer_config_path() -> PathBuf {
    std::env::var("PDISPATCHD_SLICER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/pdispatchd/slicer.json"))
}

/// Path to the mesh-splitter executable invoked by composite extraction (§6).
pub fn splitter_executable() -> PathBuf {
    std::env::var("PDISPATCHD_SPLITTER_EXECUTABLE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("splitter"))
}
