// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logging setup (§10.2).
//!
//! `tracing_subscriber::registry()` with an `EnvFilter` sourced from
//! `PDISPATCHD_LOG` (falling back to `"info"`), layered with a `fmt`
//! layer writing through a `tracing_appender::non_blocking` writer over
//! the daemon's log file. Returns the worker guard the caller must hold
//! for the process lifetime — dropping it stops the background writer
//! thread and flushes anything buffered.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber, writing to `log_path` (created/appended)
/// with `filter` as the `EnvFilter` directive string. Returns the guard
/// that must be kept alive for log lines to keep flushing.
pub fn init(log_path: &Path, filter: &str) -> std::io::Result<WorkerGuard> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new().create(true).append(true).open(log_path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}
