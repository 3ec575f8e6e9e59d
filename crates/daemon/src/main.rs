// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pdispatchd`: the print dispatch daemon binary.
//!
//! Acquires the state-dir lock, installs logging, then runs the
//! detector loop (§4.5) on the main thread until a shutdown signal
//! arrives. The detector owns every printer worker thread it spawns
//! (§4.6) and joins them on `stop()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, SigHandler, Signal};

use pd_core::SystemClock;
use pd_daemon::device::{NullDeviceFactory, NullDriver, NullMachineDetector};
use pd_daemon::registry::InMemoryRegistry;
use pd_daemon::{config, lifecycle, logging, Detector};
use pd_engine::adapters::slicer::ProcessSlicerRunner;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signum: i32) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Register SIGTERM/SIGINT handlers that flip `SHUTDOWN_REQUESTED`
/// rather than acting directly — signal handlers must stay
/// async-signal-safe, so the actual detector/worker teardown happens on
/// the main thread's poll loop below (§5 "Cancellation" applies the same
/// discipline one level up: signal -> flag -> cooperative stop).
#[allow(unsafe_code)]
fn install_signal_handlers() -> Result<(), nix::Error> {
    // SAFETY: `request_shutdown` only stores to an `AtomicBool`, which is
    // async-signal-safe; no allocation, locking, or panicking occurs in
    // the handler.
    unsafe {
        signal::signal(Signal::SIGTERM, SigHandler::Handler(request_shutdown))?;
        signal::signal(Signal::SIGINT, SigHandler::Handler(request_shutdown))?;
    }
    Ok(())
}

fn main() {
    let config = match lifecycle::Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("pdispatchd: failed to resolve configuration: {err}");
            std::process::exit(1);
        }
    };

    let state = match lifecycle::startup(&config) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("pdispatchd: {err}");
            std::process::exit(1);
        }
    };

    let _log_guard = match logging::init(&config.log_path, &config::log_filter()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("pdispatchd: failed to initialize logging: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = install_signal_handlers() {
        tracing::error!(%err, "failed to install signal handlers");
        std::process::exit(1);
    }

    let scratch_base = config.state_dir.join("scratch");
    let registry = Arc::new(InMemoryRegistry::new(
        Arc::new(ProcessSlicerRunner),
        config::slicer_executable(),
        config::slicer_config_path(),
        scratch_base,
        Arc::new(NullDriver),
        config::temp_poll_interval(),
    ));

    let detector = Detector::new(
        SystemClock,
        Arc::new(NullMachineDetector),
        Arc::new(NullDeviceFactory),
        registry,
        config::blacklist_secs(),
        config::detector_interval(),
        config::temp_poll_interval(),
    );

    tracing::info!("pdispatchd ready");
    let detector_for_loop = Arc::clone(&detector);
    let detector_thread = std::thread::spawn(move || detector_for_loop.run());

    while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("shutdown requested, stopping detector and printer workers");
    detector.stop();
    if detector_thread.join().is_err() {
        tracing::error!("detector thread panicked while joining");
    }

    state.shutdown();
}
