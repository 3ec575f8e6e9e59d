// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The device driver library (§6, "Device driver library (consumed)").
//!
//! A `Driver` is built per-port by the daemon's device factory
//! (`BotFactory.build_from_port` in the original) once a profile has been
//! read off the hardware. It is stateless with respect to any one print —
//! every call takes whatever state it needs as arguments, so a single
//! `Driver` can be shared across the wrap task, the verify task, and the
//! printer worker's stream loop without synchronization beyond what the
//! caller already holds (§4.6 "construct a fresh stateless driver").

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use pd_core::{DispatchError, Material, SlicerSettings, Task};

use crate::profile::Profile;

/// Errors from the device driver library itself — distinct from
/// `DispatchError::StreamValidation`, which is what the verify *task*
/// surfaces once it has wrapped a driver-level parse failure (§10.3).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unknown tool index {0}")]
    UnknownTool(u32),

    #[error("unknown heated platform index {0}")]
    UnknownPlatform(u32),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The `(start_lines, end_lines, variables)` triple the wrap task asks
/// for (§4.4 "Wrap task"). `variables` is opaque template context the
/// driver resolved from the profile; this implementation has no need to
/// interpret it further than passing it along for callers that do.
#[derive(Debug, Clone, Default)]
pub struct StartEndVariables {
    pub start_lines: Vec<String>,
    pub end_lines: Vec<String>,
    pub variables: std::collections::BTreeMap<String, String>,
}

/// A sink the stream session writes framed commands to: the serial handle
/// during a live print, a plain file during print-to-file (§6
/// `StreamWriter`/`FileWriter`).
pub trait StreamSink: Send {
    fn write_frame(&mut self, line: &str) -> Result<(), DriverError>;

    /// Cause the next `write_frame` (or the current blocking write) to
    /// abort. Wired to a task's `stopped_event` so cancellation exits the
    /// stream loop promptly (§4.4 "Print / print-to-file task").
    fn set_external_stop(&mut self);
}

/// A stateful parse/frame session bound to one `StreamSink`, handed out by
/// `Driver::new_session`. One session is used for exactly one print.
pub trait StreamSession: Send {
    fn execute_line(&mut self, raw_line: &str) -> Result<(), DriverError>;
}

pub trait Driver: Send + Sync {
    fn get_toolhead_temperature(&self, tool_index: u32) -> Result<f64, DriverError>;
    fn get_platform_temperature(&self, platform_index: u32) -> Result<f64, DriverError>;

    fn start_end_variables(
        &self,
        profile: &Profile,
        settings: &SlicerSettings,
        material: &Material,
        dualstrusion: bool,
    ) -> Result<StartEndVariables, DispatchError>;

    fn new_session(&self, sink: Box<dyn StreamSink>) -> Box<dyn StreamSession>;

    /// Validate a produced binary artifact end-to-end, reporting
    /// per-byte percentage through `progress` (§4.4 "Verify task").
    /// Parser failures become `DispatchError::StreamValidation`.
    fn read_file(
        &self,
        path: &Path,
        progress: &mut dyn FnMut(u8),
    ) -> Result<(), DispatchError>;
}

/// A `StreamSink` over a plain file, used by print-to-file and by tests
/// that don't need a real serial handle.
pub struct FileSink {
    file: std::fs::File,
    stopped: bool,
}

impl FileSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self { file: std::fs::File::create(path)?, stopped: false })
    }
}

impl StreamSink for FileSink {
    fn write_frame(&mut self, line: &str) -> Result<(), DriverError> {
        if self.stopped {
            return Err(DriverError::Stream("external stop requested".into()));
        }
        use std::io::Write;
        writeln!(self.file, "{line}").map_err(DriverError::Io)
    }

    fn set_external_stop(&mut self) {
        self.stopped = true;
    }
}

/// Attach a `stopped_event` handler on `task` that calls
/// `set_external_stop` on `sink` (§4.4, §5 "Stream print").
pub fn stop_sink_on_cancel(task: &Arc<Task>, sink: Arc<parking_lot::Mutex<dyn StreamSink>>) {
    task.stopped_event.attach(move |_| {
        sink.lock().set_external_stop();
    });
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// A driver double that echoes whatever temperatures/start-end data
    /// it was constructed with, and accepts every line it's handed.
    pub struct FakeDriver {
        toolhead_temp: f64,
        platform_temp: f64,
        start_lines: Vec<String>,
        end_lines: Vec<String>,
        fail_verify: bool,
        executed_lines: Arc<Mutex<Vec<String>>>,
    }

    impl Default for FakeDriver {
        fn default() -> Self {
            Self {
                toolhead_temp: 210.0,
                platform_temp: 60.0,
                start_lines: vec!["; start".to_string()],
                end_lines: vec!["; end".to_string()],
                fail_verify: false,
                executed_lines: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl FakeDriver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_verify() -> Self {
            Self { fail_verify: true, ..Self::default() }
        }

        pub fn executed_lines(&self) -> Vec<String> {
            self.executed_lines.lock().clone()
        }
    }

    struct FakeSession {
        sink: Box<dyn StreamSink>,
        executed: Arc<Mutex<Vec<String>>>,
    }

    impl StreamSession for FakeSession {
        fn execute_line(&mut self, raw_line: &str) -> Result<(), DriverError> {
            self.executed.lock().push(raw_line.to_string());
            self.sink.write_frame(raw_line)
        }
    }

    impl Driver for FakeDriver {
        fn get_toolhead_temperature(&self, _tool_index: u32) -> Result<f64, DriverError> {
            Ok(self.toolhead_temp)
        }

        fn get_platform_temperature(&self, _platform_index: u32) -> Result<f64, DriverError> {
            Ok(self.platform_temp)
        }

        fn start_end_variables(
            &self,
            _profile: &Profile,
            _settings: &SlicerSettings,
            _material: &Material,
            dualstrusion: bool,
        ) -> Result<StartEndVariables, DispatchError> {
            let mut variables = BTreeMap::new();
            variables.insert("dualstrusion".to_string(), dualstrusion.to_string());
            Ok(StartEndVariables {
                start_lines: self.start_lines.clone(),
                end_lines: self.end_lines.clone(),
                variables,
            })
        }

        fn new_session(&self, sink: Box<dyn StreamSink>) -> Box<dyn StreamSession> {
            Box::new(FakeSession { sink, executed: Arc::clone(&self.executed_lines) })
        }

        fn read_file(
            &self,
            path: &Path,
            progress: &mut dyn FnMut(u8),
        ) -> Result<(), DispatchError> {
            if self.fail_verify {
                return Err(DispatchError::StreamValidation("corrupt artifact".into()));
            }
            let bytes = std::fs::read(path).map_err(DispatchError::Io)?;
            let total = bytes.len().max(1);
            for step in 1..=4 {
                progress((step * 100 / 4) as u8);
            }
            let _ = total;
            progress(100);
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeDriver;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_rejects_writes_after_external_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(&dir.path().join("out.gcode")).unwrap();
        sink.write_frame("G1 X0").unwrap();
        sink.set_external_stop();
        assert!(sink.write_frame("G1 X1").is_err());
    }

    #[test]
    fn fake_driver_reports_configured_temperatures() {
        let driver = FakeDriver::new();
        assert_eq!(driver.get_toolhead_temperature(0).unwrap(), 210.0);
        assert_eq!(driver.get_platform_temperature(0).unwrap(), 60.0);
    }

    #[test]
    fn fake_driver_verify_reports_terminal_percent_100() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.s3g");
        std::fs::write(&path, b"binary-ish").unwrap();
        let driver = FakeDriver::new();
        let mut last = 0u8;
        driver.read_file(&path, &mut |p| last = p).unwrap();
        assert_eq!(last, 100);
    }
}
