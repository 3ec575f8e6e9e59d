// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The device driver library seam (§6 "Device driver library (consumed)"),
//! plus the machine-detection and bot-factory seams the detector loop
//! (§4.5) is built against.
//!
//! Real serial/USB enumeration and framing are hardware-specific and out
//! of scope for this workspace (§1); this module defines the trait
//! boundary `pd-engine::adapters::Driver` already names and supplies a
//! `Null` implementation that makes the daemon runnable (and testable)
//! without any hardware attached — analogous to how the teacher
//! workspace keeps hardware/cloud specifics behind an `adapters` module
//! and ships a fake for tests (§10.1).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use pd_core::{DispatchError, Material, SlicerSettings};
use pd_engine::adapters::{Driver, DriverError, StartEndVariables, StreamSession, StreamSink};
use pd_engine::Profile;

/// Errors from the device-driver-library seam (§10.3) — enumeration and
/// factory-build failures that occur below the Task/Process layer,
/// before any task has even started.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("machine detection failed: {0}")]
    Detection(String),

    #[error("failed to build driver for port {0:?}: {1}")]
    FactoryBuild(String, String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// One attached port as the machine detector reports it (§6
/// `MachineDetector.get_available_machines`).
#[derive(Debug, Clone)]
pub struct AvailableMachine {
    pub port_id: String,
    pub serial_id: String,
}

/// Enumerates currently attached devices (§4.5 step 2). The production
/// implementation shells out to platform USB/serial enumeration; this
/// workspace ships only [`NullMachineDetector`], which reports nothing,
/// since real enumeration is hardware-specific (§1 non-goals, §10.1).
pub trait MachineDetector: Send + Sync {
    fn get_available_machines(&self) -> Result<Vec<AvailableMachine>, DeviceError>;
}

/// Builds a driver and profile for a freshly attached port (§6
/// `BotFactory.build_from_port`).
pub trait DeviceFactory: Send + Sync {
    fn build_from_port(&self, port_id: &str) -> Result<(Arc<dyn Driver>, Profile), DeviceError>;
}

/// Reports no attached machines, ever. Lets the daemon run its full
/// startup/detector/shutdown sequence with no hardware present, and is
/// the default in the absence of a real USB/serial enumerator.
#[derive(Debug, Default)]
pub struct NullMachineDetector;

impl MachineDetector for NullMachineDetector {
    fn get_available_machines(&self) -> Result<Vec<AvailableMachine>, DeviceError> {
        Ok(Vec::new())
    }
}

/// A `StreamSink`/`Driver` pair that discards every line it is asked to
/// frame. Used by [`NullDeviceFactory`] and as the seam a real
/// serial/USB-backed implementation would replace (§10.1).
pub struct NullDriver;

/// A `StreamSink` that accepts and discards every frame. Stands in for
/// a real serial handle wherever [`NullDeviceFactory`] stands in for a
/// real [`DeviceFactory`] — the printer worker opens one of these per
/// print when its underlying port has no real hardware behind it.
pub struct NullSink {
    stopped: bool,
}

impl NullSink {
    pub fn new() -> Self {
        Self { stopped: false }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSink for NullSink {
    fn write_frame(&mut self, _line: &str) -> Result<(), DriverError> {
        if self.stopped {
            return Err(DriverError::Stream("external stop requested".into()));
        }
        Ok(())
    }

    fn set_external_stop(&mut self) {
        self.stopped = true;
    }
}

struct NullSession {
    sink: Box<dyn StreamSink>,
}

impl StreamSession for NullSession {
    fn execute_line(&mut self, raw_line: &str) -> Result<(), DriverError> {
        self.sink.write_frame(raw_line)
    }
}

impl Driver for NullDriver {
    fn get_toolhead_temperature(&self, _tool_index: u32) -> Result<f64, DriverError> {
        Ok(0.0)
    }

    fn get_platform_temperature(&self, _platform_index: u32) -> Result<f64, DriverError> {
        Ok(0.0)
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
        Ok(StartEndVariables { start_lines: Vec::new(), end_lines: Vec::new(), variables })
    }

    fn new_session(&self, sink: Box<dyn StreamSink>) -> Box<dyn StreamSession> {
        Box::new(NullSession { sink })
    }

    fn read_file(
        &self,
        path: &Path,
        progress: &mut dyn FnMut(u8),
    ) -> Result<(), DispatchError> {
        std::fs::metadata(path).map_err(DispatchError::Io)?;
        progress(100);
        Ok(())
    }
}

/// Builds a bare [`Profile`] (no tools, no heated platforms) and a
/// [`NullDriver`] for any port — the stand-in the daemon ships with in
/// the absence of real hardware enumeration (§10.1).
#[derive(Debug, Default)]
pub struct NullDeviceFactory;

impl DeviceFactory for NullDeviceFactory {
    fn build_from_port(&self, port_id: &str) -> Result<(Arc<dyn Driver>, Profile), DeviceError> {
        Ok((Arc::new(NullDriver), Profile::new(format!("null:{port_id}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_machine_detector_reports_nothing() {
        let detector = NullMachineDetector;
        assert!(detector.get_available_machines().unwrap().is_empty());
    }

    #[test]
    fn null_device_factory_builds_a_driver_and_profile() {
        let factory = NullDeviceFactory;
        let (driver, profile) = factory.build_from_port("COM3").unwrap();
        assert_eq!(profile.model, "null:COM3");
        assert_eq!(driver.get_toolhead_temperature(0).unwrap(), 0.0);
    }

    #[test]
    fn null_driver_verify_reports_terminal_percent_100() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.s3g");
        std::fs::write(&path, b"x").unwrap();
        let driver = NullDriver;
        let mut last = 0u8;
        driver.read_file(&path, &mut |p| last = p).unwrap();
        assert_eq!(last, 100);
    }
}
