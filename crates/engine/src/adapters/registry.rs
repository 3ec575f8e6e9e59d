// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The server-facing registry (§6, "Registry (consumed)").
//!
//! Recipe tasks never touch a serial handle or a printer worker's queue
//! directly — they go through this trait, which `pd-daemon` implements
//! once over its printer manager. The same trait is also the one the
//! detector loop and printer workers use to publish/withdraw printers and
//! push telemetry (§4.5, §4.6), so a single object plays both roles in the
//! daemon, matching the original's single `_server` back-reference (§9
//! design notes) without resorting to a global.

use std::path::PathBuf;
use std::sync::Arc;

use pd_core::{Material, PrintToFileType, SlicerSettings, Task};

use crate::profile::Profile;

/// Parameters for the slice task (§4.4 "Slice task"). `with_start_end` is
/// always `false` here — start/end insertion is always the wrap task's
/// job, never the slicer's.
#[derive(Debug, Clone)]
pub struct SliceRequest {
    pub profile: Profile,
    pub input_mesh: PathBuf,
    pub output_toolpath: PathBuf,
    pub settings: SlicerSettings,
    pub material: Material,
    pub dualstrusion: bool,
}

/// Parameters for submitting a wrapped toolpath onto a specific printer's
/// queue (§4.4 "Print / print-to-file task", §4.6 "Queue discipline").
#[derive(Debug, Clone)]
pub struct PrintRequest {
    pub printer_id: String,
    pub build_name: String,
    pub toolpath_path: PathBuf,
    pub skip_start_end: bool,
}

/// Parameters for rendering a wrapped toolpath to a binary artifact on
/// disk instead of a live printer.
#[derive(Debug, Clone)]
pub struct PrintToFileRequest {
    pub output_path: PathBuf,
    pub profile: Profile,
    pub build_name: String,
    pub toolpath_path: PathBuf,
    pub skip_start_end: bool,
    pub print_to_file_type: PrintToFileType,
}

/// A published printer, as the registry sees it — just enough surface for
/// the registry to route a print and for the detector to remove/evict it
/// by port. The daemon's worker implements this directly.
pub trait Printer: Send + Sync {
    fn port_id(&self) -> &str;
    fn serial_id(&self) -> &str;

    /// Queue a wrapped toolpath onto this printer (§4.4 "Print task", §4.6
    /// "Queue discipline"). Returns immediately; `task` reaches a terminal
    /// state once the worker has drained it.
    fn enqueue(&self, build_name: String, toolpath_path: PathBuf, skip_start_end: bool, task: Arc<Task>);
}

/// The capability interface recipe tasks, the detector, and printer
/// workers are built against — no direct references between those
/// components (§9 "Shared `_server` back-reference").
pub trait Registry: Send + Sync {
    /// Run the slicer for `request`, driving `task` to `end`/`fail`
    /// itself (the task body that called this returns once `task` is
    /// terminal).
    fn slice(&self, request: SliceRequest, task: &Arc<Task>);

    /// Submit a wrapped toolpath to the named printer's queue. Returns
    /// once the task reaches a terminal state.
    fn print(&self, request: PrintRequest, task: &Arc<Task>);

    /// Render a wrapped toolpath to a binary artifact on disk.
    fn print_to_file(&self, request: PrintToFileRequest, task: &Arc<Task>);

    fn append_printer(&self, printer: Arc<dyn Printer>);
    fn remove_printer(&self, port_id: &str);
    fn update_printer(&self, serial_id: &str, temperature: serde_json::Value);
    fn evict_printer(&self, port_id: &str);
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone)]
    pub enum RegistryCall {
        Slice(SliceRequest),
        Print(PrintRequest),
        PrintToFile(PrintToFileRequest),
        AppendPrinter(String),
        RemovePrinter(String),
        UpdatePrinter(String),
        EvictPrinter(String),
    }

    /// Records every call and drives tasks to completion by copying
    /// whatever "input" path the request names to its "output" path —
    /// enough behavior for recipe pipeline tests to assert on without a
    /// real slicer or serial port (§8 boundary scenarios).
    #[derive(Default)]
    pub struct FakeRegistry {
        calls: Mutex<Vec<RegistryCall>>,
        fail_slice: Mutex<bool>,
    }

    impl FakeRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_fail_slice(&self, fail: bool) {
            *self.fail_slice.lock() = fail;
        }

        pub fn calls(&self) -> Vec<RegistryCall> {
            self.calls.lock().clone()
        }
    }

    impl Registry for FakeRegistry {
        fn slice(&self, request: SliceRequest, task: &Arc<Task>) {
            let fail = *self.fail_slice.lock();
            self.calls.lock().push(RegistryCall::Slice(request.clone()));
            if fail {
                task.fail(pd_core::DispatchError::SlicerFailed(1));
                return;
            }
            let body = "G1 X0 Y0\nG1 X10 Y10\n";
            match std::fs::write(&request.output_toolpath, body) {
                Ok(()) => task.end(None),
                Err(e) => task.fail(pd_core::DispatchError::Io(e)),
            }
        }

        fn print(&self, request: PrintRequest, task: &Arc<Task>) {
            self.calls.lock().push(RegistryCall::Print(request));
            task.end(None);
        }

        fn print_to_file(&self, request: PrintToFileRequest, task: &Arc<Task>) {
            match std::fs::read(&request.toolpath_path) {
                Ok(contents) => {
                    let result = std::fs::write(&request.output_path, contents);
                    self.calls.lock().push(RegistryCall::PrintToFile(request));
                    match result {
                        Ok(()) => task.end(None),
                        Err(e) => task.fail(pd_core::DispatchError::Io(e)),
                    }
                }
                Err(e) => {
                    self.calls.lock().push(RegistryCall::PrintToFile(request));
                    task.fail(pd_core::DispatchError::Io(e));
                }
            }
        }

        fn append_printer(&self, printer: Arc<dyn Printer>) {
            self.calls.lock().push(RegistryCall::AppendPrinter(printer.serial_id().to_string()));
        }

        fn remove_printer(&self, port_id: &str) {
            self.calls.lock().push(RegistryCall::RemovePrinter(port_id.to_string()));
        }

        fn update_printer(&self, serial_id: &str, _temperature: serde_json::Value) {
            self.calls.lock().push(RegistryCall::UpdatePrinter(serial_id.to_string()));
        }

        fn evict_printer(&self, port_id: &str) {
            self.calls.lock().push(RegistryCall::EvictPrinter(port_id.to_string()));
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeRegistry, RegistryCall};
