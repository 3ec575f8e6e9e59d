// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The production `Registry` implementation (§6 "Registry (consumed)"):
//! the one object that ties recipe tasks, the detector, and printer
//! workers together without any of them holding a reference to each
//! other directly (§9 "Shared `_server` back-reference").

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pd_core::{DispatchError, SystemClock, Task};
use pd_engine::adapters::driver::{Driver, FileSink, StreamSink};
use pd_engine::adapters::slicer::{SliceInvocation, SlicerRunner};
use pd_engine::adapters::{PrintRequest, PrintToFileRequest, Printer, Registry, SliceRequest};
use pd_engine::Scratch;

use crate::worker::stream_print;

/// Ties recipe tasks (via `slice`/`print`/`print_to_file`) to a live
/// population of [`crate::worker::PrinterWorker`]s (via
/// `append_printer`/`remove_printer`/`update_printer`/`evict_printer`).
/// Printers are indexed by serial id, matching the original's
/// `appendprinter(printerid, ...)` convention where `printerid` is the
/// device's serial number rather than its transient port path.
pub struct InMemoryRegistry {
    printers: Mutex<HashMap<String, Arc<dyn Printer>>>,
    slicer: Arc<dyn SlicerRunner>,
    slicer_executable: PathBuf,
    slicer_config_path: PathBuf,
    scratch_base: PathBuf,
    default_driver: Arc<dyn Driver>,
    heartbeat_interval: Duration,
}

impl InMemoryRegistry {
    pub fn new(
        slicer: Arc<dyn SlicerRunner>,
        slicer_executable: PathBuf,
        slicer_config_path: PathBuf,
        scratch_base: PathBuf,
        default_driver: Arc<dyn Driver>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            printers: Mutex::new(HashMap::new()),
            slicer,
            slicer_executable,
            slicer_config_path,
            scratch_base,
            default_driver,
            heartbeat_interval,
        }
    }
}

impl Registry for InMemoryRegistry {
    fn slice(&self, request: SliceRequest, task: &Arc<Task>) {
        let scratch = Scratch::new(&self.scratch_base);
        let (start_file, end_file) = match (scratch.path("start.gcode"), scratch.path("end.gcode")) {
            (Ok(start), Ok(end)) => (start, end),
            (Err(e), _) | (_, Err(e)) => {
                task.fail(DispatchError::Io(e));
                return;
            }
        };
        // A slice invocation never inserts start/end gcode itself — the
        // wrap task always owns that — so these scratch files stay empty.
        if let Err(e) = std::fs::write(&start_file, b"").and_then(|()| std::fs::write(&end_file, b"")) {
            task.fail(DispatchError::Io(e));
            scratch.cleanup();
            return;
        }

        let invocation = SliceInvocation {
            executable: self.slicer_executable.clone(),
            config_path: self.slicer_config_path.clone(),
            input_mesh: request.input_mesh,
            output_toolpath: request.output_toolpath,
            start_file,
            end_file,
        };
        match self.slicer.run(&invocation, task) {
            Ok(()) => task.end(None),
            Err(e) => task.fail(e),
        }
        scratch.cleanup();
    }

    fn print(&self, request: PrintRequest, task: &Arc<Task>) {
        let printer = self.printers.lock().get(&request.printer_id).cloned();
        match printer {
            Some(printer) => {
                printer.enqueue(request.build_name, request.toolpath_path, request.skip_start_end, Arc::clone(task));
            }
            None => {
                task.fail(DispatchError::Other(format!("unknown printer {:?}", request.printer_id)));
            }
        }
    }

    fn print_to_file(&self, request: PrintToFileRequest, task: &Arc<Task>) {
        let sink: Arc<parking_lot::Mutex<dyn StreamSink>> = match FileSink::create(&request.output_path) {
            Ok(sink) => Arc::new(parking_lot::Mutex::new(sink)),
            Err(e) => {
                task.fail(DispatchError::Io(e));
                return;
            }
        };

        let clock = SystemClock;
        let result = stream_print(
            self.default_driver.as_ref(),
            &request.profile,
            &request.toolpath_path,
            sink,
            task,
            false,
            self.heartbeat_interval,
            &clock,
        );
        if let Err(err) = result {
            task.fail(err);
        }
    }

    fn append_printer(&self, printer: Arc<dyn Printer>) {
        self.printers.lock().insert(printer.serial_id().to_string(), printer);
    }

    fn remove_printer(&self, port_id: &str) {
        self.printers.lock().retain(|_, printer| printer.port_id() != port_id);
    }

    fn update_printer(&self, serial_id: &str, temperature: serde_json::Value) {
        tracing::trace!(serial_id, %temperature, "printer temperature update");
    }

    fn evict_printer(&self, port_id: &str) {
        self.printers.lock().retain(|_, printer| printer.port_id() != port_id);
    }
}
