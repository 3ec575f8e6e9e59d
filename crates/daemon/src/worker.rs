// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Printer worker (§4.6): one per attached device, owns the serial
//! handle, drains a FIFO job queue, and interleaves periodic
//! temperature polling with job execution. Grounded in
//! `S3gPrinterThread`/`S3gDriver` from the original implementation's
//! `printer/s3g.py` — the stateless-driver-per-print, queue-pop,
//! idle-poll-else-wait structure is carried over line for line; only
//! the concrete driver/sink types differ (this workspace's `Driver`
//! trait seam instead of a hardwired S3G seam).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex as PMutex};
use serde_json::json;

use pd_core::{Clock, DispatchError, Progress, Task, TaskState};
use pd_engine::adapters::driver::{stop_sink_on_cancel, DriverError, StreamSink};
use pd_engine::adapters::{Driver, Printer, Registry};
use pd_engine::Profile;

use crate::detector::Blacklist;
use crate::device::NullSink;

/// Reads every key under `tools` and every key under `heated_platforms`
/// (§10.7 supplemental feature: the original iterates the *full*
/// profile surface, not one representative sensor).
pub fn read_temperatures(driver: &dyn Driver, profile: &Profile) -> serde_json::Value {
    let mut tools = serde_json::Map::new();
    for index in profile.tool_indices() {
        if let Ok(temp) = driver.get_toolhead_temperature(index) {
            tools.insert(index.to_string(), json!(temp));
        }
    }
    let mut platforms = serde_json::Map::new();
    for index in profile.platform_indices() {
        if let Ok(temp) = driver.get_platform_temperature(index) {
            platforms.insert(index.to_string(), json!(temp));
        }
    }
    json!({ "tools": tools, "heated_platforms": platforms })
}

/// A forwarding `StreamSink` over a shared handle, so the owning task's
/// `stopped_event` (via [`stop_sink_on_cancel`]) and the stream loop's
/// own writes both reach the same underlying sink — `Driver::new_session`
/// wants an owned `Box<dyn StreamSink>`, but cancellation needs shared
/// access to the same sink (§4.4 "Print / print-to-file task").
struct ForwardingSink(Arc<PMutex<dyn StreamSink>>);

impl StreamSink for ForwardingSink {
    fn write_frame(&mut self, line: &str) -> Result<(), DriverError> {
        self.0.lock().write_frame(line)
    }

    fn set_external_stop(&mut self) {
        self.0.lock().set_external_stop();
    }
}

/// Stream a single already-wrapped toolpath file to `sink` (§4.6
/// "Stream print"). Shared between the printer worker's live print and
/// the registry's print-to-file path, since both are the same stream
/// loop over a different sink.
///
/// Cancellation: breaks out of the loop as soon as `task` is no longer
/// RUNNING, and the task's `stopped_event` has already been wired (by
/// the caller, via [`stop_sink_on_cancel`]) to call
/// [`StreamSink::set_external_stop`] on `sink`, so an in-flight blocking
/// write also unblocks promptly.
#[allow(clippy::too_many_arguments)]
pub fn stream_print(
    driver: &dyn Driver,
    profile: &Profile,
    toolpath_path: &Path,
    sink: Arc<PMutex<dyn StreamSink>>,
    task: &Arc<Task>,
    poll_temperature: bool,
    poll_interval: Duration,
    clock: &impl Clock,
) -> Result<(), DispatchError> {
    stop_sink_on_cancel(task, Arc::clone(&sink));
    let mut session = driver.new_session(Box::new(ForwardingSink(sink)));

    let contents = std::fs::read_to_string(toolpath_path).map_err(DispatchError::Io)?;
    // Keep line terminators attached so `currentbyte` matches file
    // position exactly, the same invariant the original's `_genericprint`
    // preserves by incrementing `currentbyte` before stripping whitespace.
    let lines: Vec<&str> = contents.split_inclusive('\n').collect();
    let totallines = lines.len() as u64;
    let totalbytes: u64 = lines.iter().map(|l| l.len() as u64).sum();

    let mut currentbyte: u64 = 0;
    let mut next_poll = clock.now() + poll_interval;
    for (currentline, raw) in lines.iter().enumerate() {
        if task.state() != TaskState::Running {
            break;
        }
        currentbyte += raw.len() as u64;
        let trimmed = raw.trim();
        session
            .execute_line(trimmed)
            .map_err(|err| DispatchError::Other(err.to_string()))?;

        let now = clock.now();
        if now >= next_poll || currentline as u64 + 1 == totallines {
            next_poll = now + poll_interval;
            let mut progress = Progress::new("print")
                .with("currentline", currentline as u64)
                .with("totallines", totallines)
                .with("currentbyte", currentbyte)
                .with("totalbytes", totalbytes);
            if poll_temperature {
                progress = progress.with("temperature", read_temperatures(driver, profile));
            }
            task.lazy_heartbeat(progress);
        }
    }

    if task.state() != TaskState::Stopped {
        task.end(None);
    }
    Ok(())
}

/// One pending print, queued by `PrinterWorker::print` (§4.4 "Print task",
/// §4.6 "Queue discipline").
pub struct QueueItem {
    pub build_name: String,
    pub toolpath_path: PathBuf,
    #[allow(dead_code)] // forwarded for interface parity; see DESIGN.md
    pub skip_start_end: bool,
    pub task: Arc<Task>,
}

struct WorkerState {
    queue: VecDeque<QueueItem>,
    current_task: Option<Arc<Task>>,
}

/// One printer worker thread, bound to a single attached port for its
/// whole lifetime (§4.6). Implements [`Printer`] so the registry can
/// hold it directly as the published printer record.
pub struct PrinterWorker<C: Clock> {
    port_id: String,
    serial_id: String,
    profile: Profile,
    driver: Arc<dyn Driver>,
    registry: Arc<dyn Registry>,
    blacklist: Arc<dyn Blacklist>,
    clock: C,
    temp_poll_interval: Duration,
    state: PMutex<WorkerState>,
    condvar: Condvar,
    stop: AtomicBool,
}

impl<C: Clock + 'static> PrinterWorker<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        port_id: impl Into<String>,
        serial_id: impl Into<String>,
        profile: Profile,
        driver: Arc<dyn Driver>,
        registry: Arc<dyn Registry>,
        blacklist: Arc<dyn Blacklist>,
        clock: C,
        temp_poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            port_id: port_id.into(),
            serial_id: serial_id.into(),
            profile,
            driver,
            registry,
            blacklist,
            clock,
            temp_poll_interval,
            state: PMutex::new(WorkerState { queue: VecDeque::new(), current_task: None }),
            condvar: Condvar::new(),
        stop: AtomicBool::new(false),
        })
    }

    /// Queue a print (§4.4, §4.6). Pushed to the tail; `run`'s loop pops
    /// from the head — plain FIFO.
    pub fn print(&self, item: QueueItem) {
        self.state.lock().queue.push_back(item);
        self.condvar.notify_all();
    }

    /// Signal the loop to stop, cancel whatever is currently printing,
    /// and wake it immediately (§4.6 "Stop").
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let current = self.state.lock().current_task.clone();
        if let Some(task) = current {
            task.cancel(Some("worker stopping".to_string()));
        }
        self.condvar.notify_all();
    }

    /// Main loop (§4.6 "Main loop"). Runs until `stop()` is called or an
    /// unhandled error evicts the printer.
    pub fn run(self: &Arc<Self>) {
        let mut next_poll = self.clock.now();
        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let item = {
                let mut guard = self.state.lock();
                guard.queue.pop_front()
            };

            match item {
                None => {
                    let now = self.clock.now();
                    if now >= next_poll {
                        next_poll = now + self.temp_poll_interval;
                        let temperature = read_temperatures(self.driver.as_ref(), &self.profile);
                        self.registry.update_printer(&self.serial_id, temperature);
                    }
                    let mut guard = self.state.lock();
                    if !guard.queue.is_empty() || self.stop.load(Ordering::SeqCst) {
                        continue;
                    }
                    self.condvar.wait_for(&mut guard, Duration::from_secs(1));
                }
                Some(item) => {
                    if let Err(err) = self.run_one(item) {
                        tracing::error!(port_id = %self.port_id, %err, "printer worker evicting after unhandled error");
                        self.registry.evict_printer(&self.port_id);
                        self.blacklist.blacklist(&self.port_id);
                        break;
                    }
                }
            }
        }
    }

    fn run_one(self: &Arc<Self>, item: QueueItem) -> Result<(), DispatchError> {
        {
            let mut guard = self.state.lock();
            guard.current_task = Some(Arc::clone(&item.task));
        }
        let worker = Arc::clone(self);
        item.task.stopped_event.attach(move |_| {
            worker.state.lock().current_task = None;
        });

        let sink: Arc<PMutex<dyn StreamSink>> = Arc::new(PMutex::new(NullSink::new()));
        stream_print(
            self.driver.as_ref(),
            &self.profile,
            &item.toolpath_path,
            sink,
            &item.task,
            true,
            self.temp_poll_interval,
            &self.clock,
        )
    }
}

impl<C: Clock> Printer for PrinterWorker<C> {
    fn port_id(&self) -> &str {
        &self.port_id
    }

    fn serial_id(&self) -> &str {
        &self.serial_id
    }

    fn enqueue(&self, build_name: String, toolpath_path: PathBuf, skip_start_end: bool, task: Arc<Task>) {
        self.print(QueueItem { build_name, toolpath_path, skip_start_end, task });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pd_core::{FakeClock, SystemClock};
    use pd_engine::adapters::driver::FakeDriver;
    use pd_engine::adapters::registry::FakeRegistry;

    struct NoopBlacklist;
    impl Blacklist for NoopBlacklist {
        fn blacklist(&self, _port_id: &str) {}
    }

    #[test]
    fn stream_print_ends_task_and_reports_totals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.gcode");
        std::fs::write(&path, "G1 X0\nG1 X1\n").unwrap();

        let driver = FakeDriver::new();
        let task = Arc::new(Task::new());
        task.start();
        let heartbeats = Arc::new(PMutex::new(Vec::new()));
        let hb = Arc::clone(&heartbeats);
        task.heartbeat_event.attach(move |p| hb.lock().push(p));

        let sink: Arc<PMutex<dyn StreamSink>> = Arc::new(PMutex::new(NullSink::new()));
        let clock = SystemClock;
        stream_print(&driver, &Profile::new("x"), &path, sink, &task, false, Duration::from_millis(0), &clock)
            .unwrap();

        assert_eq!(task.state(), TaskState::Ended);
        let last = heartbeats.lock().last().cloned().unwrap();
        assert_eq!(last.fields.get("totallines").unwrap(), &json!(2));
        assert_eq!(last.fields.get("totalbytes").unwrap(), &json!(12u64));
    }

    #[test]
    fn stream_print_stops_without_ending_when_cancelled_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.gcode");
        std::fs::write(&path, "G1 X0\nG1 X1\nG1 X2\n").unwrap();

        let driver = FakeDriver::new();
        let task = Arc::new(Task::new());
        task.start();
        task.cancel(None);

        let sink: Arc<PMutex<dyn StreamSink>> = Arc::new(PMutex::new(NullSink::new()));
        let clock = SystemClock;
        stream_print(&driver, &Profile::new("x"), &path, sink, &task, false, Duration::from_millis(0), &clock)
            .unwrap();

        assert_eq!(task.state(), TaskState::Stopped);
    }

    #[test]
    fn worker_streams_queued_job_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.gcode");
        std::fs::write(&path, "G1 X0\n").unwrap();

        let registry = Arc::new(FakeRegistry::new());
        let worker = PrinterWorker::new(
            "port-1",
            "serial-1",
            Profile::new("replicator"),
            Arc::new(FakeDriver::new()),
            Arc::clone(&registry) as Arc<dyn Registry>,
            Arc::new(NoopBlacklist),
            FakeClock::new(),
            Duration::from_millis(10),
        );

        let task = Arc::new(Task::new());
        task.start();
        worker.print(QueueItem {
            build_name: "job".to_string(),
            toolpath_path: path,
            skip_start_end: false,
            task: Arc::clone(&task),
        });

        let worker_for_thread = Arc::clone(&worker);
        let handle = std::thread::spawn(move || worker_for_thread.run());
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while task.state() == TaskState::Running && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        worker.stop();
        handle.join().unwrap();

        assert_eq!(task.state(), TaskState::Ended);
    }
}
