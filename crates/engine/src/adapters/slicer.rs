// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The slicer subprocess (§6, "Slicer subprocess").
//!
//! A production [`Registry`](super::Registry) implementation composes a
//! [`SlicerRunner`] to fulfil `slice` requests; `pd-engine` only needs the
//! trait to describe the seam and a runnable default for binaries that
//! actually have a slicer on `PATH`.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use pd_core::{DispatchError, Task};

/// Everything the slicer binary needs, assembled by the slice task
/// (§4.4): the input mesh, the destination toolpath, and the start/end
/// prefix/suffix files the slicer is told about but the default pipeline
/// leaves empty (start/end insertion is the wrap task's job, not the
/// slicer's — `with_start_end` is always passed as `false`).
#[derive(Debug, Clone)]
pub struct SliceInvocation {
    pub executable: PathBuf,
    pub config_path: PathBuf,
    pub input_mesh: PathBuf,
    pub output_toolpath: PathBuf,
    pub start_file: PathBuf,
    pub end_file: PathBuf,
}

/// Runs the slicer binary described by a [`SliceInvocation`]. Cancellation
/// of the owning task must terminate the child process (§5 "Subprocess
/// cancellation").
pub trait SlicerRunner: Send + Sync {
    fn run(&self, invocation: &SliceInvocation, task: &Arc<Task>) -> Result<(), DispatchError>;
}

/// Spawns the real slicer binary with the argument order specified in §6:
/// `<executable> -c <config> -o <output> -s <start> -e <end> <input>`.
pub struct ProcessSlicerRunner;

impl SlicerRunner for ProcessSlicerRunner {
    fn run(&self, invocation: &SliceInvocation, task: &Arc<Task>) -> Result<(), DispatchError> {
        run_merged(
            &invocation.executable,
            &[
                "-c".as_ref(),
                invocation.config_path.as_os_str(),
                "-o".as_ref(),
                invocation.output_toolpath.as_os_str(),
                "-s".as_ref(),
                invocation.start_file.as_os_str(),
                "-e".as_ref(),
                invocation.end_file.as_os_str(),
                invocation.input_mesh.as_os_str(),
            ],
            task,
            "slicer",
            DispatchError::SlicerFailed,
        )
    }
}

/// Spawn `executable` with `args`, merging stdout/stderr and logging each
/// line at `info` under `label`, terminating the child if `task` is
/// cancelled mid-run, and mapping a non-zero exit code through `on_failure`.
pub(crate) fn run_merged(
    executable: &Path,
    args: &[&std::ffi::OsStr],
    task: &Arc<Task>,
    label: &'static str,
    on_failure: impl FnOnce(i32) -> DispatchError,
) -> Result<(), DispatchError> {
    let mut child = Command::new(executable)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(DispatchError::Io)?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let child = Arc::new(Mutex::new(child));

    let child_for_stop = Arc::clone(&child);
    task.stopped_event.attach(move |_| {
        if let Err(err) = child_for_stop.lock().kill() {
            if err.kind() != std::io::ErrorKind::InvalidInput {
                tracing::debug!(%err, "terminating subprocess on cancel");
            }
        }
    });

    if let Some(stdout) = stdout {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            tracing::info!(%label, "{line}");
        }
    }
    if let Some(stderr) = stderr {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            tracing::info!(%label, "{line}");
        }
    }

    let status = child.lock().wait().map_err(DispatchError::Io)?;
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(on_failure(code)),
        None => Err(on_failure(-1)),
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone)]
    pub struct SliceCall {
        pub invocation: SliceInvocation,
    }

    /// Records invocations and writes a fixed line count to the requested
    /// output path rather than shelling out, for deterministic recipe
    /// tests (§8 boundary scenarios).
    pub struct FakeSlicerRunner {
        calls: Mutex<Vec<SliceCall>>,
        lines: Vec<String>,
        fail_with: Option<i32>,
    }

    impl Default for FakeSlicerRunner {
        fn default() -> Self {
            Self::new(vec!["G1 X0 Y0".to_string(), "G1 X10 Y10".to_string()])
        }
    }

    impl FakeSlicerRunner {
        pub fn new(lines: Vec<String>) -> Self {
            Self { calls: Mutex::new(Vec::new()), lines, fail_with: None }
        }

        pub fn failing(code: i32) -> Self {
            Self { calls: Mutex::new(Vec::new()), lines: Vec::new(), fail_with: Some(code) }
        }

        pub fn calls(&self) -> Vec<SliceCall> {
            self.calls.lock().clone()
        }
    }

    impl SlicerRunner for FakeSlicerRunner {
        fn run(&self, invocation: &SliceInvocation, _task: &Arc<Task>) -> Result<(), DispatchError> {
            self.calls.lock().push(SliceCall { invocation: invocation.clone() });
            if let Some(code) = self.fail_with {
                return Err(DispatchError::SlicerFailed(code));
            }
            std::fs::write(&invocation.output_toolpath, self.lines.join("\n") + "\n")
                .map_err(DispatchError::Io)
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeSlicerRunner, SliceCall};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_slicer_writes_output_and_records_call() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeSlicerRunner::default();
        let invocation = SliceInvocation {
            executable: "miracle_grue".into(),
            config_path: "config.json".into(),
            input_mesh: dir.path().join("in.stl"),
            output_toolpath: dir.path().join("out.gcode"),
            start_file: dir.path().join("start.gcode"),
            end_file: dir.path().join("end.gcode"),
        };
        let task = Arc::new(Task::new());
        runner.run(&invocation, &task).unwrap();
        assert!(invocation.output_toolpath.exists());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn fake_slicer_failure_surfaces_exit_code() {
        let runner = FakeSlicerRunner::failing(2);
        let dir = tempfile::tempdir().unwrap();
        let invocation = SliceInvocation {
            executable: "miracle_grue".into(),
            config_path: "config.json".into(),
            input_mesh: dir.path().join("in.stl"),
            output_toolpath: dir.path().join("out.gcode"),
            start_file: dir.path().join("start.gcode"),
            end_file: dir.path().join("end.gcode"),
        };
        let task = Arc::new(Task::new());
        let err = runner.run(&invocation, &task).unwrap_err();
        assert!(matches!(err, DispatchError::SlicerFailed(2)));
    }
}
