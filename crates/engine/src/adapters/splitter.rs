// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The mesh-splitter subprocess (§6, "Mesh-splitter subprocess").
//!
//! Extracts per-extruder meshes from a `.thing` composite container into a
//! scratch directory, producing up to two well-known files the composite
//! planner then probes for (§4.4 "Composite extraction").

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use pd_core::{DispatchError, Task};

/// Well-known output filenames the splitter writes into its scratch
/// directory argument — named for the legacy unified-mesh extraction hack
/// this workspace's splitter binary still implements on disk.
pub const MESH_0: &str = "UNIFIED_MESH_HACK_0.stl";
pub const MESH_1: &str = "UNIFIED_MESH_HACK_1.stl";

pub trait SplitterRunner: Send + Sync {
    /// Invoke `<executable> <input_composite> <scratch_dir>`. A non-zero
    /// exit is surfaced as `DispatchError::SplitterFailed`; the composite
    /// planner maps that to `RecipeError::InvalidComposite` (§4.4).
    fn run(
        &self,
        executable: &Path,
        input_composite: &Path,
        scratch_dir: &Path,
        task: &Arc<Task>,
    ) -> Result<(), DispatchError>;
}

pub struct ProcessSplitterRunner;

impl SplitterRunner for ProcessSplitterRunner {
    fn run(
        &self,
        executable: &Path,
        input_composite: &Path,
        scratch_dir: &Path,
        task: &Arc<Task>,
    ) -> Result<(), DispatchError> {
        super::slicer::run_merged(
            executable,
            &[input_composite.as_os_str(), scratch_dir.as_os_str()],
            task,
            "mesh-splitter",
            DispatchError::SplitterFailed,
        )
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FakeSplitterYield {
        Dual,
        Single0,
        Single1,
        Neither,
    }

    pub struct FakeSplitterRunner {
        yields: FakeSplitterYield,
        fail_with: Option<i32>,
        calls: Mutex<Vec<PathBuf>>,
    }

    impl FakeSplitterRunner {
        pub fn new(yields: FakeSplitterYield) -> Self {
            Self { yields, fail_with: None, calls: Mutex::new(Vec::new()) }
        }

        pub fn failing(code: i32) -> Self {
            Self { yields: FakeSplitterYield::Neither, fail_with: Some(code), calls: Mutex::new(Vec::new()) }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl SplitterRunner for FakeSplitterRunner {
        fn run(
            &self,
            _executable: &Path,
            _input_composite: &Path,
            scratch_dir: &Path,
            _task: &Arc<Task>,
        ) -> Result<(), DispatchError> {
            self.calls.lock().push(scratch_dir.to_path_buf());
            if let Some(code) = self.fail_with {
                return Err(DispatchError::SplitterFailed(code));
            }
            std::fs::create_dir_all(scratch_dir).map_err(DispatchError::Io)?;
            let write = |name: &str| {
                std::fs::write(scratch_dir.join(name), b"solid mesh\nendsolid mesh\n")
                    .map_err(DispatchError::Io)
            };
            match self.yields {
                FakeSplitterYield::Dual => {
                    write(MESH_0)?;
                    write(MESH_1)?;
                }
                FakeSplitterYield::Single0 => write(MESH_0)?,
                FakeSplitterYield::Single1 => write(MESH_1)?,
                FakeSplitterYield::Neither => {}
            }
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeSplitterRunner, FakeSplitterYield};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_splitter_writes_both_meshes_on_dual_yield() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeSplitterRunner::new(FakeSplitterYield::Dual);
        let task = Arc::new(Task::new());
        runner.run(Path::new("splitter"), Path::new("z.thing"), dir.path(), &task).unwrap();
        assert!(dir.path().join(MESH_0).exists());
        assert!(dir.path().join(MESH_1).exists());
    }

    #[test]
    fn fake_splitter_failure_surfaces_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeSplitterRunner::failing(3);
        let task = Arc::new(Task::new());
        let err = runner.run(Path::new("splitter"), Path::new("z.thing"), dir.path(), &task).unwrap_err();
        assert!(matches!(err, DispatchError::SplitterFailed(3)));
    }
}
