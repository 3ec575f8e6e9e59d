// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The recipe planner (§4.4): classifies a [`Job`] by input kind and
//! builds the ordered [`Process`] pipeline that carries it out.
//!
//! A [`Recipe`] is bound to a job and its resolved input paths — one
//! toolpath, one mesh, or the one or two meshes recovered from a
//! composite container — via [`Recipe::plan`]. From there, `print`,
//! `printtofile`, and `slice` each build the pipeline for that mode,
//! mirroring the original's `_GcodeRecipe`/`_StlRecipe`/
//! `_SingleThingRecipe`/`_DualThingRecipe` split without the class
//! hierarchy (§9 design notes: recipes become a tagged variant).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex as PMutex;
use pd_core::{
    DispatchError, Job, JobKind, Material, PrintToFileType, Process, Progress, RecipeError,
    SlicerSettings, Task,
};

use crate::adapters::{Driver, PrintRequest, PrintToFileRequest, Registry, SliceRequest, SplitterRunner};
use crate::gcode::{self, DualstrusionProgressProcessor, GcodeProcessor};
use crate::profile::Profile;
use crate::scratch::Scratch;

/// The external collaborators and scratch space a recipe needs to build
/// and run its pipeline. One `RecipeEnv` (and the `Scratch` it carries) is
/// constructed per submitted job by whatever assembles the daemon.
#[derive(Clone)]
pub struct RecipeEnv {
    pub registry: Arc<dyn Registry>,
    pub driver: Arc<dyn Driver>,
    pub splitter: Arc<dyn SplitterRunner>,
    pub splitter_executable: PathBuf,
    pub profile: Profile,
    pub scratch: Arc<Scratch>,
}

/// A job's input, resolved to concrete filesystem paths (§9: tagged
/// variant replacing the original's recipe class hierarchy).
enum RecipeKind {
    Gcode { toolpath: PathBuf },
    Stl { mesh: PathBuf },
    SingleComposite { mesh: PathBuf },
    DualComposite { mesh0: PathBuf, mesh1: PathBuf },
}

/// Either shape a mesh pipeline can start from — a single extruder's mesh,
/// or a per-extruder pair destined for the dualstrusion weave.
enum MeshInput {
    Single(PathBuf),
    Dual(PathBuf, PathBuf),
}

/// A planned, runnable recipe bound to one job.
pub struct Recipe {
    job: Job,
    kind: RecipeKind,
    env: RecipeEnv,
}

impl Recipe {
    /// Classify `job` and resolve its input to concrete paths (§4.4
    /// "Dispatch"). Composite containers are extracted synchronously here
    /// — extraction happens once, at plan time, before any task in the
    /// returned recipe's eventual pipeline exists.
    pub fn plan(job: Job, env: RecipeEnv) -> Result<Self, RecipeError> {
        let kind = match job.kind()? {
            JobKind::Toolpath => {
                check_exists_is_file(&job.path)?;
                RecipeKind::Gcode { toolpath: job.path.clone() }
            }
            JobKind::Mesh => {
                check_exists_is_file(&job.path)?;
                RecipeKind::Stl { mesh: job.path.clone() }
            }
            JobKind::Composite => {
                if !job.path.exists() {
                    return Err(RecipeError::MissingFile(job.path.clone()));
                }
                extract_composite(&job.path, &env)?
            }
        };
        Ok(Self { job, kind, env })
    }

    /// Build the `print` pipeline (§4.4 table, `print` row): stream the
    /// wrapped toolpath to the named printer's queue.
    pub fn print(&self, printer_id: impl Into<String>) -> Result<Process, DispatchError> {
        let printer_id = printer_id.into();
        let build_name = self.job.build_name.clone();
        let skip_start_end = self.job.skip_start_end;

        let tasks = match &self.kind {
            RecipeKind::Gcode { toolpath } => {
                let wrapped = self.env.scratch.path("wrapped.gcode").map_err(DispatchError::Io)?;
                vec![
                    wrap_task(
                        &self.env,
                        self.job.slicer_settings.clone(),
                        self.job.material.clone(),
                        self.job.with_start_end,
                        false,
                        toolpath.clone(),
                        wrapped.clone(),
                    ),
                    print_task(&self.env, printer_id, build_name, wrapped, skip_start_end),
                ]
            }
            RecipeKind::Stl { mesh } | RecipeKind::SingleComposite { mesh } => {
                let output = self.env.scratch.path("print.gcode").map_err(DispatchError::Io)?;
                let mut tasks = self.mesh_tasks(
                    &MeshInput::Single(mesh.clone()),
                    self.job.with_start_end,
                    output.clone(),
                    false,
                )?;
                tasks.push(print_task(&self.env, printer_id, build_name, output, skip_start_end));
                tasks
            }
            RecipeKind::DualComposite { mesh0, mesh1 } => {
                let output = self.env.scratch.path("print.gcode").map_err(DispatchError::Io)?;
                let mut tasks = self.mesh_tasks(
                    &MeshInput::Dual(mesh0.clone(), mesh1.clone()),
                    self.job.with_start_end,
                    output.clone(),
                    false,
                )?;
                tasks.push(print_task(&self.env, printer_id, build_name, output, skip_start_end));
                tasks
            }
        };

        Ok(self.build_process(tasks))
    }

    /// Build the `printtofile` pipeline (§4.4 table, `printtofile` row):
    /// render the wrapped toolpath to a binary artifact and verify it.
    pub fn printtofile(&self, output_path: PathBuf) -> Result<Process, DispatchError> {
        let build_name = self.job.build_name.clone();
        let skip_start_end = self.job.skip_start_end;
        let print_to_file_type = self.job.print_to_file_type;

        let tasks = match &self.kind {
            RecipeKind::Gcode { toolpath } => {
                let wrapped = self.env.scratch.path("wrapped.gcode").map_err(DispatchError::Io)?;
                vec![
                    wrap_task(
                        &self.env,
                        self.job.slicer_settings.clone(),
                        self.job.material.clone(),
                        self.job.with_start_end,
                        false,
                        toolpath.clone(),
                        wrapped.clone(),
                    ),
                    print_to_file_task(
                        &self.env,
                        build_name,
                        wrapped,
                        output_path.clone(),
                        skip_start_end,
                        print_to_file_type,
                    ),
                    verify_task(&self.env, output_path),
                ]
            }
            RecipeKind::Stl { mesh } | RecipeKind::SingleComposite { mesh } => {
                let wrapped = self.env.scratch.path("wrapped.gcode").map_err(DispatchError::Io)?;
                let mut tasks = self.mesh_tasks(
                    &MeshInput::Single(mesh.clone()),
                    self.job.with_start_end,
                    wrapped.clone(),
                    false,
                )?;
                tasks.push(print_to_file_task(
                    &self.env,
                    build_name,
                    wrapped,
                    output_path.clone(),
                    skip_start_end,
                    print_to_file_type,
                ));
                tasks.push(verify_task(&self.env, output_path));
                tasks
            }
            RecipeKind::DualComposite { mesh0, mesh1 } => {
                let wrapped = self.env.scratch.path("wrapped.gcode").map_err(DispatchError::Io)?;
                let mut tasks = self.mesh_tasks(
                    &MeshInput::Dual(mesh0.clone(), mesh1.clone()),
                    self.job.with_start_end,
                    wrapped.clone(),
                    false,
                )?;
                tasks.push(print_to_file_task(
                    &self.env,
                    build_name,
                    wrapped,
                    output_path.clone(),
                    skip_start_end,
                    print_to_file_type,
                ));
                tasks.push(verify_task(&self.env, output_path));
                tasks
            }
        };

        Ok(self.build_process(tasks))
    }

    /// Build the `slice` pipeline (§4.4 table, `slice` row): produce a
    /// wrapped toolpath with no print/print-to-file stage. Undefined for a
    /// toolpath input, same as the original's `_GcodeRecipe`, which never
    /// overrides `slice`.
    pub fn slice(&self, output_toolpath: PathBuf) -> Result<Process, DispatchError> {
        let tasks = match &self.kind {
            RecipeKind::Gcode { .. } => {
                return Err(DispatchError::Other(
                    "slice mode is not defined for a toolpath input".to_string(),
                ));
            }
            RecipeKind::Stl { mesh } | RecipeKind::SingleComposite { mesh } => self.mesh_tasks(
                &MeshInput::Single(mesh.clone()),
                self.job.with_start_end,
                output_toolpath,
                false,
            )?,
            RecipeKind::DualComposite { mesh0, mesh1 } => self.mesh_tasks(
                &MeshInput::Dual(mesh0.clone(), mesh1.clone()),
                self.job.with_start_end,
                output_toolpath,
                // The dual `slice` pipeline always runs the post-process
                // stage, even with an empty processor list — unlike the
                // dual print/printtofile pipelines, which skip it (§4.4
                // table: bracket on `print`/`printtofile`, none on `slice`).
                true,
            )?,
        };

        Ok(self.build_process(tasks))
    }

    /// Build `[slice, [post-process]]` (single mesh) or
    /// `[slice₀, slice₁, weave, [post-process]]` (dual mesh), followed by
    /// a wrap task writing to `output` (§4.4 "Pipelines", "Dual slice
    /// parameterization").
    fn mesh_tasks(
        &self,
        mesh: &MeshInput,
        with_start_end: bool,
        output: PathBuf,
        force_postprocess: bool,
    ) -> Result<Vec<Arc<Task>>, DispatchError> {
        let mut tasks = Vec::new();
        let dualstrusion = matches!(mesh, MeshInput::Dual(..));

        let sliced_path = match mesh {
            MeshInput::Single(path) => {
                let out = self.env.scratch.path("slice.gcode").map_err(DispatchError::Io)?;
                tasks.push(slice_task(
                    &self.env,
                    self.job.slicer_settings.clone(),
                    self.job.material.clone(),
                    path.clone(),
                    out.clone(),
                    false,
                ));
                out
            }
            MeshInput::Dual(mesh0, mesh1) => {
                let out0 = self.env.scratch.path("slice0.gcode").map_err(DispatchError::Io)?;
                let out1 = self.env.scratch.path("slice1.gcode").map_err(DispatchError::Io)?;
                tasks.push(slice_task(
                    &self.env,
                    self.job.slicer_settings.for_extruder(0),
                    self.job.material.clone(),
                    mesh0.clone(),
                    out0.clone(),
                    true,
                ));
                tasks.push(slice_task(
                    &self.env,
                    self.job.slicer_settings.for_extruder(1),
                    self.job.material.clone(),
                    mesh1.clone(),
                    out1.clone(),
                    true,
                ));
                let woven = self.env.scratch.path("dualstrusion.gcode").map_err(DispatchError::Io)?;
                tasks.push(weave_task(out0, out1, woven.clone()));
                woven
            }
        };

        let names = gcode::select_gcodeprocessors(&self.job, &self.env.profile);
        let processed_path = if names.is_empty() && !force_postprocess {
            sliced_path
        } else {
            let out = self.env.scratch.path("processed.gcode").map_err(DispatchError::Io)?;
            tasks.push(postprocess_task(names, sliced_path, out.clone()));
            out
        };

        tasks.push(wrap_task(
            &self.env,
            self.job.slicer_settings.clone(),
            self.job.material.clone(),
            with_start_end,
            dualstrusion,
            processed_path,
            output,
        ));
        Ok(tasks)
    }

    /// Wire the scratch directory's removal to the composite's
    /// `stopped_event` rather than `end_event` (§9, §10.7) so cleanup runs
    /// whether the pipeline succeeded, failed, or was cancelled.
    fn build_process(&self, tasks: Vec<Arc<Task>>) -> Process {
        let process = Process::new(tasks);
        let scratch = Arc::clone(&self.env.scratch);
        process.task().stopped_event.attach(move |_| {
            scratch.cleanup();
        });
        process
    }
}

fn check_exists_is_file(path: &Path) -> Result<(), RecipeError> {
    if !path.exists() {
        return Err(RecipeError::MissingFile(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(RecipeError::NotFile(path.to_path_buf()));
    }
    Ok(())
}

/// Extract up to two per-extruder meshes from a composite container via
/// the mesh-splitter subprocess (§4.4 "Composite extraction"). Runs once,
/// synchronously, at plan time — there is no outer task yet for a client
/// to cancel this against.
fn extract_composite(path: &Path, env: &RecipeEnv) -> Result<RecipeKind, RecipeError> {
    let scratch_dir = env
        .scratch
        .path("composite-extraction")
        .map_err(|_| RecipeError::InvalidComposite(path.to_path_buf()))?;
    std::fs::create_dir_all(&scratch_dir)
        .map_err(|_| RecipeError::InvalidComposite(path.to_path_buf()))?;

    let extraction_task = Arc::new(Task::new());
    if let Err(err) = env.splitter.run(&env.splitter_executable, path, &scratch_dir, &extraction_task) {
        tracing::error!(%err, path = %path.display(), "mesh splitter failed to extract composite");
        return Err(RecipeError::InvalidComposite(path.to_path_buf()));
    }

    let mesh0 = scratch_dir.join(crate::adapters::splitter::MESH_0);
    let mesh1 = scratch_dir.join(crate::adapters::splitter::MESH_1);
    match (mesh0.exists(), mesh1.exists()) {
        (true, true) => Ok(RecipeKind::DualComposite { mesh0, mesh1 }),
        (true, false) => Ok(RecipeKind::SingleComposite { mesh: mesh0 }),
        (false, true) => Ok(RecipeKind::SingleComposite { mesh: mesh1 }),
        (false, false) => Err(RecipeError::InvalidComposite(path.to_path_buf())),
    }
}

/// Every stage task shares this shape: a `Task` whose `running_event`
/// kicks the actual (possibly blocking) work off on its own thread, so
/// `Process::start`/a child's `end_event` handler never stalls waiting for
/// a subprocess or a file op to finish (§5 "Scheduling model").
fn spawn_task<F>(body: F) -> Arc<Task>
where
    F: FnOnce(Arc<Task>) + Send + 'static,
{
    let task = Arc::new(Task::new());
    let slot = PMutex::new(Some(body));
    let task_for_handler = Arc::clone(&task);
    task.running_event.attach(move |_| {
        if let Some(body) = slot.lock().take() {
            let task = Arc::clone(&task_for_handler);
            std::thread::spawn(move || body(task));
        }
    });
    task
}

/// §4.4 "Slice task". `with_start_end` is always passed as `false` to the
/// registry — start/end insertion is always the wrap task's job.
fn slice_task(
    env: &RecipeEnv,
    settings: SlicerSettings,
    material: Material,
    input_mesh: PathBuf,
    output_toolpath: PathBuf,
    dualstrusion: bool,
) -> Arc<Task> {
    let registry = Arc::clone(&env.registry);
    let profile = env.profile.clone();
    spawn_task(move |task| {
        tracing::info!(
            input = %input_mesh.display(),
            output = %output_toolpath.display(),
            "slicing",
        );
        registry.slice(
            SliceRequest { profile, input_mesh, output_toolpath, settings, material, dualstrusion },
            &task,
        );
    })
}

/// §4.4 "Post-process task": apply each named processor to the toolpath's
/// lines in order, failing on the first one that rejects them.
fn postprocess_task(names: Vec<String>, input: PathBuf, output: PathBuf) -> Arc<Task> {
    spawn_task(move |task| {
        tracing::info!(input = %input.display(), output = %output.display(), "post-processing gcode");
        match run_postprocess(&names, &input, &output) {
            Ok(()) => task.end(None),
            Err(e) => task.fail(e),
        }
    })
}

fn run_postprocess(names: &[String], input: &Path, output: &Path) -> Result<(), DispatchError> {
    let mut lines = read_lines(input)?;
    for name in names {
        let processor = gcode::resolve(name)?;
        lines = processor.process(lines)?;
    }
    write_lines(output, &lines)
}

/// §4.4 "Weave task (dualstrusion)": combine two per-extruder toolpaths
/// and apply the dualstrusion progress processor to the result.
fn weave_task(path0: PathBuf, path1: PathBuf, output: PathBuf) -> Arc<Task> {
    spawn_task(move |task| {
        tracing::info!(
            a = %path0.display(),
            b = %path1.display(),
            output = %output.display(),
            "weaving dualstrusion toolpaths",
        );
        match run_weave(&path0, &path1, &output) {
            Ok(()) => task.end(None),
            Err(e) => task.fail(e),
        }
    })
}

fn run_weave(path0: &Path, path1: &Path, output: &Path) -> Result<(), DispatchError> {
    let lines0 = read_lines(path0)?;
    let lines1 = read_lines(path1)?;
    let woven = interleave(lines0, lines1);
    let woven = DualstrusionProgressProcessor.process(woven)?;
    write_lines(output, &woven)
}

/// The actual weaving algorithm (temperature-aware interleaving that keeps
/// both extruders primed) is an external collaborator out of scope here,
/// same as the slicer and mesh-splitter (§1 "Explicitly out of scope").
/// This keeps the pipeline's shape and cancellation/progress semantics
/// correct without claiming to reproduce that algorithm.
fn interleave(a: Vec<String>, b: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut a = a.into_iter();
    let mut b = b.into_iter();
    loop {
        match (a.next(), b.next()) {
            (Some(x), Some(y)) => {
                out.push(x);
                out.push(y);
            }
            (Some(x), None) => out.push(x),
            (None, Some(y)) => out.push(y),
            (None, None) => break,
        }
    }
    out
}

/// §4.4 "Wrap task": always resolves the driver's start/end variables
/// (matching the original, which computes them unconditionally), but only
/// emits start/end lines around the body when `with_start_end` is set.
fn wrap_task(
    env: &RecipeEnv,
    settings: SlicerSettings,
    material: Material,
    with_start_end: bool,
    dualstrusion: bool,
    input: PathBuf,
    output: PathBuf,
) -> Arc<Task> {
    let driver = Arc::clone(&env.driver);
    let profile = env.profile.clone();
    spawn_task(move |task| {
        tracing::info!(
            output = %output.display(),
            with_start_end,
            "writing toolpath with{} start/end gcode",
            if with_start_end { "" } else { "out" },
        );
        match run_wrap(&driver, &profile, &settings, &material, with_start_end, dualstrusion, &input, &output)
        {
            Ok(()) => task.end(None),
            Err(e) => task.fail(e),
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn run_wrap(
    driver: &Arc<dyn Driver>,
    profile: &Profile,
    settings: &SlicerSettings,
    material: &Material,
    with_start_end: bool,
    dualstrusion: bool,
    input: &Path,
    output: &Path,
) -> Result<(), DispatchError> {
    let variables = driver.start_end_variables(profile, settings, material, dualstrusion)?;
    let body = std::fs::read_to_string(input).map_err(DispatchError::Io)?;

    let mut out = String::new();
    if with_start_end {
        for line in &variables.start_lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push_str(&body);
    if with_start_end {
        for line in &variables.end_lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    std::fs::write(output, out).map_err(DispatchError::Io)
}

/// §4.4 "Print / print-to-file task": submits onto the owning printer's
/// queue via the registry. Cancellation is translated into the
/// underlying writer's external-stop by the registry's own implementation
/// (§5 "Subprocess cancellation", §6 "Registry").
fn print_task(
    env: &RecipeEnv,
    printer_id: String,
    build_name: String,
    toolpath_path: PathBuf,
    skip_start_end: bool,
) -> Arc<Task> {
    let registry = Arc::clone(&env.registry);
    spawn_task(move |task| {
        tracing::info!(printer_id = %printer_id, toolpath = %toolpath_path.display(), "printing");
        registry.print(PrintRequest { printer_id, build_name, toolpath_path, skip_start_end }, &task);
    })
}

fn print_to_file_task(
    env: &RecipeEnv,
    build_name: String,
    toolpath_path: PathBuf,
    output_path: PathBuf,
    skip_start_end: bool,
    print_to_file_type: PrintToFileType,
) -> Arc<Task> {
    let registry = Arc::clone(&env.registry);
    let profile = env.profile.clone();
    spawn_task(move |task| {
        tracing::info!(output = %output_path.display(), "printing to file");
        registry.print_to_file(
            PrintToFileRequest {
                output_path,
                profile,
                build_name,
                toolpath_path,
                skip_start_end,
                print_to_file_type,
            },
            &task,
        );
    })
}

/// §4.4 "Verify task": parses the produced binary artifact, forwarding
/// per-byte percentage as lazy heartbeats (§10.7 — the original's
/// `verifys3gtask` reports a percentage, not just a boolean).
fn verify_task(env: &RecipeEnv, artifact_path: PathBuf) -> Arc<Task> {
    let driver = Arc::clone(&env.driver);
    spawn_task(move |task| {
        tracing::info!(artifact = %artifact_path.display(), "verifying printed artifact");
        let task_for_progress = Arc::clone(&task);
        let result = {
            let mut on_progress = move |percent: u8| {
                task_for_progress.lazy_heartbeat(Progress::new("verify").with("percent", percent));
            };
            driver.read_file(&artifact_path, &mut on_progress)
        };
        match result {
            Ok(()) => task.end(Some(serde_json::Value::Bool(true))),
            Err(e) => task.fail(e),
        }
    })
}

fn read_lines(path: &Path) -> Result<Vec<String>, DispatchError> {
    let contents = std::fs::read_to_string(path).map_err(DispatchError::Io)?;
    Ok(contents.lines().map(str::to_string).collect())
}

fn write_lines(path: &Path, lines: &[String]) -> Result<(), DispatchError> {
    let mut out = lines.join("\n");
    if !lines.is_empty() {
        out.push('\n');
    }
    std::fs::write(path, out).map_err(DispatchError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FakeDriver, FakeRegistry, FakeSplitterRunner};
    use crate::adapters::registry::RegistryCall;
    use crate::adapters::splitter::FakeSplitterYield;
    use parking_lot::Condvar;
    use pd_core::{Job, TaskState};
    use std::time::Duration;

    fn wait_terminal(task: &Arc<Task>) -> TaskState {
        let pair = Arc::new((PMutex::new(false), Condvar::new()));
        if task.state().is_terminal() {
            return task.state();
        }
        let pair2 = Arc::clone(&pair);
        task.stopped_event.attach(move |_| {
            let (lock, cvar) = &*pair2;
            *lock.lock() = true;
            cvar.notify_all();
        });
        let (lock, cvar) = &*pair;
        let mut done = lock.lock();
        if !*done {
            cvar.wait_while_for(&mut done, |d| !*d, Duration::from_secs(5));
        }
        task.state()
    }

    fn env_with(scratch_base: &Path, registry: Arc<dyn Registry>) -> RecipeEnv {
        RecipeEnv {
            registry,
            driver: Arc::new(FakeDriver::new()),
            splitter: Arc::new(FakeSplitterRunner::new(FakeSplitterYield::Dual)),
            splitter_executable: "unified_mesh_hack".into(),
            profile: Profile::new("replicator-2"),
            scratch: Arc::new(Scratch::new(scratch_base)),
        }
    }

    #[test]
    fn toolpath_print_without_wrap_is_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("x.gcode");
        std::fs::write(&input, "G1 X0 Y0\nG1 X10 Y10\n").unwrap();

        let registry = Arc::new(FakeRegistry::new());
        let env = env_with(dir.path(), Arc::clone(&registry) as Arc<dyn Registry>);
        let mut job = Job::for_test(&input);
        job.with_start_end = false;

        let recipe = Recipe::plan(job, env).unwrap();
        let process = recipe.print("printer-0").unwrap();
        process.start();
        assert_eq!(wait_terminal(process.task()), TaskState::Ended);

        let calls = registry.calls();
        assert_eq!(calls.len(), 1);
        let RegistryCall::Print(request) = &calls[0] else { panic!("expected a print call") };
        assert_eq!(std::fs::read(&request.toolpath_path).unwrap(), std::fs::read(&input).unwrap());
    }

    #[test]
    fn mesh_print_with_no_processors_skips_postprocess_stage() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("y.stl");
        std::fs::write(&input, "solid mesh\nendsolid mesh\n").unwrap();

        let registry = Arc::new(FakeRegistry::new());
        let env = env_with(dir.path(), Arc::clone(&registry) as Arc<dyn Registry>);
        let job = Job::for_test(&input);

        let recipe = Recipe::plan(job, env).unwrap();
        let process = recipe.print("printer-0").unwrap();
        process.start();
        assert_eq!(wait_terminal(process.task()), TaskState::Ended);

        let calls = registry.calls();
        assert_eq!(calls.iter().filter(|c| matches!(c, RegistryCall::Slice(_))).count(), 1);
        assert_eq!(calls.iter().filter(|c| matches!(c, RegistryCall::Print(_))).count(), 1);
    }

    #[test]
    fn composite_dual_print_slices_both_extruders_and_weaves() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("z.thing");
        std::fs::write(&input, b"composite container").unwrap();

        let registry = Arc::new(FakeRegistry::new());
        let mut env = env_with(dir.path(), Arc::clone(&registry) as Arc<dyn Registry>);
        env.splitter = Arc::new(FakeSplitterRunner::new(FakeSplitterYield::Dual));
        let job = Job::for_test(&input);

        let recipe = Recipe::plan(job, env).unwrap();
        let process = recipe.print("printer-0").unwrap();
        process.start();
        assert_eq!(wait_terminal(process.task()), TaskState::Ended);

        let slices: Vec<_> = registry
            .calls()
            .into_iter()
            .filter_map(|c| if let RegistryCall::Slice(r) = c { Some(r) } else { None })
            .collect();
        assert_eq!(slices.len(), 2);
        assert!(slices.iter().all(|r| r.dualstrusion));
        assert_eq!(slices[0].settings.extruder, 0);
        assert_eq!(slices[1].settings.extruder, 1);
    }

    #[test]
    fn composite_with_only_one_mesh_plans_as_single_mesh() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("z.thing");
        std::fs::write(&input, b"composite container").unwrap();

        let registry = Arc::new(FakeRegistry::new());
        let mut env = env_with(dir.path(), Arc::clone(&registry) as Arc<dyn Registry>);
        env.splitter = Arc::new(FakeSplitterRunner::new(FakeSplitterYield::Single0));
        let job = Job::for_test(&input);

        let recipe = Recipe::plan(job, env).unwrap();
        let process = recipe.print("printer-0").unwrap();
        process.start();
        assert_eq!(wait_terminal(process.task()), TaskState::Ended);

        let slices = registry.calls().into_iter().filter(|c| matches!(c, RegistryCall::Slice(_))).count();
        assert_eq!(slices, 1);
    }

    #[test]
    fn composite_extraction_failure_is_invalid_composite() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("z.thing");
        std::fs::write(&input, b"composite container").unwrap();

        let registry = Arc::new(FakeRegistry::new());
        let mut env = env_with(dir.path(), registry);
        env.splitter = Arc::new(FakeSplitterRunner::failing(1));
        let job = Job::for_test(&input);

        let err = Recipe::plan(job, env).unwrap_err();
        assert!(matches!(err, RecipeError::InvalidComposite(_)));
    }

    #[test]
    fn composite_extraction_with_neither_mesh_is_invalid_composite() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("z.thing");
        std::fs::write(&input, b"composite container").unwrap();

        let registry = Arc::new(FakeRegistry::new());
        let mut env = env_with(dir.path(), registry);
        env.splitter = Arc::new(FakeSplitterRunner::new(FakeSplitterYield::Neither));
        let job = Job::for_test(&input);

        let err = Recipe::plan(job, env).unwrap_err();
        assert!(matches!(err, RecipeError::InvalidComposite(_)));
    }

    #[test]
    fn missing_mesh_file_is_missing_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        let env = env_with(dir.path(), registry);
        let job = Job::for_test(dir.path().join("absent.stl"));

        let err = Recipe::plan(job, env).unwrap_err();
        assert!(matches!(err, RecipeError::MissingFile(_)));
    }

    #[test]
    fn directory_path_is_not_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        let env = env_with(dir.path(), registry);
        let mesh_shaped_dir = dir.path().join("nested.stl");
        std::fs::create_dir(&mesh_shaped_dir).unwrap();
        let job = Job::for_test(mesh_shaped_dir);

        let err = Recipe::plan(job, env).unwrap_err();
        assert!(matches!(err, RecipeError::NotFile(_)));
    }

    #[test]
    fn slice_mode_is_undefined_for_a_toolpath_recipe() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("x.gcode");
        std::fs::write(&input, "G1 X0 Y0\n").unwrap();

        let registry = Arc::new(FakeRegistry::new());
        let env = env_with(dir.path(), registry);
        let job = Job::for_test(&input);

        let recipe = Recipe::plan(job, env).unwrap();
        assert!(recipe.slice(dir.path().join("out.gcode")).is_err());
    }

    #[test]
    fn printtofile_verifies_and_reports_terminal_percent_100() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("x.gcode");
        std::fs::write(&input, "G1 X0 Y0\n").unwrap();
        let output = dir.path().join("out.s3g");

        let registry = Arc::new(FakeRegistry::new());
        let env = env_with(dir.path(), registry);
        let job = Job::for_test(&input);

        let recipe = Recipe::plan(job, env).unwrap();
        let process = recipe.printtofile(output.clone()).unwrap();

        let last_percent = Arc::new(PMutex::new(0u8));
        let last_percent2 = Arc::clone(&last_percent);
        process.task().heartbeat_event.attach(move |p: Progress| {
            if let Some(v) = p.fields.get("percent").and_then(|v| v.as_u64()) {
                *last_percent2.lock() = v as u8;
            }
        });

        process.start();
        assert_eq!(wait_terminal(process.task()), TaskState::Ended);
        assert_eq!(*last_percent.lock(), 100);
    }

    #[test]
    fn slicer_failure_fails_the_composite_and_does_not_print() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("y.stl");
        std::fs::write(&input, "solid mesh\nendsolid mesh\n").unwrap();

        let registry = Arc::new(FakeRegistry::new());
        registry.set_fail_slice(true);
        let env = env_with(dir.path(), Arc::clone(&registry) as Arc<dyn Registry>);
        let job = Job::for_test(&input);

        let recipe = Recipe::plan(job, env).unwrap();
        let process = recipe.print("printer-0").unwrap();
        process.start();
        assert_eq!(wait_terminal(process.task()), TaskState::Failed);
        assert!(registry.calls().iter().all(|c| !matches!(c, RegistryCall::Print(_))));
    }

    #[test]
    fn cancelling_the_process_removes_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("x.gcode");
        std::fs::write(&input, "G1 X0 Y0\n").unwrap();

        let registry = Arc::new(FakeRegistry::new());
        let env = env_with(dir.path(), registry);
        let scratch = Arc::clone(&env.scratch);
        let job = Job::for_test(&input);

        let recipe = Recipe::plan(job, env).unwrap();
        let process = recipe.print("printer-0").unwrap();
        // Cancel before starting: deterministic, and exercises the same
        // Pending -> Stopped path a client disconnecting immediately would.
        process.cancel(Some("client disconnected".into()));
        assert_eq!(wait_terminal(process.task()), TaskState::Stopped);
        assert!(!scratch.root().exists());
    }

    #[test]
    fn interleave_alternates_and_tolerates_uneven_lengths() {
        let a = vec!["a0".to_string(), "a1".to_string()];
        let b = vec!["b0".to_string()];
        assert_eq!(interleave(a, b), vec!["a0", "b0", "a1"]);
    }
}
