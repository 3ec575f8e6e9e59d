// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job descriptor (§3): the immutable request a client submits.
//!
//! A `Job` never changes after submission — the recipe planner reads it
//! once to build a pipeline and every task closure captures the values
//! it needs out of it up front.

use crate::error::RecipeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which slicer produces the toolpath. `Legacy` is the conveyor-era
/// Skeinforge-compatible slicer that needs an anchor processor prepended
/// and a compatibility processor appended (§4.4); anything else is
/// treated as a modern slicer that emits directly consumable g-code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slicer {
    Legacy,
    MiracleGrue,
}

/// The artifact format produced by a print-to-file pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintToFileType {
    S3g,
    X3g,
}

impl PrintToFileType {
    pub fn extension(self) -> &'static str {
        match self {
            Self::S3g => "s3g",
            Self::X3g => "x3g",
        }
    }
}

/// Slicer configuration for a job. Cloned and re-parameterized per
/// extruder for dual-mesh jobs (§4.4 "Dual slice parameterization").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlicerSettings {
    pub slicer: Slicer,
    /// Path to a user-preconfigured slicer profile, if any. The anchor
    /// processor is only prepended when this is absent (§4.4).
    #[serde(default)]
    pub preconfigured_path: Option<PathBuf>,
    /// Extruder index this settings clone targets. 0 for single jobs;
    /// 0 or 1 for each half of a dual job.
    #[serde(default)]
    pub extruder: u8,
    /// Opaque slicer-specific knobs (layer height, infill, ...), passed
    /// through to the slicer subprocess untouched.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl SlicerSettings {
    /// Clone these settings for a specific extruder, used by the dual
    /// mesh planner to slice each half independently (§4.4).
    pub fn for_extruder(&self, extruder: u8) -> Self {
        let mut clone = self.clone();
        clone.extruder = extruder;
        clone
    }
}

/// Build material (PLA, ABS, ...). Opaque to the engine beyond being
/// forwarded to the slicer and the driver's start/end assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material(pub String);

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// The kind of input a job's path names, derived from its extension
/// (§4.4 dispatch table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Toolpath,
    Mesh,
    Composite,
}

impl JobKind {
    /// Classify a path by its lowercased extension. `.gcode` is a
    /// toolpath, `.stl` is a single mesh, `.thing` is a composite
    /// container holding one or two meshes. Anything else is
    /// unsupported.
    pub fn from_path(path: &Path) -> Result<Self, RecipeError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("gcode") => Ok(Self::Toolpath),
            Some("stl") => Ok(Self::Mesh),
            Some("thing") => Ok(Self::Composite),
            _ => Err(RecipeError::UnsupportedModel(path.to_path_buf())),
        }
    }
}

/// An immutable print job as submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub path: PathBuf,
    pub build_name: String,
    pub slicer_settings: SlicerSettings,
    pub material: Material,
    pub with_start_end: bool,
    pub skip_start_end: bool,
    #[serde(default)]
    pub gcodeprocessor: Option<Vec<String>>,
    pub print_to_file_type: PrintToFileType,
}

impl Job {
    /// The job's input kind, derived from `path`'s extension.
    pub fn kind(&self) -> Result<JobKind, RecipeError> {
        JobKind::from_path(&self.path)
    }

    /// `gcodeprocessor`, defaulting to an empty list when absent (§3).
    pub fn gcodeprocessors(&self) -> Vec<String> {
        self.gcodeprocessor.clone().unwrap_or_default()
    }
}

/// Configuration passed into [`Job::new`]; split out from `Job` itself
/// so callers build up the fields before the job becomes immutable.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub path: PathBuf,
    pub build_name: String,
    pub slicer_settings: SlicerSettings,
    pub material: Material,
    pub with_start_end: bool,
    pub skip_start_end: bool,
    pub gcodeprocessor: Option<Vec<String>>,
    pub print_to_file_type: PrintToFileType,
}

impl Job {
    pub fn new(config: JobConfig) -> Self {
        Self {
            path: config.path,
            build_name: config.build_name,
            slicer_settings: config.slicer_settings,
            material: config.material,
            with_start_end: config.with_start_end,
            skip_start_end: config.skip_start_end,
            gcodeprocessor: config.gcodeprocessor,
            print_to_file_type: config.print_to_file_type,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Job {
    /// Build a minimal test job for a given path, with sensible defaults
    /// for everything else.
    pub fn for_test(path: impl Into<PathBuf>) -> Self {
        Self::new(JobConfig {
            path: path.into(),
            build_name: "test-build".to_string(),
            slicer_settings: SlicerSettings {
                slicer: Slicer::MiracleGrue,
                preconfigured_path: None,
                extruder: 0,
                raw: serde_json::Value::Null,
            },
            material: Material::new("PLA"),
            with_start_end: true,
            skip_start_end: false,
            gcodeprocessor: None,
            print_to_file_type: PrintToFileType::S3g,
        })
    }
}
