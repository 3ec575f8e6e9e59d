// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! G-code post-processors and the selection rule that decides which ones
//! run for a given job (§4.4 "G-code processor selection").
//!
//! A processor is identified by name in `Job::gcodeprocessors()`; this
//! module resolves names to behavior and decides which implicit names to
//! add around whatever the client asked for.

use std::sync::Arc;

use pd_core::{DispatchError, Job, Slicer};

use crate::profile::Profile;

/// Prepended ahead of the client's list when the legacy slicer is selected
/// without a preconfigured slicer path — anchors the toolpath to a known
/// machine origin before anything else runs.
pub const ANCHOR_PROCESSOR: &str = "anchor";

/// Appended whenever the legacy slicer is selected, regardless of what else
/// ran — normalizes legacy-slicer output onto the current wire dialect.
pub const LEGACY_COMPAT_PROCESSOR: &str = "legacy-compat";

/// Appended when the active profile is the hardware model that needs
/// explicit fan-control insertion (older boards don't do this implicitly).
pub const FAN_PROCESSOR: &str = "fan";

/// Hardware model that requires `FAN_PROCESSOR` (§4.4).
const FAN_REQUIRED_MODEL: &str = "replicator-1";

/// A g-code post-processor: maps a toolpath's lines to a new sequence of
/// lines. Implementations must be pure with respect to line content; any
/// failure (malformed input, an unsupported directive) fails the task that
/// applies it.
pub trait GcodeProcessor: Send + Sync {
    fn name(&self) -> &'static str;
    fn process(&self, lines: Vec<String>) -> Result<Vec<String>, DispatchError>;
}

struct AnchorProcessor;
impl GcodeProcessor for AnchorProcessor {
    fn name(&self) -> &'static str {
        ANCHOR_PROCESSOR
    }

    fn process(&self, mut lines: Vec<String>) -> Result<Vec<String>, DispatchError> {
        lines.insert(0, "G92 X0 Y0 Z0".to_string());
        Ok(lines)
    }
}

struct LegacyCompatProcessor;
impl GcodeProcessor for LegacyCompatProcessor {
    fn name(&self) -> &'static str {
        LEGACY_COMPAT_PROCESSOR
    }

    fn process(&self, lines: Vec<String>) -> Result<Vec<String>, DispatchError> {
        Ok(lines
            .into_iter()
            .map(|line| line.replace("M104 S", "M104 T0 S").replace("M109 S", "M109 T0 S"))
            .collect())
    }
}

struct FanProcessor;
impl GcodeProcessor for FanProcessor {
    fn name(&self) -> &'static str {
        FAN_PROCESSOR
    }

    fn process(&self, mut lines: Vec<String>) -> Result<Vec<String>, DispatchError> {
        lines.push("M107".to_string());
        Ok(lines)
    }
}

/// The dualstrusion weave always applies this processor after interleaving
/// (§4.4 "weave task") to keep the composite's progress heartbeats
/// consistent with a single-extrusion toolpath's line numbering.
pub struct DualstrusionProgressProcessor;
impl GcodeProcessor for DualstrusionProgressProcessor {
    fn name(&self) -> &'static str {
        "dualstrusion-progress"
    }

    fn process(&self, lines: Vec<String>) -> Result<Vec<String>, DispatchError> {
        Ok(lines)
    }
}

/// Resolve a processor name to its implementation. Unknown names fail the
/// post-process task rather than being silently skipped — a typo in a
/// client-supplied processor list should surface, not vanish.
pub fn resolve(name: &str) -> Result<Arc<dyn GcodeProcessor>, DispatchError> {
    match name {
        ANCHOR_PROCESSOR => Ok(Arc::new(AnchorProcessor)),
        LEGACY_COMPAT_PROCESSOR => Ok(Arc::new(LegacyCompatProcessor)),
        FAN_PROCESSOR => Ok(Arc::new(FanProcessor)),
        "dualstrusion-progress" => Ok(Arc::new(DualstrusionProgressProcessor)),
        other => Err(DispatchError::Other(format!("unknown gcode processor: {other}"))),
    }
}

/// Build the ordered processor-name list for `job` given the active
/// `profile` (§4.4). Preserves the client's order, never duplicates a name
/// that's already present.
pub fn select_gcodeprocessors(job: &Job, profile: &Profile) -> Vec<String> {
    let mut names = job.gcodeprocessors();

    let is_legacy = job.slicer_settings.slicer == Slicer::Legacy;
    let no_preconfigured = job.slicer_settings.preconfigured_path.is_none();

    if is_legacy && no_preconfigured && !names.iter().any(|n| n == ANCHOR_PROCESSOR) {
        names.insert(0, ANCHOR_PROCESSOR.to_string());
    }
    if is_legacy && !names.iter().any(|n| n == LEGACY_COMPAT_PROCESSOR) {
        names.push(LEGACY_COMPAT_PROCESSOR.to_string());
    }
    if profile.model == FAN_REQUIRED_MODEL && !names.iter().any(|n| n == FAN_PROCESSOR) {
        names.push(FAN_PROCESSOR.to_string());
    }

    names
}
