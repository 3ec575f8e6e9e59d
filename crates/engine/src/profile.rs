// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The printer profile schema consumed from the device driver library (§6).
//!
//! A profile describes one device's capabilities: which tools and heated
//! platforms it has, and the line sequences a slicer would embed at the
//! start/end of a toolpath if asked to (the default pipeline never asks;
//! the wrap task always owns start/end assembly instead, see `recipe.rs`).

use std::collections::BTreeMap;

use serde_json::Value;

/// `profile.values['tools']` / `['heated_platforms']` map integer-valued
/// string keys (`"0"`, `"1"`, ...) to per-tool capability blobs we don't
/// need to interpret here; the mapping's key set is what matters.
pub type ToolMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default)]
pub struct Profile {
    /// Hardware model identifier, consulted by the fan g-code processor
    /// selection rule (`gcode::select_gcodeprocessors`).
    pub model: String,
    pub tools: ToolMap,
    pub heated_platforms: ToolMap,
    pub print_start_sequence: Vec<String>,
    pub print_end_sequence: Vec<String>,
}

impl Profile {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), ..Default::default() }
    }

    pub fn with_tool(mut self, index: u32) -> Self {
        self.tools.insert(index.to_string(), Value::Null);
        self
    }

    pub fn with_heated_platform(mut self, index: u32) -> Self {
        self.heated_platforms.insert(index.to_string(), Value::Null);
        self
    }

    /// Tool indices in ascending numeric order. Non-numeric keys are a
    /// malformed profile and are skipped rather than panicking — the
    /// producing side (device factory) is responsible for well-formed
    /// profiles; a consumer should degrade, not crash.
    pub fn tool_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = self.tools.keys().filter_map(|k| k.parse().ok()).collect();
        indices.sort_unstable();
        indices
    }

    pub fn platform_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> =
            self.heated_platforms.keys().filter_map(|k| k.parse().ok()).collect();
        indices.sort_unstable();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_indices_are_sorted_numerically_not_lexically() {
        let profile = Profile::new("replicator").with_tool(2).with_tool(10).with_tool(1);
        assert_eq!(profile.tool_indices(), vec![1, 2, 10]);
    }

    #[test]
    fn malformed_keys_are_skipped() {
        let mut profile = Profile::new("replicator");
        profile.tools.insert("not-a-number".into(), Value::Null);
        profile.tools.insert("3".into(), Value::Null);
        assert_eq!(profile.tool_indices(), vec![3]);
    }
}
