// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::job::{Material, PrintToFileType, Slicer, SlicerSettings};
use crate::progress::Progress;

/// Proptest strategies for core domain types.
pub mod strategies {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_slicer() -> impl Strategy<Value = Slicer> {
        prop_oneof![Just(Slicer::Legacy), Just(Slicer::MiracleGrue)]
    }

    pub fn arb_print_to_file_type() -> impl Strategy<Value = PrintToFileType> {
        prop_oneof![Just(PrintToFileType::S3g), Just(PrintToFileType::X3g)]
    }

    pub fn arb_slicer_settings() -> impl Strategy<Value = SlicerSettings> {
        (arb_slicer(), 0u8..2).prop_map(|(slicer, extruder)| SlicerSettings {
            slicer,
            preconfigured_path: None,
            extruder,
            raw: serde_json::Value::Null,
        })
    }

    pub fn arb_progress_field_value() -> impl Strategy<Value = u64> {
        0u64..100_000
    }
}

pub fn material(name: &str) -> Material {
    Material::new(name)
}

pub fn progress_with(name: &str, key: &str, value: u64) -> Progress {
    Progress::new(name).with(key, value)
}
