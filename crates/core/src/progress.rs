// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress record (§3): the payload a heartbeat carries.
//!
//! Every task names itself (`"slice"`, `"print"`, `"verify"`, ...) and
//! attaches whatever extra keys make sense for that stage —
//! `currentline`/`totalbytes` for a stream print, `progress` for a
//! percentage. We model that as a fixed `name` plus an open map rather
//! than one enum per stage, since the planner and the stream printer
//! both need to compare two progress values for equality to implement
//! lazy heartbeating (§4.2).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A structured progress payload. Equality (used by [`lazy`](Progress::changed))
/// compares both the stage name and every extra field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub name: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Progress {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: BTreeMap::new() }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// True if `new` differs from `old` in the stage name or any field.
    /// Used to implement lazy heartbeating: a heartbeat is only worth
    /// sending when something in it actually changed.
    pub fn changed(new: &Progress, old: &Progress) -> bool {
        new != old
    }
}
