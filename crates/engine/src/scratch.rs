// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Explicit scratch-file allocation (§9 design notes).
//!
//! The original implementation allocated names by opening a named
//! temporary file and immediately closing it just to borrow its path. We
//! replace that with an explicit directory the recipe owns: every
//! intermediate path a pipeline needs (sliced toolpaths, a weave output, a
//! wrap output) is named up front, and the whole directory is removed once
//! on the owning `Process`'s terminal transition (§4.3, §5) — wired to
//! `stopped_event` rather than `end_event` so cleanup runs on success,
//! failure, and cancellation alike.

use std::fs;
use std::path::{Path, PathBuf};

/// A scratch directory allocated for one recipe's lifetime. Created lazily
/// on first use so a recipe that never needs scratch space (a toolpath
/// print with no post-processing) never touches the filesystem for it.
pub struct Scratch {
    root: PathBuf,
    created: std::sync::atomic::AtomicBool,
}

impl Scratch {
    /// `base` is the configured scratch root (daemon configuration);
    /// each `Scratch` gets its own uniquely named subdirectory under it.
    pub fn new(base: &Path) -> Self {
        let root = base.join(format!("recipe-{}", nanoid::nanoid!(12)));
        Self { root, created: std::sync::atomic::AtomicBool::new(false) }
    }

    /// Allocate a path for `name` inside the scratch directory, creating
    /// the directory on first call.
    pub fn path(&self, name: &str) -> std::io::Result<PathBuf> {
        use std::sync::atomic::Ordering;
        if !self.created.swap(true, Ordering::SeqCst) {
            fs::create_dir_all(&self.root)?;
        }
        Ok(self.root.join(name))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove the entire scratch directory. Tolerates a directory that was
    /// never created (no stage ever called `path()`) or already removed —
    /// cleanup must never fail a task that's already terminal (§5).
    pub fn cleanup(&self) {
        if let Err(err) = fs::remove_dir_all(&self.root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.root.display(), error = %err, "scratch cleanup failed");
            }
        }
    }
}
