// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy (§7): input-classification errors raised by the recipe
//! planner before a single [`Task`](crate::task::Task) has even started,
//! plus the catch-all a task body converts any failure into.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while classifying a job into a recipe, before any task
/// in the pipeline runs. Recoverable — reported straight back to the client.
#[derive(Debug, Clone, Error)]
pub enum RecipeError {
    #[error("unsupported model type: {0}")]
    UnsupportedModel(PathBuf),

    #[error("missing file: {0}")]
    MissingFile(PathBuf),

    #[error("not a file: {0}")]
    NotFile(PathBuf),

    #[error("invalid composite container: {0}")]
    InvalidComposite(PathBuf),
}

/// Top-level error used wherever a task body or the engine surfaces a
/// failure cause. A task's `fail` transition carries this (or any
/// `Send + Sync` error boxed into [`DispatchError::Other`]).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error("slicer exited with status {0}")]
    SlicerFailed(i32),

    #[error("mesh splitter exited with status {0}")]
    SplitterFailed(i32),

    #[error("stream validation failed: {0}")]
    StreamValidation(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Clone for DispatchError {
    fn clone(&self) -> Self {
        match self {
            Self::Recipe(e) => Self::Recipe(e.clone()),
            Self::SlicerFailed(c) => Self::SlicerFailed(*c),
            Self::SplitterFailed(c) => Self::SplitterFailed(*c),
            Self::StreamValidation(s) => Self::StreamValidation(s.clone()),
            Self::Io(e) => Self::Other(e.to_string()),
            Self::Other(s) => Self::Other(s.clone()),
        }
    }
}
