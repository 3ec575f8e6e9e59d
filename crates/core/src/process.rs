// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The process sequencing combinator (§4.3).
//!
//! `Process` runs a fixed, ordered list of child tasks one at a time and
//! presents the whole chain as a single composite [`Task`]: the
//! composite starts when the process starts, ends when the last child
//! ends, fails the moment any child fails, and stops the moment any
//! child is cancelled. A recipe pipeline (slice, post-process, wrap,
//! print, verify) is built as one `Process` over its stage tasks.

use crate::error::DispatchError;
use crate::task::{Outcome, Task};
use parking_lot::Mutex;
use std::sync::Arc;

/// A sequence of tasks run one after another under a single composite
/// [`Task`]. Wiring is established entirely in [`Process::new`]: each
/// child's `heartbeat_event` relays straight through to the composite's
/// own `heartbeat_event` so a caller only has to watch one task for
/// progress across the whole pipeline; each child's `end_event` advances
/// to the next child (or ends the composite, if it was the last); each
/// child's `fail_event` fails the composite immediately; and each
/// child's cancellation (a `stopped_event` whose outcome is
/// [`Outcome::Stopped`]) stops the composite. `Ended`/`Failed` outcomes
/// are deliberately not handled via `stopped_event` a second time — they
/// already ran through `end_event`/`fail_event` above, and the
/// composite's own terminal transitions are idempotent in any case, but
/// double-firing the composite's `stopped_event` would double-run
/// attached cleanup.
pub struct Process {
    task: Arc<Task>,
    children: Vec<Arc<Task>>,
    current: Arc<Mutex<usize>>,
}

impl Process {
    /// Build a process over `children`, in the order they should run.
    /// Panics only on the programmer error of an empty sequence — every
    /// recipe pipeline has at least one stage.
    pub fn new(children: Vec<Arc<Task>>) -> Self {
        assert!(!children.is_empty(), "a process needs at least one child task");

        let task = Arc::new(Task::new());
        let current = Arc::new(Mutex::new(0));

        for (index, child) in children.iter().enumerate() {
            let composite = Arc::clone(&task);
            child.heartbeat_event.attach(move |progress| {
                composite.heartbeat_event.fire(progress);
            });

            let composite = Arc::clone(&task);
            let children_for_advance = children.clone();
            let current_for_advance = Arc::clone(&current);
            child.end_event.attach(move |_| {
                let next_index = index + 1;
                if next_index < children_for_advance.len() {
                    *current_for_advance.lock() = next_index;
                    children_for_advance[next_index].start();
                } else {
                    composite.end(None);
                }
            });

            let composite = Arc::clone(&task);
            child.fail_event.attach(move |cause: DispatchError| {
                composite.fail(cause);
            });

            let composite = Arc::clone(&task);
            child.stopped_event.attach(move |outcome: Outcome| {
                if let Outcome::Stopped(reason) = outcome {
                    composite.cancel(reason);
                }
            });
        }

        Self { task, children, current }
    }

    /// Start the composite task and its first child. A no-op if the
    /// process has already been started (delegated to `Task::start`'s
    /// own idempotence).
    pub fn start(&self) {
        self.task.start();
        self.children[0].start();
    }

    /// Cancel whichever child is currently running. The child's
    /// `stopped_event` handler installed in `new` propagates the
    /// cancellation to the composite task.
    pub fn cancel(&self, reason: Option<String>) {
        let index = *self.current.lock();
        self.children[index].cancel(reason);
    }

    /// The composite task, for attaching progress/completion handlers or
    /// wiring this process as a child of an outer one.
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// The child currently running (or about to run, before `start`).
    pub fn current(&self) -> &Arc<Task> {
        &self.children[*self.current.lock()]
    }
}
