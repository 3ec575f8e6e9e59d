// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The task state machine (§4.2).
//!
//! `Task` is the single abstraction every unit of pipeline work runs
//! under: slicing (a subprocess), post-processing (CPU work),
//! dualstrusion weaving, wrapping, printing (a long serial stream), and
//! verification all drive the same five transitions. A cooperative,
//! single-threaded-per-task state machine keeps cancellation, progress,
//! and completion semantics uniform and inspectable, as opposed to a
//! general-purpose promise/future.
//!
//! State transitions are enforced with an early return under the state
//! lock, and events are fired *after* the lock is released — a handler
//! that calls back into the task (e.g. to attach another handler, or to
//! cancel it) must never deadlock against the mutex it's firing from.

use crate::error::DispatchError;
use crate::event::Event;
use crate::progress::Progress;
use parking_lot::Mutex;
use serde_json::Value;

/// The five states a task can occupy. PENDING is the only initial
/// state; ENDED, FAILED, and STOPPED are terminal and accept no further
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Ended,
    Failed,
    Stopped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Failed | Self::Stopped)
    }
}

/// The terminal outcome of a task, delivered on `stopped_event` —
/// the one event that fires on *every* terminal transition regardless
/// of which of `end`/`fail`/`cancel` produced it. Recipes attach their
/// temp-file cleanup here rather than to `end_event` alone so cleanup
/// runs on success, failure, and cancellation alike (§4.3).
#[derive(Debug, Clone)]
pub enum Outcome {
    Ended(Option<Value>),
    Failed(DispatchError),
    Stopped(Option<String>),
}

/// A cooperative state machine with attached lifecycle events.
pub struct Task {
    state: Mutex<TaskState>,
    last_progress: Mutex<Option<Progress>>,
    pub running_event: Event<()>,
    pub heartbeat_event: Event<Progress>,
    pub end_event: Event<Option<Value>>,
    pub fail_event: Event<DispatchError>,
    pub stopped_event: Event<Outcome>,
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl Task {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TaskState::Pending),
            last_progress: Mutex::new(None),
            running_event: Event::new(),
            heartbeat_event: Event::new(),
            end_event: Event::new(),
            fail_event: Event::new(),
            stopped_event: Event::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// PENDING -> RUNNING. No-op (logged at debug) from any other state.
    pub fn start(&self) {
        {
            let mut guard = self.state.lock();
            if *guard != TaskState::Pending {
                tracing::debug!(from = ?*guard, "start() ignored: task is not pending");
                return;
            }
            *guard = TaskState::Running;
        }
        self.running_event.fire(());
    }

    /// RUNNING -> RUNNING, firing `heartbeat_event`. No-op outside RUNNING.
    pub fn heartbeat(&self, progress: Progress) {
        if self.state() != TaskState::Running {
            tracing::debug!("heartbeat() ignored: task is not running");
            return;
        }
        *self.last_progress.lock() = Some(progress.clone());
        self.heartbeat_event.fire(progress);
    }

    /// Fires `heartbeat_event` only if `progress` differs from the last
    /// heartbeat sent (or none has been sent yet). Keeps client bandwidth
    /// bounded by collapsing runs of identical progress payloads (§3).
    pub fn lazy_heartbeat(&self, progress: Progress) {
        let changed = match &*self.last_progress.lock() {
            Some(old) => Progress::changed(&progress, old),
            None => true,
        };
        if changed {
            self.heartbeat(progress);
        }
    }

    /// RUNNING -> ENDED: fires `end_event(result)` then `stopped_event`.
    pub fn end(&self, result: Option<Value>) {
        if !self.enter_terminal_from_running(TaskState::Ended) {
            return;
        }
        self.end_event.fire(result.clone());
        self.stopped_event.fire(Outcome::Ended(result));
    }

    /// RUNNING -> FAILED: fires `fail_event(cause)` then `stopped_event`.
    pub fn fail(&self, cause: DispatchError) {
        if !self.enter_terminal_from_running(TaskState::Failed) {
            return;
        }
        self.fail_event.fire(cause.clone());
        self.stopped_event.fire(Outcome::Failed(cause));
    }

    /// PENDING/RUNNING -> STOPPED: fires `stopped_event(reason)`.
    /// A no-op on an already-terminal task (including one already
    /// stopped) — cancelling twice raises nothing and changes nothing.
    pub fn cancel(&self, reason: Option<String>) {
        {
            let mut guard = self.state.lock();
            if guard.is_terminal() {
                tracing::debug!(state = ?*guard, "cancel() ignored: task already terminal");
                return;
            }
            *guard = TaskState::Stopped;
        }
        self.stopped_event.fire(Outcome::Stopped(reason));
    }

    fn enter_terminal_from_running(&self, to: TaskState) -> bool {
        let mut guard = self.state.lock();
        if *guard != TaskState::Running {
            tracing::debug!(from = ?*guard, to = ?to, "transition ignored: task is not running");
            return false;
        }
        *guard = to;
        true
    }
}
