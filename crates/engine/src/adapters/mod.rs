// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapters for the external collaborators named in §6: the slicer and
//! mesh-splitter subprocesses, the device driver library, and the
//! server-facing registry. Each module pairs a trait (the seam) with a
//! production implementation and, behind `#[cfg(any(test, feature =
//! "test-support"))]`, a `Fake*` double recipe tests drive directly.

pub mod driver;
pub mod registry;
pub mod slicer;
pub mod splitter;

pub use driver::{Driver, DriverError, StartEndVariables, StreamSession, StreamSink};
pub use registry::{PrintRequest, PrintToFileRequest, Printer, Registry, SliceRequest};
pub use slicer::{ProcessSlicerRunner, SlicerRunner};
pub use splitter::{ProcessSplitterRunner, SplitterRunner};

#[cfg(any(test, feature = "test-support"))]
pub use driver::FakeDriver;
#[cfg(any(test, feature = "test-support"))]
pub use registry::FakeRegistry;
#[cfg(any(test, feature = "test-support"))]
pub use slicer::FakeSlicerRunner;
#[cfg(any(test, feature = "test-support"))]
pub use splitter::FakeSplitterRunner;
