//! Sandboxed execution environments and the shared per-repository registry.
//!
//! This module provides the [`SandboxDriver`] seam over the execution
//! environment, a process-backed [`LocalSandboxes`] driver for development,
//! and the [`SandboxRegistry`] that deduplicates sandboxes per repository.

mod driver;
mod local;
mod registry;

pub use driver::{CommandOutput, SandboxDriver, SandboxHandle, SandboxSpec};
pub use local::{LocalSandbox, LocalSandboxes};
pub use registry::{SandboxLookup, SandboxRecord, SandboxRegistry};
