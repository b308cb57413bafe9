//! Core types for filetask.
//!
//! This crate provides the data structures shared by the file-operation
//! engine and its callers: task descriptions, overwrite policies, progress
//! snapshots, state-change events, device identity and configuration.

mod config;
mod device;
mod error;
mod overwrite;
mod progress;
mod task;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use device::DeviceId;
pub use error::{ControlError, ErrorKind, ErrorRecord, SpecError, TaskError};
pub use overwrite::{Conflict, ConflictKind, OverwriteDecision, OverwritePolicy};
pub use progress::{ProgressSnapshot, TaskEvent, TaskOutcome, TaskState};
pub use task::{
    ErrorPolicy, ExecCommand, ModeEdit, PermissionChange, TaskId, TaskKind, TaskSpec,
    TaskSpecBuilder,
};
