//! Error types for file tasks.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while a task processes a unit of work.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Destination already exists and no overwrite decision covered it.
    #[error("Already exists: {path}")]
    AlreadyExists { path: PathBuf },

    /// A rename between paths on the same device was refused as cross-device.
    #[error("Cannot rename {path} to {destination}: crosses a device boundary")]
    CrossDeviceRenameFailed { path: PathBuf, destination: PathBuf },

    /// Attempt to copy or move a directory into itself or a descendant.
    #[error("Cannot place {path} inside itself ({destination})")]
    DestinationInsideSource { path: PathBuf, destination: PathBuf },

    /// Total size discovery exceeded its time budget.
    #[error("Size discovery timed out")]
    SizeDiscoveryTimeout,

    /// The trash store could not take the path.
    #[error("Cannot move {path} to trash: {message}")]
    TrashUnavailable { path: PathBuf, message: String },

    /// Abort was observed in the middle of a unit of work.
    #[error("Operation interrupted")]
    Interrupted,

    /// An overwrite was chosen that cannot be carried out.
    #[error("Cannot overwrite {path}: {reason}")]
    CannotOverwrite { path: PathBuf, reason: String },

    /// An external command failed to start or exited unsuccessfully.
    #[error("Command `{command}` failed: {message}")]
    ExecFailed { command: String, message: String },

    /// The requested change is not available on this platform.
    #[error("Unsupported: {message}")]
    Unsupported { message: String },

    /// Any other I/O error.
    #[error("I/O error at {path}: {source}")]
    Other {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TaskError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            _ => Self::Other { path, source },
        }
    }

    /// Errors that end processing of the current source root regardless of
    /// the task's error policy.
    pub fn is_root_fatal(&self) -> bool {
        matches!(
            self,
            Self::DestinationInsideSource { .. } | Self::CrossDeviceRenameFailed { .. }
        )
    }

    /// Classify this error for recording.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::CrossDeviceRenameFailed { .. } => ErrorKind::CrossDeviceRenameFailed,
            Self::DestinationInsideSource { .. } => ErrorKind::DestinationInsideSource,
            Self::SizeDiscoveryTimeout => ErrorKind::SizeDiscoveryTimeout,
            Self::TrashUnavailable { .. } => ErrorKind::TrashUnavailable,
            Self::Interrupted => ErrorKind::Interrupted,
            Self::CannotOverwrite { .. } => ErrorKind::CannotOverwrite,
            Self::ExecFailed { .. } => ErrorKind::ExecFailed,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// The path this error refers to, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::PermissionDenied { path }
            | Self::NotFound { path }
            | Self::AlreadyExists { path }
            | Self::TrashUnavailable { path, .. }
            | Self::CannotOverwrite { path, .. }
            | Self::CrossDeviceRenameFailed { path, .. }
            | Self::DestinationInsideSource { path, .. }
            | Self::Other { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Errors returned by the task control surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// `run()` was called on a task that has already been started.
    #[error("Task is already running")]
    AlreadyRunning,

    /// An overwrite decision was supplied while no collision was pending.
    #[error("Task is not waiting for an overwrite decision")]
    NotWaiting,

    /// The task cannot be removed before it has finished.
    #[error("Task is still running")]
    StillRunning,

    /// No task with that id is registered.
    #[error("Unknown task {id}")]
    UnknownTask { id: u64 },
}

/// Errors in a task description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    /// No source paths were given.
    #[error("Task has no source paths")]
    NoSources,

    /// Sources must be absolute.
    #[error("Source path is not absolute: {path}")]
    RelativeSource { path: PathBuf },

    /// The operation needs a destination directory.
    #[error("{kind} requires a destination directory")]
    MissingDestination { kind: String },

    /// A chmod/chown task without any change requested.
    #[error("Permission task has nothing to change")]
    NoPermissionChange,

    /// An exec task without a command.
    #[error("Exec task has no command")]
    MissingCommand,

    /// Builder validation failure.
    #[error("Invalid task: {message}")]
    Invalid { message: String },
}

/// Kind of a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    AlreadyExists,
    CrossDeviceRenameFailed,
    DestinationInsideSource,
    SizeDiscoveryTimeout,
    TrashUnavailable,
    Interrupted,
    CannotOverwrite,
    ExecFailed,
    Unsupported,
    Other,
}

/// A failure recorded against a task, kept for the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// The path that caused the error.
    pub path: PathBuf,
    /// A human-readable error message.
    pub message: String,
    /// Kind of error.
    pub kind: ErrorKind,
}

impl ErrorRecord {
    /// Create a new error record.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Record a task error, falling back to `fallback` when the error carries no path.
    pub fn from_error(error: &TaskError, fallback: &std::path::Path) -> Self {
        let path = error
            .path()
            .cloned()
            .unwrap_or_else(|| fallback.to_path_buf());
        Self::new(path, error.to_string(), error.kind())
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}
