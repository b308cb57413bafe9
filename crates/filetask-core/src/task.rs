//! Task description types.

use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::SpecError;
use crate::overwrite::OverwritePolicy;

/// Opaque identifier for a task within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId from a u64.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of operation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Copy,
    Move,
    Link,
    Delete,
    Trash,
    /// Permission and/or ownership change.
    #[strum(to_string = "Chmod/Chown")]
    Chmod,
    /// Run one external command.
    Exec,
}

impl TaskKind {
    /// Whether the operation writes into a destination directory.
    pub fn needs_destination(&self) -> bool {
        matches!(self, Self::Copy | Self::Move | Self::Link)
    }

    /// Whether progress is measured in transferred bytes.
    pub fn transfers_content(&self) -> bool {
        matches!(self, Self::Copy | Self::Move)
    }
}

/// What happens after a unit of work fails. Fixed for the lifetime of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Record the error and continue; the task completes with errors.
    #[default]
    ContinueOnError,
    /// Stop the task at the first recorded error.
    FirstErrorStops,
    /// Attempt every unit, then finish the task as failed if any error was recorded.
    AnyErrorStops,
}

/// Edit of permission bits: bits in `clear` are removed, then bits in `set` are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModeEdit {
    /// Bits to add.
    pub set: u32,
    /// Bits to remove.
    pub clear: u32,
}

impl ModeEdit {
    /// Replace all permission bits with `mode`.
    pub fn exact(mode: u32) -> Self {
        Self {
            set: mode & 0o7777,
            clear: 0o7777,
        }
    }

    /// Add bits, leave the rest untouched.
    pub fn add(bits: u32) -> Self {
        Self {
            set: bits & 0o7777,
            clear: 0,
        }
    }

    /// Remove bits, leave the rest untouched.
    pub fn remove(bits: u32) -> Self {
        Self {
            set: 0,
            clear: bits & 0o7777,
        }
    }

    /// Apply the edit to an existing mode, keeping the file-type bits.
    pub fn apply(&self, mode: u32) -> u32 {
        let perms = mode & 0o7777;
        let edited = (perms & !self.clear) | self.set;
        (mode & !0o7777) | (edited & 0o7777)
    }
}

/// Requested permission and ownership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionChange {
    /// Permission-bit edit.
    pub mode: Option<ModeEdit>,
    /// New owner.
    pub uid: Option<u32>,
    /// New group.
    pub gid: Option<u32>,
}

impl PermissionChange {
    /// Change only the permission bits.
    pub fn mode(edit: ModeEdit) -> Self {
        Self {
            mode: Some(edit),
            ..Default::default()
        }
    }

    /// Change only ownership.
    pub fn owner(uid: Option<u32>, gid: Option<u32>) -> Self {
        Self {
            mode: None,
            uid,
            gid,
        }
    }

    /// Check if nothing would change.
    pub fn is_empty(&self) -> bool {
        self.mode.is_none() && self.uid.is_none() && self.gid.is_none()
    }

    /// Check if ownership is part of the change.
    pub fn changes_owner(&self) -> bool {
        self.uid.is_some() || self.gid.is_some()
    }
}

/// External command run by an exec task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecCommand {
    /// Program to run.
    pub program: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl ExecCommand {
    /// Create a command without arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl std::fmt::Display for ExecCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Immutable description of one batch operation.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(
    setter(into),
    build_fn(validate = "Self::validate", error = "SpecError")
)]
pub struct TaskSpec {
    /// Operation kind.
    pub kind: TaskKind,

    /// Ordered absolute source paths.
    #[builder(default)]
    #[serde(default)]
    pub sources: Vec<PathBuf>,

    /// Destination directory (copy, move, link).
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub destination: Option<PathBuf>,

    /// Descend into directories.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Collision policy (None = engine default).
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub overwrite: Option<OverwritePolicy>,

    /// Failure policy (None = engine default).
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub error_policy: Option<ErrorPolicy>,

    /// Permission/ownership change (chmod tasks).
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub permissions: Option<PermissionChange>,

    /// Command to run (exec tasks).
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub command: Option<ExecCommand>,
}

fn default_true() -> bool {
    true
}

impl From<derive_builder::UninitializedFieldError> for SpecError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        Self::Invalid {
            message: err.to_string(),
        }
    }
}

impl TaskSpecBuilder {
    fn validate(&self) -> Result<(), SpecError> {
        let Some(kind) = self.kind else {
            return Err(SpecError::Invalid {
                message: "operation kind is required".to_string(),
            });
        };
        let empty = Vec::new();
        check_spec(
            kind,
            self.sources.as_ref().unwrap_or(&empty),
            self.destination.as_ref().and_then(|d| d.as_ref()),
            self.permissions.as_ref().and_then(|p| p.as_ref()),
            self.command.as_ref().and_then(|c| c.as_ref()),
        )
    }
}

impl TaskSpec {
    /// Create a new task spec builder.
    pub fn builder() -> TaskSpecBuilder {
        TaskSpecBuilder::default()
    }

    /// Describe a copy of `sources` into `destination`.
    pub fn copy(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::transfer(TaskKind::Copy, sources, Some(destination.into()))
    }

    /// Describe a move of `sources` into `destination`.
    pub fn move_to(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::transfer(TaskKind::Move, sources, Some(destination.into()))
    }

    /// Describe symlinks to `sources` created inside `destination`.
    pub fn link(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::transfer(TaskKind::Link, sources, Some(destination.into()))
    }

    /// Describe a permanent deletion.
    pub fn delete(sources: Vec<PathBuf>) -> Self {
        Self::transfer(TaskKind::Delete, sources, None)
    }

    /// Describe a relocation to the trash.
    pub fn trash(sources: Vec<PathBuf>) -> Self {
        Self::transfer(TaskKind::Trash, sources, None)
    }

    /// Describe a permission/ownership change.
    pub fn chmod(sources: Vec<PathBuf>, change: PermissionChange) -> Self {
        let mut spec = Self::transfer(TaskKind::Chmod, sources, None);
        spec.permissions = Some(change);
        spec
    }

    /// Describe an external command run.
    pub fn exec(command: ExecCommand) -> Self {
        let mut spec = Self::transfer(TaskKind::Exec, Vec::new(), None);
        spec.command = Some(command);
        spec
    }

    fn transfer(kind: TaskKind, sources: Vec<PathBuf>, destination: Option<PathBuf>) -> Self {
        Self {
            kind,
            sources,
            destination,
            recursive: true,
            overwrite: None,
            error_policy: None,
            permissions: None,
            command: None,
        }
    }

    /// Set the overwrite policy.
    pub fn with_overwrite(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite = Some(policy);
        self
    }

    /// Set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = Some(policy);
        self
    }

    /// Set the recursive flag.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Check the description for missing or inconsistent parameters.
    pub fn validate(&self) -> Result<(), SpecError> {
        check_spec(
            self.kind,
            &self.sources,
            self.destination.as_ref(),
            self.permissions.as_ref(),
            self.command.as_ref(),
        )
    }
}

fn check_spec(
    kind: TaskKind,
    sources: &[PathBuf],
    destination: Option<&PathBuf>,
    permissions: Option<&PermissionChange>,
    command: Option<&ExecCommand>,
) -> Result<(), SpecError> {
    if kind == TaskKind::Exec {
        return match command {
            Some(cmd) if !cmd.program.is_empty() => Ok(()),
            _ => Err(SpecError::MissingCommand),
        };
    }
    if sources.is_empty() {
        return Err(SpecError::NoSources);
    }
    if let Some(path) = sources.iter().find(|p| !p.is_absolute()) {
        return Err(SpecError::RelativeSource { path: path.clone() });
    }
    if kind.needs_destination() && destination.is_none_or(|d| d.as_os_str().is_empty()) {
        return Err(SpecError::MissingDestination {
            kind: kind.to_string(),
        });
    }
    if kind == TaskKind::Chmod && permissions.is_none_or(|p| p.is_empty()) {
        return Err(SpecError::NoPermissionChange);
    }
    Ok(())
}
