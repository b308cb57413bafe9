//! Overwrite policies, decisions and collision records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::Display;

/// Policy a task starts with for destination collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OverwritePolicy {
    /// Ask the caller for every collision until a sticky decision is made.
    #[default]
    Ask,
    /// Overwrite every collision.
    Overwrite,
    /// Leave every existing destination untouched.
    Skip,
    /// Give every colliding item a fresh name.
    AutoRename,
}

/// A decision for one collision, possibly sticky for the rest of the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverwriteDecision {
    /// Overwrite this item only.
    OverwriteOnce,
    /// Overwrite this and all remaining collisions.
    OverwriteAll,
    /// Skip this item only.
    SkipOnce,
    /// Skip this and all remaining collisions.
    SkipAll,
    /// Give this item a generated name (e.g. "file (1).txt").
    AutoRename,
    /// Give this item the given file name in the same directory.
    RenameTo(String),
    /// Abort the entire task.
    Abort,
}

impl OverwriteDecision {
    /// Check if this decision applies to all remaining collisions.
    pub fn is_sticky(&self) -> bool {
        matches!(self, Self::OverwriteAll | Self::SkipAll)
    }

    /// The policy a sticky decision turns into.
    pub fn sticky_policy(&self) -> Option<OverwritePolicy> {
        match self {
            Self::OverwriteAll => Some(OverwritePolicy::Overwrite),
            Self::SkipAll => Some(OverwritePolicy::Skip),
            _ => None,
        }
    }
}

/// A destination collision waiting for resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// The source path being operated on.
    pub source: PathBuf,
    /// The destination path that already exists.
    pub destination: PathBuf,
    /// The kind of conflict.
    pub kind: ConflictKind,
    /// Size of the source in bytes (files only).
    pub source_size: u64,
    /// Size of the existing destination in bytes (files only).
    pub destination_size: u64,
}

impl Conflict {
    /// Create a new conflict.
    pub fn new(source: PathBuf, destination: PathBuf, kind: ConflictKind) -> Self {
        Self {
            source,
            destination,
            kind,
            source_size: 0,
            destination_size: 0,
        }
    }

    /// Attach source and destination sizes.
    pub fn with_sizes(mut self, source_size: u64, destination_size: u64) -> Self {
        self.source_size = source_size;
        self.destination_size = destination_size;
        self
    }
}

/// The kind of collision encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// A file already exists at the destination.
    FileExists,
    /// A directory already exists at the destination.
    DirectoryExists,
    /// Source and destination are the same object.
    SameFile,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileExists => write!(f, "File already exists"),
            Self::DirectoryExists => write!(f, "Directory already exists"),
            Self::SameFile => write!(f, "Source and destination are the same file"),
        }
    }
}
