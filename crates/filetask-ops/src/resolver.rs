//! Destination collision resolution.

use std::ffi::OsString;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use filetask_core::{Conflict, ConflictKind, OverwriteDecision, OverwritePolicy, TaskError};

use crate::analyzer::same_object;

/// Callback answering overwrite queries synchronously on the worker thread.
pub trait OverwritePrompt: Send + Sync {
    /// Decide what to do about `conflict`.
    fn decide(&self, conflict: &Conflict) -> OverwriteDecision;
}

impl<F> OverwritePrompt for F
where
    F: Fn(&Conflict) -> OverwriteDecision + Send + Sync,
{
    fn decide(&self, conflict: &Conflict) -> OverwriteDecision {
        self(conflict)
    }
}

/// What to do with one unit of work whose destination may collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Write to `target`; `replace` means an existing entry is taken over.
    Write { target: PathBuf, replace: bool },
    /// Leave the destination untouched.
    Skip,
    /// Abort the whole task.
    Abort,
}

/// Per-task collision resolver holding the (possibly sticky) policy.
#[derive(Debug, Clone)]
pub struct OverwriteResolver {
    policy: OverwritePolicy,
}

impl OverwriteResolver {
    /// Create a resolver starting with `policy`.
    pub fn new(policy: OverwritePolicy) -> Self {
        Self { policy }
    }

    /// The policy currently in force.
    pub fn policy(&self) -> OverwritePolicy {
        self.policy
    }

    /// Resolve the destination for `source`.
    ///
    /// `ask` is consulted only while the policy is `Ask`. A sticky decision
    /// replaces the policy for the rest of the task. A user-supplied name
    /// that collides again is resolved in turn.
    pub fn resolve<F>(
        &mut self,
        source: &Path,
        source_meta: &Metadata,
        destination: &Path,
        mut ask: F,
    ) -> Result<Resolution, TaskError>
    where
        F: FnMut(&Conflict) -> Result<OverwriteDecision, TaskError>,
    {
        let mut candidate = destination.to_path_buf();
        loop {
            let existing = match fs::symlink_metadata(&candidate) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Ok(Resolution::Write {
                        target: candidate,
                        replace: false,
                    });
                }
                Err(e) => return Err(TaskError::io(&candidate, e)),
            };

            let same = same_object(source_meta, source, &existing, &candidate);
            let decision = match self.policy {
                OverwritePolicy::Overwrite => OverwriteDecision::OverwriteOnce,
                OverwritePolicy::Skip => OverwriteDecision::SkipOnce,
                OverwritePolicy::AutoRename => OverwriteDecision::AutoRename,
                OverwritePolicy::Ask => {
                    let kind = if same {
                        ConflictKind::SameFile
                    } else if existing.is_dir() {
                        ConflictKind::DirectoryExists
                    } else {
                        ConflictKind::FileExists
                    };
                    let conflict = Conflict::new(source.to_path_buf(), candidate.clone(), kind)
                        .with_sizes(file_size(source_meta), file_size(&existing));
                    ask(&conflict)?
                }
            };

            if let Some(policy) = decision.sticky_policy() {
                self.policy = policy;
            }

            return match decision {
                OverwriteDecision::OverwriteOnce | OverwriteDecision::OverwriteAll => {
                    check_replaceable(source_meta, &existing, same, &candidate)?;
                    Ok(Resolution::Write {
                        target: candidate,
                        replace: true,
                    })
                }
                OverwriteDecision::SkipOnce | OverwriteDecision::SkipAll => Ok(Resolution::Skip),
                OverwriteDecision::AutoRename => Ok(Resolution::Write {
                    target: auto_rename_path(&candidate, source_meta.is_dir()),
                    replace: false,
                }),
                OverwriteDecision::RenameTo(name) => {
                    candidate = renamed(&candidate, &name)?;
                    continue;
                }
                OverwriteDecision::Abort => Ok(Resolution::Abort),
            };
        }
    }
}

fn file_size(meta: &Metadata) -> u64 {
    if meta.is_file() { meta.len() } else { 0 }
}

/// Directories only merge into directories, files only replace non-directories.
fn check_replaceable(
    source: &Metadata,
    existing: &Metadata,
    same: bool,
    destination: &Path,
) -> Result<(), TaskError> {
    let reason = if same {
        "source and destination are the same file"
    } else if source.is_dir() && !existing.is_dir() {
        "cannot replace a file with a directory"
    } else if !source.is_dir() && existing.is_dir() {
        "cannot replace a directory with a file"
    } else {
        return Ok(());
    };
    Err(TaskError::CannotOverwrite {
        path: destination.to_path_buf(),
        reason: reason.to_string(),
    })
}

fn renamed(candidate: &Path, name: &str) -> Result<PathBuf, TaskError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(std::path::MAIN_SEPARATOR)
    {
        return Err(TaskError::CannotOverwrite {
            path: candidate.to_path_buf(),
            reason: format!("invalid name '{name}'"),
        });
    }
    Ok(candidate.with_file_name(name))
}

/// Generate an auto-renamed path to avoid conflicts.
///
/// For "file.txt", tries "file (1).txt" up to "file (999).txt", then
/// "file_<unix seconds>.txt" with a counter until a name is free. Directory
/// names are never split at a dot. Names need not be valid UTF-8.
pub fn auto_rename_path(path: &Path, is_dir: bool) -> PathBuf {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    auto_rename_within(path, is_dir, 1000, timestamp)
}

fn auto_rename_within(path: &Path, is_dir: bool, limit: u32, timestamp: u64) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    let (stem, extension) = if is_dir {
        (path.file_name().unwrap_or_default(), None)
    } else {
        (path.file_stem().unwrap_or_default(), path.extension())
    };

    let name = |suffix: String| {
        let mut name = OsString::from(stem);
        name.push(suffix);
        if let Some(ext) = extension {
            name.push(".");
            name.push(ext);
        }
        parent.join(name)
    };
    let free = |candidate: &PathBuf| fs::symlink_metadata(candidate).is_err();

    let numbered = (1..limit).map(|i| name(format!(" ({i})")));
    let stamped = std::iter::once(name(format!("_{timestamp}")))
        .chain((1..).map(|i| name(format!("_{timestamp}_{i}"))));
    numbered
        .chain(stamped)
        .find(free)
        .unwrap_or_else(|| path.to_path_buf())
}
