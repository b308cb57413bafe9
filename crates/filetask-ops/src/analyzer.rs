//! Same-device and ancestry checks for source/destination pairs.

use std::collections::HashMap;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use filetask_core::{DeviceId, TaskError, TaskSpec};

use crate::size::stat;

/// Resolves a path to its (device, inode) identity.
pub trait DeviceLookup: Send + Sync {
    /// Identify the object at `path`, following symlinks.
    fn identify(&self, path: &Path) -> io::Result<DeviceId>;
}

/// Device lookup backed by filesystem metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataLookup;

impl DeviceLookup for MetadataLookup {
    fn identify(&self, path: &Path) -> io::Result<DeviceId> {
        std::fs::metadata(path).map(|m| device_id(&m))
    }
}

/// Get the device identity from metadata.
#[cfg(unix)]
pub(crate) fn device_id(metadata: &Metadata) -> DeviceId {
    DeviceId::new(metadata.dev(), metadata.ino())
}

#[cfg(not(unix))]
pub(crate) fn device_id(_metadata: &Metadata) -> DeviceId {
    DeviceId::new(0, 0) // No inode numbers; same-file checks fall back to paths
}

/// Check whether two metadata records describe the same object.
#[cfg(unix)]
pub(crate) fn same_object(a: &Metadata, _a_path: &Path, b: &Metadata, _b_path: &Path) -> bool {
    device_id(a) == device_id(b)
}

#[cfg(not(unix))]
pub(crate) fn same_object(_a: &Metadata, a_path: &Path, _b: &Metadata, b_path: &Path) -> bool {
    match (a_path.canonicalize(), b_path.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Find the closest ancestor of `path` (or `path` itself) that exists.
pub(crate) fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
}

/// Per-task analyzer caching device identities for the task's duration.
pub struct PathAnalyzer {
    lookup: Arc<dyn DeviceLookup>,
    cache: HashMap<PathBuf, DeviceId>,
}

impl PathAnalyzer {
    /// Create an analyzer over a lookup collaborator.
    pub fn new(lookup: Arc<dyn DeviceLookup>) -> Self {
        Self {
            lookup,
            cache: HashMap::new(),
        }
    }

    /// Identity of `path`, cached.
    pub fn identify(&mut self, path: &Path) -> Result<DeviceId, TaskError> {
        if let Some(id) = self.cache.get(path) {
            return Ok(*id);
        }
        let id = self
            .lookup
            .identify(path)
            .map_err(|e| TaskError::io(path, e))?;
        self.cache.insert(path.to_path_buf(), id);
        Ok(id)
    }

    /// Whether `source` and the destination directory share a device.
    ///
    /// A destination that does not exist yet is judged by its nearest
    /// existing ancestor.
    pub fn same_device(&mut self, source: &Path, dest_dir: &Path) -> Result<bool, TaskError> {
        let src = self.identify(source)?;
        let anchor = nearest_existing(dest_dir).ok_or_else(|| TaskError::NotFound {
            path: dest_dir.to_path_buf(),
        })?;
        let dst = self.identify(&anchor)?;
        Ok(src.same_device(&dst))
    }

    /// Reject placing `source` into `dest_dir` when `dest_dir` is `source`
    /// itself or one of its descendants.
    ///
    /// Walks from the destination up to the filesystem root comparing
    /// device+inode identities, so symlinked and `..`-laden paths are caught.
    /// With `follow_symlinks`, a link to a directory counts as that directory.
    pub fn ensure_not_inside(
        &mut self,
        source: &Path,
        dest_dir: &Path,
        follow_symlinks: bool,
    ) -> Result<(), TaskError> {
        let is_dir = stat(source, follow_symlinks)
            .map(|m| m.is_dir())
            .map_err(|e| TaskError::io(source, e))?;
        if !is_dir {
            return Ok(());
        }

        let src = self.identify(source)?;
        let Some(anchor) = nearest_existing(dest_dir) else {
            return Ok(());
        };
        let anchor = anchor.canonicalize().unwrap_or(anchor);

        for ancestor in anchor.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            if self.identify(ancestor)? == src {
                return Err(TaskError::DestinationInsideSource {
                    path: source.to_path_buf(),
                    destination: dest_dir.to_path_buf(),
                });
            }
        }
        Ok(())
    }
}

/// Device ids a task touches, used as scheduler resource keys.
///
/// Unresolvable paths contribute nothing.
pub fn resource_keys(lookup: &dyn DeviceLookup, spec: &TaskSpec) -> Vec<u64> {
    let mut keys: Vec<u64> = spec
        .sources
        .iter()
        .chain(spec.destination.iter())
        .filter_map(|p| nearest_existing(p))
        .filter_map(|p| lookup.identify(&p).ok())
        .map(|id| id.device)
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}
