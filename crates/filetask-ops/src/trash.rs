//! Trash relocation.

use std::path::{Path, PathBuf};

use filetask_core::TaskError;

use crate::executor::{Context, Step};
use crate::size::tree_totals;

/// Moves entries into a recoverable trash location.
pub trait TrashStore: Send + Sync {
    /// Relocate `path` (and everything under it) to the trash.
    fn relocate(&self, path: &Path) -> Result<(), TaskError>;
}

/// The desktop trash of the current user.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTrash;

impl TrashStore for SystemTrash {
    fn relocate(&self, path: &Path) -> Result<(), TaskError> {
        trash::delete(path).map_err(|e| TaskError::TrashUnavailable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Trash every root. A failed relocation is an error, never a fallback to
/// permanent deletion.
pub(crate) fn run(ctx: &mut Context, roots: &[PathBuf]) -> Step {
    for root in roots {
        ctx.begin_unit(root, None)?;

        if let Err(e) = std::fs::symlink_metadata(root) {
            ctx.record(TaskError::io(root, e), root)?;
            ctx.complete_root();
            continue;
        }

        let totals = tree_totals(root, false);
        match ctx.trash.relocate(root) {
            Ok(()) => {
                ctx.add_bytes(totals.bytes);
                ctx.add_items(totals.items);
            }
            Err(e) => ctx.record(e, root)?,
        }
        ctx.complete_root();
    }
    Ok(())
}
