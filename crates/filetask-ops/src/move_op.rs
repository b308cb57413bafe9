//! Move: rename on the same device, copy-then-remove across devices.

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use filetask_core::TaskError;

use crate::copy::{Mode, transfer_root};
use crate::executor::{Context, Step, Visit};
use crate::size::tree_totals;

/// Move every root into `dest_dir`.
pub(crate) fn run(ctx: &mut Context, roots: &[PathBuf], dest_dir: &Path) -> Step {
    for root in roots {
        transfer_root(ctx, root, dest_dir, |ctx, root| {
            let same = ctx.analyzer.same_device(root, dest_dir)?;
            Ok(if same { Mode::Rename } else { Mode::Relocate })
        })?;
    }
    Ok(())
}

fn rename(source: &Path, target: &Path) -> Result<(), TaskError> {
    fs::rename(source, target).map_err(|e| {
        if e.kind() == io::ErrorKind::CrossesDevices {
            TaskError::CrossDeviceRenameFailed {
                path: source.to_path_buf(),
                destination: target.to_path_buf(),
            }
        } else {
            TaskError::io(source, e)
        }
    })
}

/// Rename a whole directory in one step; its bytes and units are reported
/// together once the rename has succeeded.
pub(crate) fn rename_tree(ctx: &mut Context, source: &Path, target: &Path) -> Step<Visit> {
    let totals = tree_totals(source, false);
    if let Err(e) = rename(source, target) {
        return ctx.fail(e, source);
    }
    ctx.add_bytes(totals.bytes);
    ctx.add_items(totals.items);
    Ok(Visit::Done)
}

/// Rename one non-directory entry.
pub(crate) fn rename_leaf(
    ctx: &mut Context,
    source: &Path,
    meta: &Metadata,
    target: &Path,
) -> Step<Visit> {
    if let Err(e) = rename(source, target) {
        return ctx.fail(e, source);
    }
    if meta.is_file() {
        ctx.add_bytes(meta.len());
    }
    ctx.add_items(1);
    Ok(Visit::Done)
}
