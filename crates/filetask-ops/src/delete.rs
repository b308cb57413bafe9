//! Permanent deletion.

use std::fs;
use std::path::{Path, PathBuf};

use filetask_core::TaskError;

use crate::executor::{Context, Halt, Step, Visit, sorted_children};

/// Delete every root.
pub(crate) fn run(ctx: &mut Context, roots: &[PathBuf]) -> Step {
    for root in roots {
        let result = delete_entry(ctx, root);
        ctx.complete_root();
        match result {
            Err(Halt::SkipRoot) | Ok(_) => {}
            Err(halt) => return Err(halt),
        }
    }
    Ok(())
}

/// Remove `path`, children first. A directory whose children could not all
/// be removed is left in place.
fn delete_entry(ctx: &mut Context, path: &Path) -> Step<Visit> {
    ctx.begin_unit(path, None)?;

    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) => return ctx.fail(TaskError::io(path, e), path),
    };

    if meta.is_dir() {
        if ctx.spec().recursive {
            let children = match sorted_children(path) {
                Ok(children) => children,
                Err(e) => return ctx.fail(TaskError::io(path, e), path),
            };
            let mut complete = true;
            for child in children {
                if delete_entry(ctx, &child)? == Visit::Incomplete {
                    complete = false;
                }
            }
            if !complete {
                return Ok(Visit::Incomplete);
            }
        }
        if let Err(e) = fs::remove_dir(path) {
            return ctx.fail(TaskError::io(path, e), path);
        }
    } else {
        if let Err(e) = fs::remove_file(path) {
            return ctx.fail(TaskError::io(path, e), path);
        }
        if meta.is_file() {
            ctx.add_bytes(meta.len());
        }
    }

    ctx.add_items(1);
    Ok(Visit::Done)
}
