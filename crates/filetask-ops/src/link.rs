//! Symbolic link creation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetask_core::TaskError;

use crate::executor::{Context, Halt, Step};
use crate::resolver::Resolution;

/// Create a link to every root inside `dest_dir`.
pub(crate) fn run(ctx: &mut Context, roots: &[PathBuf], dest_dir: &Path) -> Step {
    for root in roots {
        let result = link_root(ctx, root, dest_dir);
        ctx.complete_root();
        match result {
            Err(Halt::SkipRoot) | Ok(()) => {}
            Err(halt) => return Err(halt),
        }
    }
    Ok(())
}

fn link_root(ctx: &mut Context, root: &Path, dest_dir: &Path) -> Step {
    ctx.begin_unit(root, Some(dest_dir))?;

    let Some(name) = root.file_name() else {
        let error = TaskError::Unsupported {
            message: format!("'{}' has no file name", root.display()),
        };
        return ctx.record(error, root);
    };
    let meta = match fs::symlink_metadata(root) {
        Ok(meta) => meta,
        Err(e) => return ctx.record(TaskError::io(root, e), root),
    };
    if let Err(e) = fs::create_dir_all(dest_dir) {
        return ctx.record(TaskError::io(dest_dir, e), dest_dir);
    }

    let (target, replace) = match ctx.resolve(root, &meta, &dest_dir.join(name))? {
        None => return Ok(()),
        Some(Resolution::Write { target, replace }) => (target, replace),
        Some(Resolution::Skip) => {
            ctx.add_items(1);
            return Ok(());
        }
        Some(Resolution::Abort) => return Err(Halt::Aborted),
    };

    ctx.task.set_current(root, Some(&target));
    if let Err(e) = place_symlink(root, &target, replace) {
        return ctx.record(TaskError::io(&target, e), root);
    }
    ctx.add_items(1);
    Ok(())
}

/// Create a symlink at `at` pointing to `points_to`.
///
/// With `replace`, the link is built under a temporary name beside `at` and
/// renamed over it, so the old entry is never missing.
pub(crate) fn place_symlink(points_to: &Path, at: &Path, replace: bool) -> io::Result<()> {
    if !replace {
        return symlink(points_to, at);
    }
    let dir = at.parent().unwrap_or(Path::new("."));
    let temp = tempfile::Builder::new()
        .prefix(".filetask-")
        .suffix(".link")
        .make_in(dir, |path| symlink(points_to, path))?;
    temp.persist(at).map(|_| ()).map_err(|e| e.error)
}

#[cfg(unix)]
fn symlink(points_to: &Path, at: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(points_to, at)
}

#[cfg(windows)]
fn symlink(points_to: &Path, at: &Path) -> io::Result<()> {
    if points_to.is_dir() {
        std::os::windows::fs::symlink_dir(points_to, at)
    } else {
        std::os::windows::fs::symlink_file(points_to, at)
    }
}

#[cfg(not(any(unix, windows)))]
fn symlink(_points_to: &Path, _at: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}
