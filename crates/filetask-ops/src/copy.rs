//! Copy, and the per-unit transfer walk shared with moves.

use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::debug;

use filetask_core::TaskError;

use crate::executor::{Context, Halt, Step, Visit, sorted_children};
use crate::link::place_symlink;
use crate::move_op;
use crate::resolver::Resolution;
use crate::size::stat;

/// How entries travel from source to destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Duplicate content; the source stays.
    Copy,
    /// Same-device move by rename.
    Rename,
    /// Cross-device move: copy each unit, then remove its source.
    Relocate,
}

/// Copy every root into `dest_dir`.
pub(crate) fn run(ctx: &mut Context, roots: &[PathBuf], dest_dir: &Path) -> Step {
    for root in roots {
        transfer_root(ctx, root, dest_dir, |_, _| Ok(Mode::Copy))?;
    }
    Ok(())
}

/// Transfer one source root. `choose` picks the mode once the root has
/// passed the path checks.
pub(crate) fn transfer_root<F>(ctx: &mut Context, root: &Path, dest_dir: &Path, choose: F) -> Step
where
    F: FnOnce(&mut Context, &Path) -> Result<Mode, TaskError>,
{
    let result = transfer_root_inner(ctx, root, dest_dir, choose);
    ctx.complete_root();
    match result {
        Err(Halt::SkipRoot) => Ok(()),
        other => other,
    }
}

fn transfer_root_inner<F>(ctx: &mut Context, root: &Path, dest_dir: &Path, choose: F) -> Step
where
    F: FnOnce(&mut Context, &Path) -> Result<Mode, TaskError>,
{
    ctx.begin_unit(root, Some(dest_dir))?;

    let Some(name) = root.file_name() else {
        let error = TaskError::Unsupported {
            message: format!("'{}' has no file name", root.display()),
        };
        return ctx.record(error, root);
    };
    if let Err(e) = fs::symlink_metadata(root) {
        return ctx.record(TaskError::io(root, e), root);
    }
    let follow = ctx.config.follow_symlinks;
    if let Err(e) = ctx.analyzer.ensure_not_inside(root, dest_dir, follow) {
        return ctx.record(e, root);
    }
    if let Err(e) = fs::create_dir_all(dest_dir) {
        return ctx.record(TaskError::io(dest_dir, e), dest_dir);
    }
    let mode = match choose(ctx, root) {
        Ok(mode) => mode,
        Err(e) => return ctx.record(e, root),
    };
    debug!(target: "filetask", task = %ctx.task.id, root = %root.display(), ?mode, "transferring");

    visit(ctx, root, &dest_dir.join(name), mode).map(|_| ())
}

fn visit(ctx: &mut Context, source: &Path, target: &Path, mode: Mode) -> Step<Visit> {
    ctx.begin_unit(source, Some(target))?;

    let follow = ctx.config.follow_symlinks && mode != Mode::Rename;
    let meta = match stat(source, follow) {
        Ok(meta) => meta,
        Err(e) => return ctx.fail(TaskError::io(source, e), source),
    };

    let (target, replace) = match ctx.resolve(source, &meta, target)? {
        None => return Ok(Visit::Incomplete),
        Some(Resolution::Write { target, replace }) => (target, replace),
        Some(Resolution::Skip) => {
            ctx.task.log(format!("skipped {}", source.display()));
            ctx.skip_tree(source);
            return Ok(Visit::Incomplete);
        }
        Some(Resolution::Abort) => return Err(Halt::Aborted),
    };

    if meta.is_dir() {
        visit_dir(ctx, source, &meta, &target, replace, mode)
    } else {
        transfer_leaf(ctx, source, &meta, &target, replace, mode)
    }
}

fn visit_dir(
    ctx: &mut Context,
    source: &Path,
    meta: &Metadata,
    target: &Path,
    replace: bool,
    mode: Mode,
) -> Step<Visit> {
    if mode == Mode::Rename && !replace {
        return move_op::rename_tree(ctx, source, target);
    }

    // Replacing a directory merges into it
    if !replace {
        if let Err(e) = fs::create_dir(target) {
            return ctx.fail(TaskError::io(target, e), source);
        }
    }
    ctx.add_items(1);

    let mut complete = true;
    if ctx.spec().recursive || mode != Mode::Copy {
        let children = match sorted_children(source) {
            Ok(children) => children,
            Err(e) => return ctx.fail(TaskError::io(source, e), source),
        };
        for child in children {
            let Some(name) = child.file_name() else {
                continue;
            };
            if visit(ctx, &child, &target.join(name), mode)? == Visit::Incomplete {
                complete = false;
            }
        }
    }

    match mode {
        Mode::Copy => {
            if let Err(e) = apply_metadata(target, meta, ctx.config.preserve_metadata) {
                debug!(target: "filetask", path = %target.display(), error = %e, "could not preserve metadata");
            }
        }
        Mode::Rename | Mode::Relocate if complete => {
            if let Err(e) = fs::remove_dir(source) {
                return ctx.fail(TaskError::io(source, e), source);
            }
        }
        _ => {}
    }

    Ok(if complete { Visit::Done } else { Visit::Incomplete })
}

fn transfer_leaf(
    ctx: &mut Context,
    source: &Path,
    meta: &Metadata,
    target: &Path,
    replace: bool,
    mode: Mode,
) -> Step<Visit> {
    if mode == Mode::Rename {
        return move_op::rename_leaf(ctx, source, meta, target);
    }

    let result = if meta.file_type().is_symlink() {
        copy_symlink(source, target, replace)
    } else if meta.is_file() {
        copy_file(ctx, source, meta, target, replace)?
    } else {
        Err(TaskError::Unsupported {
            message: format!("'{}' is not a regular file", source.display()),
        })
    };
    if let Err(e) = result {
        return ctx.fail(e, source);
    }
    ctx.add_items(1);

    if mode == Mode::Relocate {
        if let Err(e) = fs::remove_file(source) {
            return ctx.fail(TaskError::io(source, e), source);
        }
    }
    Ok(Visit::Done)
}

fn copy_symlink(source: &Path, target: &Path, replace: bool) -> Result<(), TaskError> {
    let points_to = fs::read_link(source).map_err(|e| TaskError::io(source, e))?;
    place_symlink(&points_to, target, replace).map_err(|e| TaskError::io(target, e))
}

/// Copy one regular file through a temporary file in the destination
/// directory. The destination appears only once its content is complete.
fn copy_file(
    ctx: &mut Context,
    source: &Path,
    meta: &Metadata,
    target: &Path,
    replace: bool,
) -> Step<Result<(), TaskError>> {
    let mut buffer = std::mem::take(&mut ctx.buffer);
    if buffer.is_empty() {
        buffer = vec![0; ctx.config.copy_buffer_size.max(1)];
    }
    let result = copy_contents(ctx, source, meta, target, replace, &mut buffer);
    ctx.buffer = buffer;
    result
}

fn copy_contents(
    ctx: &Context,
    source: &Path,
    meta: &Metadata,
    target: &Path,
    replace: bool,
    buffer: &mut [u8],
) -> Step<Result<(), TaskError>> {
    let dir = target.parent().unwrap_or(Path::new("."));
    let mut reader = match File::open(source) {
        Ok(file) => file,
        Err(e) => return Ok(Err(TaskError::io(source, e))),
    };
    let mut temp = match tempfile::Builder::new()
        .prefix(".filetask-")
        .suffix(".part")
        .tempfile_in(dir)
    {
        Ok(temp) => temp,
        Err(e) => return Ok(Err(TaskError::io(target, e))),
    };

    loop {
        let n = match reader.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Ok(Err(TaskError::io(source, e))),
        };
        if let Err(e) = temp.write_all(&buffer[..n]) {
            return Ok(Err(TaskError::io(target, e)));
        }
        ctx.add_bytes(n as u64);
        // Dropping the temp file on abort removes the partial copy
        ctx.checkpoint()?;
    }

    if let Err(e) = apply_metadata(temp.path(), meta, ctx.config.preserve_metadata) {
        return Ok(Err(TaskError::io(target, e)));
    }

    let persisted = if replace {
        temp.persist(target)
    } else {
        temp.persist_noclobber(target)
    };
    Ok(persisted
        .map(|_| ())
        .map_err(|e| TaskError::io(target, e.error)))
}

/// Copy permission bits, and timestamps when `preserve` is set.
fn apply_metadata(path: &Path, meta: &Metadata, preserve: bool) -> io::Result<()> {
    fs::set_permissions(path, meta.permissions())?;
    if preserve {
        filetime::set_file_times(
            path,
            FileTime::from_last_access_time(meta),
            FileTime::from_last_modification_time(meta),
        )?;
    }
    Ok(())
}
