//! Permission and ownership changes.

use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

use filetask_core::{PermissionChange, TaskError};

use crate::executor::{Context, Halt, Step, Visit, sorted_children};

/// Apply the task's permission change to every root.
pub(crate) fn run(ctx: &mut Context, roots: &[PathBuf]) -> Step {
    let Some(change) = ctx.spec().permissions else {
        return Ok(());
    };
    for root in roots {
        let result = change_entry(ctx, root, &change);
        ctx.complete_root();
        match result {
            Err(Halt::SkipRoot) | Ok(_) => {}
            Err(halt) => return Err(halt),
        }
    }
    Ok(())
}

fn change_entry(ctx: &mut Context, path: &Path, change: &PermissionChange) -> Step<Visit> {
    ctx.begin_unit(path, None)?;

    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) => return ctx.fail(TaskError::io(path, e), path),
    };

    if !(meta.is_dir() && ctx.spec().recursive) {
        return apply_counted(ctx, path, &meta, change);
    }

    // Directories that stay traversable are changed before their children,
    // the others after, so the walk never locks itself out.
    let first = keeps_traversable(&meta, change);
    if first && apply_counted(ctx, path, &meta, change)? == Visit::Incomplete {
        return Ok(Visit::Incomplete);
    }

    let children = match sorted_children(path) {
        Ok(children) => children,
        Err(e) => return ctx.fail(TaskError::io(path, e), path),
    };
    let mut complete = true;
    for child in children {
        if change_entry(ctx, &child, change)? == Visit::Incomplete {
            complete = false;
        }
    }

    if !first && apply_counted(ctx, path, &meta, change)? == Visit::Incomplete {
        complete = false;
    }
    Ok(if complete { Visit::Done } else { Visit::Incomplete })
}

fn apply_counted(
    ctx: &mut Context,
    path: &Path,
    meta: &Metadata,
    change: &PermissionChange,
) -> Step<Visit> {
    if let Err(e) = apply(path, meta, change) {
        return ctx.fail(e, path);
    }
    ctx.add_items(1);
    Ok(Visit::Done)
}

#[cfg(unix)]
fn keeps_traversable(meta: &Metadata, change: &PermissionChange) -> bool {
    use std::os::unix::fs::PermissionsExt;

    change
        .mode
        .is_none_or(|edit| edit.apply(meta.permissions().mode()) & 0o500 == 0o500)
}

#[cfg(not(unix))]
fn keeps_traversable(_meta: &Metadata, _change: &PermissionChange) -> bool {
    true
}

/// Symlinks keep their mode; ownership changes apply to the link itself.
#[cfg(unix)]
fn apply(path: &Path, meta: &Metadata, change: &PermissionChange) -> Result<(), TaskError> {
    use std::os::unix::fs::PermissionsExt;

    if change.changes_owner() {
        std::os::unix::fs::lchown(path, change.uid, change.gid)
            .map_err(|e| TaskError::io(path, e))?;
    }
    if let Some(edit) = change.mode {
        if !meta.file_type().is_symlink() {
            let mode = edit.apply(meta.permissions().mode());
            fs::set_permissions(path, fs::Permissions::from_mode(mode))
                .map_err(|e| TaskError::io(path, e))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply(_path: &Path, _meta: &Metadata, _change: &PermissionChange) -> Result<(), TaskError> {
    Err(TaskError::Unsupported {
        message: "permission changes require a Unix platform".to_string(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use filetask_core::ModeEdit;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_apply_mode_edit() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("f");
        fs::write(&file, "x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

        let meta = fs::symlink_metadata(&file).unwrap();
        apply(&file, &meta, &PermissionChange::mode(ModeEdit::add(0o100))).unwrap();
        let mode = fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o744);
    }

    #[test]
    fn test_traversable() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o755)).unwrap();
        let meta = fs::metadata(temp.path()).unwrap();

        assert!(keeps_traversable(
            &meta,
            &PermissionChange::mode(ModeEdit::exact(0o700))
        ));
        assert!(!keeps_traversable(
            &meta,
            &PermissionChange::mode(ModeEdit::remove(0o100))
        ));
        assert!(keeps_traversable(&meta, &PermissionChange::owner(Some(0), None)));
    }
}
