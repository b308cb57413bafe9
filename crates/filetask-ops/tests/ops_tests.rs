use filetask_core::{
    Conflict, ConflictKind, ControlError, DeviceId, EngineConfig, ErrorKind, ErrorPolicy,
    OverwriteDecision, OverwritePolicy, TaskError, TaskEvent, TaskId, TaskOutcome, TaskSpec, TaskState,
};
use filetask_ops::{
    Collaborators, DeviceLookup, MetadataLookup, OverwritePrompt, TaskHandle, TaskRegistry,
    TrashStore,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn wait_for_state(handle: &TaskHandle, state: TaskState) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.state() != state {
        assert!(
            Instant::now() < deadline,
            "task never reached {state}, stuck in {}",
            handle.state()
        );
        thread::sleep(Duration::from_millis(5));
    }
}

fn small_buffer() -> EngineConfig {
    EngineConfig::builder()
        .copy_buffer_size(4usize)
        .build()
        .unwrap()
}

fn leftovers(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".filetask-"))
        .collect()
}

/// Prompt that can reach the task it answers for.
fn self_prompt<F>(answer: F) -> (Arc<OnceLock<TaskHandle>>, Arc<dyn OverwritePrompt>)
where
    F: Fn(&TaskHandle, &Conflict) -> OverwriteDecision + Send + Sync + 'static,
{
    let cell: Arc<OnceLock<TaskHandle>> = Arc::new(OnceLock::new());
    let inner = Arc::clone(&cell);
    let prompt = move |conflict: &Conflict| {
        let handle = inner.get().expect("handle registered before run");
        answer(handle, conflict)
    };
    (cell, Arc::new(prompt))
}

/// Places everything under `split` on a second device.
struct SplitLookup {
    split: PathBuf,
}

impl DeviceLookup for SplitLookup {
    fn identify(&self, path: &Path) -> io::Result<DeviceId> {
        let real = MetadataLookup.identify(path)?;
        let device = if path.starts_with(&self.split) { 2 } else { 1 };
        Ok(DeviceId::new(device, real.inode))
    }
}

/// Trash that moves entries into a directory, or always fails.
struct DirTrash {
    dir: Option<PathBuf>,
}

impl TrashStore for DirTrash {
    fn relocate(&self, path: &Path) -> Result<(), TaskError> {
        match &self.dir {
            Some(dir) => fs::rename(path, dir.join(path.file_name().unwrap()))
                .map_err(|e| TaskError::io(path, e)),
            None => Err(TaskError::TrashUnavailable {
                path: path.to_path_buf(),
                message: "no trash on this volume".to_string(),
            }),
        }
    }
}

#[test]
fn test_copy_three_files() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dst = temp.path().join("dst");
    fs::create_dir(&src).unwrap();

    let sources: Vec<PathBuf> = (0..3)
        .map(|i| {
            let path = src.join(format!("file{i}.bin"));
            fs::write(&path, vec![i as u8; 1000 * (i + 1)]).unwrap();
            path
        })
        .collect();

    let registry = TaskRegistry::new(small_buffer());
    let task = registry.new_task(TaskSpec::copy(sources, &dst)).unwrap();
    assert_eq!(task.state(), TaskState::Pending);
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(snap.total_bytes, Some(6000));
    assert_eq!(snap.bytes_done, 6000);
    assert_eq!(snap.items_done, 3);
    assert_eq!(snap.percent, Some(100));
    assert_eq!(snap.error_count, 0);
    assert_eq!(fs::read(dst.join("file2.bin")).unwrap(), vec![2u8; 3000]);
    assert!(src.join("file0.bin").exists());
    assert!(leftovers(&dst).is_empty());
}

#[test]
fn test_copy_tree_preserves_structure() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("tree");
    fs::create_dir_all(root.join("a/b")).unwrap();
    fs::write(root.join("top.txt"), "top").unwrap();
    fs::write(root.join("a/b/deep.txt"), "deep").unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink("top.txt", root.join("link")).unwrap();

    let registry = TaskRegistry::default();
    let dst = temp.path().join("out");
    let task = registry.new_task(TaskSpec::copy(vec![root], &dst)).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(
        fs::read_to_string(dst.join("tree/a/b/deep.txt")).unwrap(),
        "deep"
    );
    #[cfg(unix)]
    assert_eq!(
        fs::read_link(dst.join("tree/link")).unwrap(),
        PathBuf::from("top.txt")
    );
    assert_eq!(snap.total_items, Some(snap.items_done));
}

#[test]
fn test_move_into_descendant_rejected() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a");
    fs::create_dir_all(a.join("b")).unwrap();
    fs::write(a.join("keep.txt"), "x").unwrap();

    let registry = TaskRegistry::default();
    let task = registry
        .new_task(TaskSpec::move_to(vec![a.clone()], a.join("b")))
        .unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.error_count, 1);
    assert_eq!(
        snap.first_error.as_ref().unwrap().kind,
        ErrorKind::DestinationInsideSource
    );
    assert_eq!(snap.outcome, Some(TaskOutcome::CompletedWithErrors));
    assert!(a.join("keep.txt").exists());
    assert!(!a.join("b/a").exists());
}

#[cfg(unix)]
#[test]
fn test_followed_link_copied_into_its_target_rejected() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("d");
    fs::create_dir_all(dir.join("sub")).unwrap();
    let link = temp.path().join("l");
    std::os::unix::fs::symlink(&dir, &link).unwrap();

    let config = EngineConfig::builder().follow_symlinks(true).build().unwrap();
    let registry = TaskRegistry::new(config);
    let task = registry
        .new_task(TaskSpec::copy(vec![link], dir.join("sub")))
        .unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.errors[0].kind, ErrorKind::DestinationInsideSource);
    assert!(!dir.join("sub/l").exists());
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_continues() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    fs::create_dir(&src).unwrap();
    let names = ["one.txt", "two.txt", "three.txt"];
    for name in names {
        fs::write(src.join(name), name).unwrap();
    }
    let locked = src.join("two.txt");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read(&locked).is_ok() {
        // Privileged user; permissions are not enforced
        return;
    }

    let dst = temp.path().join("dst");
    let registry = TaskRegistry::default();
    let sources = names.iter().map(|n| src.join(n)).collect();
    let task = registry.new_task(TaskSpec::copy(sources, &dst)).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.error_count, 1);
    assert_eq!(snap.errors[0].kind, ErrorKind::PermissionDenied);
    assert_eq!(snap.outcome, Some(TaskOutcome::CompletedWithErrors));
    assert!(dst.join("one.txt").exists());
    assert!(dst.join("three.txt").exists());
    assert!(!dst.join("two.txt").exists());
}

#[test]
fn test_first_error_stops() {
    let temp = TempDir::new().unwrap();
    let present = temp.path().join("present.txt");
    fs::write(&present, "x").unwrap();

    let registry = TaskRegistry::default();
    let spec = TaskSpec::delete(vec![
        temp.path().join("missing-1"),
        temp.path().join("missing-2"),
        present.clone(),
    ])
    .with_error_policy(ErrorPolicy::FirstErrorStops);
    let task = registry.new_task(spec).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.error_count, 1);
    assert_eq!(snap.outcome, Some(TaskOutcome::Failed));
    assert!(present.exists());
}

#[test]
fn test_any_error_stops_attempts_everything() {
    let temp = TempDir::new().unwrap();
    let present = temp.path().join("present.txt");
    fs::write(&present, "x").unwrap();

    let registry = TaskRegistry::default();
    let spec = TaskSpec::delete(vec![temp.path().join("missing"), present.clone()])
        .with_error_policy(ErrorPolicy::AnyErrorStops);
    let task = registry.new_task(spec).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Failed));
    assert!(!present.exists());
}

#[test]
fn test_same_device_move_renames() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("data.bin");
    fs::write(&file, vec![7u8; 4096]).unwrap();
    let dst = temp.path().join("dst");

    let registry = TaskRegistry::default();
    let task = registry
        .new_task(TaskSpec::move_to(vec![file.clone()], &dst))
        .unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(snap.bytes_done, 4096);
    assert!(!file.exists());
    assert_eq!(fs::read(dst.join("data.bin")).unwrap().len(), 4096);
}

#[test]
fn test_cross_device_move_copies_then_removes() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    fs::create_dir_all(src.join("inner")).unwrap();
    fs::write(src.join("inner/x.txt"), "xx").unwrap();
    let far = temp.path().join("far");
    fs::create_dir(&far).unwrap();

    let collaborators = Collaborators {
        lookup: Arc::new(SplitLookup { split: far.clone() }),
        ..Default::default()
    };
    let registry = TaskRegistry::with_collaborators(EngineConfig::default(), collaborators);
    let task = registry
        .new_task(TaskSpec::move_to(vec![src.clone()], &far))
        .unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(fs::read_to_string(far.join("src/inner/x.txt")).unwrap(), "xx");
    assert!(!src.exists());
}

#[test]
fn test_skip_all_leaves_destination() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dst = temp.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::create_dir(&dst).unwrap();
    for name in ["a.txt", "b.txt"] {
        fs::write(src.join(name), "new").unwrap();
        fs::write(dst.join(name), "old").unwrap();
    }

    let asked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&asked);
    let prompt = move |conflict: &Conflict| {
        assert_eq!(conflict.kind, ConflictKind::FileExists);
        counter.fetch_add(1, Ordering::SeqCst);
        OverwriteDecision::SkipAll
    };

    let registry = TaskRegistry::default();
    let spec = TaskSpec::copy(vec![src.join("a.txt"), src.join("b.txt")], &dst);
    let task = registry.new_task_with_prompt(spec, Arc::new(prompt)).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "old");
    assert_eq!(fs::read_to_string(dst.join("b.txt")).unwrap(), "old");
}

#[test]
fn test_auto_rename_unique_names() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("report.txt");
    fs::write(&file, "r").unwrap();
    let dst = temp.path().join("dst");

    let registry = TaskRegistry::default();
    for _ in 0..3 {
        let spec =
            TaskSpec::copy(vec![file.clone()], &dst).with_overwrite(OverwritePolicy::AutoRename);
        let task = registry.new_task(spec).unwrap();
        task.run().unwrap();
        assert_eq!(task.wait().outcome, Some(TaskOutcome::Completed));
    }

    assert!(dst.join("report.txt").exists());
    assert!(dst.join("report (1).txt").exists());
    assert!(dst.join("report (2).txt").exists());
}

#[test]
fn test_overwrite_query_blocks_until_resolved() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("a.txt");
    let dst = temp.path().join("dst");
    fs::create_dir(&dst).unwrap();
    fs::write(&src, "new").unwrap();
    fs::write(dst.join("a.txt"), "old").unwrap();

    let registry = TaskRegistry::default();
    let mut events = registry.subscribe();
    let task = registry
        .new_task(TaskSpec::copy(vec![src], &dst))
        .unwrap();
    assert_eq!(
        task.resolve_overwrite(OverwriteDecision::SkipOnce),
        Err(ControlError::NotWaiting)
    );
    task.run().unwrap();
    wait_for_state(&task, TaskState::QueryOverwrite);

    let snap = task.snapshot();
    let conflict = snap.pending_conflict.expect("conflict published");
    assert_eq!(conflict.destination, dst.join("a.txt"));
    assert_eq!(
        registry.remove(task.id()).unwrap_err(),
        ControlError::StillRunning
    );

    task.resolve_overwrite(OverwriteDecision::OverwriteOnce)
        .unwrap();
    let snap = task.wait();
    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "new");

    let mut saw_query = false;
    let mut saw_finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            TaskEvent::OverwriteQuery { .. } => saw_query = true,
            TaskEvent::Finished { outcome, .. } => {
                assert_eq!(outcome, TaskOutcome::Completed);
                saw_finished = true;
            }
            _ => {}
        }
    }
    assert!(saw_query && saw_finished);

    assert!(registry.remove(task.id()).is_ok());
    assert!(registry.get(task.id()).is_none());
}

#[test]
fn test_pause_resume_mid_file() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dst = temp.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::create_dir(&dst).unwrap();
    fs::write(src.join("a.txt"), "A".repeat(64)).unwrap();
    fs::write(src.join("b.txt"), "B".repeat(64)).unwrap();
    fs::write(dst.join("a.txt"), "old").unwrap();

    let (cell, prompt) = self_prompt(|handle, _| {
        handle.request_pause();
        OverwriteDecision::OverwriteOnce
    });
    let registry = TaskRegistry::new(small_buffer());
    let spec = TaskSpec::copy(vec![src.join("a.txt"), src.join("b.txt")], &dst);
    let task = registry.new_task_with_prompt(spec, prompt).unwrap();
    cell.set(task.clone()).unwrap();

    task.run().unwrap();
    wait_for_state(&task, TaskState::Paused);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(task.state(), TaskState::Paused);
    assert!(!dst.join("b.txt").exists());
    let paused_bytes = task.snapshot().bytes_done;
    assert!(paused_bytes < 128);

    task.request_resume();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(snap.bytes_done, 128);
    assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "A".repeat(64));
    assert_eq!(fs::read_to_string(dst.join("b.txt")).unwrap(), "B".repeat(64));
    assert!(snap.log.iter().any(|line| line == "paused"));
}

#[test]
fn test_abort_leaves_no_partial_files() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dst = temp.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::create_dir(&dst).unwrap();
    fs::write(src.join("a.txt"), "A".repeat(64)).unwrap();
    fs::write(src.join("b.txt"), "B".repeat(64)).unwrap();
    fs::write(dst.join("a.txt"), "old").unwrap();

    let (cell, prompt) = self_prompt(|handle, _| {
        handle.request_pause();
        OverwriteDecision::OverwriteOnce
    });
    let registry = TaskRegistry::new(small_buffer());
    let spec = TaskSpec::copy(vec![src.join("a.txt"), src.join("b.txt")], &dst);
    let task = registry.new_task_with_prompt(spec, prompt).unwrap();
    cell.set(task.clone()).unwrap();

    task.run().unwrap();
    wait_for_state(&task, TaskState::Paused);
    task.request_abort();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Aborted));
    assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "old");
    assert!(!dst.join("b.txt").exists());
    assert!(leftovers(&dst).is_empty());
}

#[test]
fn test_abort_before_run() {
    let temp = TempDir::new().unwrap();
    let registry = TaskRegistry::default();
    let task = registry
        .new_task(TaskSpec::delete(vec![temp.path().join("x")]))
        .unwrap();

    task.request_abort();
    assert_eq!(task.state(), TaskState::Finished);
    assert_eq!(task.run(), Err(ControlError::AlreadyRunning));
    assert_eq!(task.snapshot().outcome, Some(TaskOutcome::Aborted));
}

#[test]
fn test_wait_on_pending_task_returns() {
    let temp = TempDir::new().unwrap();
    let registry = TaskRegistry::default();
    let task = registry
        .new_task(TaskSpec::delete(vec![temp.path().join("x")]))
        .unwrap();

    let snap = task.wait();
    assert_eq!(snap.state, TaskState::Pending);
    assert_eq!(snap.outcome, None);
}

#[test]
fn test_run_twice_rejected() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("f");
    fs::write(&file, "x").unwrap();

    let registry = TaskRegistry::default();
    let task = registry.new_task(TaskSpec::delete(vec![file])).unwrap();
    task.run().unwrap();
    assert_eq!(task.run(), Err(ControlError::AlreadyRunning));
    task.wait();
}

#[test]
fn test_invalid_spec_rejected() {
    let registry = TaskRegistry::default();
    let spec = TaskSpec::copy(vec![PathBuf::from("relative.txt")], "/tmp");
    assert!(registry.new_task(spec).is_err());
    assert!(registry.tasks().is_empty());
}

/// Start a copy that parks in an overwrite query.
fn blocked_copy(registry: &TaskRegistry, root: &Path, name: &str) -> TaskHandle {
    let src = root.join(format!("{name}.txt"));
    let dst = root.join(format!("{name}-dst"));
    fs::create_dir_all(&dst).unwrap();
    fs::write(&src, "new").unwrap();
    fs::write(dst.join(format!("{name}.txt")), "old").unwrap();

    let task = registry.new_task(TaskSpec::copy(vec![src], dst)).unwrap();
    task.run().unwrap();
    wait_for_state(&task, TaskState::QueryOverwrite);
    task
}

#[test]
fn test_manual_queue_waits_for_resume() {
    let temp = TempDir::new().unwrap();
    let config = EngineConfig::builder().smart_queue(false).build().unwrap();
    let registry = TaskRegistry::new(config);

    let first = blocked_copy(&registry, temp.path(), "first");
    let file = temp.path().join("second.txt");
    fs::write(&file, "2").unwrap();
    let second = registry
        .new_task(TaskSpec::copy(vec![file], temp.path().join("second-dst")))
        .unwrap();
    second.run().unwrap();
    assert_eq!(second.state(), TaskState::Queued);
    assert_eq!(registry.queued(), vec![second.id()]);

    first
        .resolve_overwrite(OverwriteDecision::SkipOnce)
        .unwrap();
    first.wait();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(second.state(), TaskState::Queued);

    second.request_resume();
    let snap = second.wait();
    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert!(temp.path().join("second-dst/second.txt").exists());
}

#[test]
fn test_queued_task_defers_size_discovery() {
    let temp = TempDir::new().unwrap();
    let config = EngineConfig::builder().smart_queue(false).build().unwrap();
    let registry = TaskRegistry::new(config);

    let first = blocked_copy(&registry, temp.path(), "first");
    let file = temp.path().join("second.txt");
    fs::write(&file, "hello").unwrap();
    let second = registry
        .new_task(TaskSpec::copy(vec![file], temp.path().join("second-dst")))
        .unwrap();
    second.run().unwrap();
    assert_eq!(second.state(), TaskState::Queued);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(second.snapshot().total_bytes, None);

    first
        .resolve_overwrite(OverwriteDecision::SkipOnce)
        .unwrap();
    first.wait();
    second.request_resume();
    let snap = second.wait();
    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(snap.total_bytes, Some(5));
}

#[test]
fn test_smart_queue_starts_when_device_frees() {
    let temp = TempDir::new().unwrap();
    let registry = TaskRegistry::default();

    let first = blocked_copy(&registry, temp.path(), "first");
    let file = temp.path().join("second.txt");
    fs::write(&file, "2").unwrap();
    let second = registry
        .new_task(TaskSpec::copy(vec![file], temp.path().join("second-dst")))
        .unwrap();
    second.run().unwrap();
    assert_eq!(second.state(), TaskState::Queued);
    assert_eq!(registry.running(), vec![first.id()]);

    first
        .resolve_overwrite(OverwriteDecision::OverwriteOnce)
        .unwrap();
    assert_eq!(second.wait().outcome, Some(TaskOutcome::Completed));
    assert_eq!(first.wait().outcome, Some(TaskOutcome::Completed));
    assert!(registry.running().is_empty());
}

#[test]
fn test_queue_releases_slot() {
    let temp = TempDir::new().unwrap();
    let config = EngineConfig::builder().smart_queue(false).build().unwrap();
    let registry = TaskRegistry::new(config);

    let first = blocked_copy(&registry, temp.path(), "first");
    let file = temp.path().join("second.txt");
    fs::write(&file, "2").unwrap();
    let second = registry
        .new_task(TaskSpec::copy(vec![file], temp.path().join("second-dst")))
        .unwrap();
    second.run().unwrap();

    // Yield the slot, then start the waiting task by hand
    first.request_queue();
    second.request_resume();
    assert_eq!(second.wait().outcome, Some(TaskOutcome::Completed));

    first
        .resolve_overwrite(OverwriteDecision::SkipOnce)
        .unwrap();
    assert_eq!(first.state(), TaskState::Queued);
    first.request_resume();
    assert_eq!(first.wait().outcome, Some(TaskOutcome::Completed));
}

#[test]
fn test_delete_tree() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("gone");
    fs::create_dir_all(root.join("x/y")).unwrap();
    fs::write(root.join("x/y/z.txt"), "12345").unwrap();

    let registry = TaskRegistry::default();
    let task = registry.new_task(TaskSpec::delete(vec![root.clone()])).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(snap.items_done, 4);
    assert_eq!(snap.bytes_done, 5);
    assert!(!root.exists());
}

#[test]
fn test_delete_non_recursive_keeps_full_directory() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("full");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("f"), "x").unwrap();

    let registry = TaskRegistry::default();
    let spec = TaskSpec::delete(vec![root.clone()]).with_recursive(false);
    let task = registry.new_task(spec).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.error_count, 1);
    assert!(root.join("f").exists());
}

#[test]
fn test_trash_failure_never_deletes() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("precious.txt");
    fs::write(&file, "x").unwrap();

    let collaborators = Collaborators {
        trash: Arc::new(DirTrash { dir: None }),
        ..Default::default()
    };
    let registry = TaskRegistry::with_collaborators(EngineConfig::default(), collaborators);
    let task = registry.new_task(TaskSpec::trash(vec![file.clone()])).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.errors[0].kind, ErrorKind::TrashUnavailable);
    assert!(file.exists());
}

#[test]
fn test_trash_relocates() {
    let temp = TempDir::new().unwrap();
    let bin = temp.path().join("bin");
    fs::create_dir(&bin).unwrap();
    let file = temp.path().join("old.txt");
    fs::write(&file, "abc").unwrap();

    let collaborators = Collaborators {
        trash: Arc::new(DirTrash {
            dir: Some(bin.clone()),
        }),
        ..Default::default()
    };
    let registry = TaskRegistry::with_collaborators(EngineConfig::default(), collaborators);
    let task = registry.new_task(TaskSpec::trash(vec![file.clone()])).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(snap.bytes_done, 3);
    assert!(!file.exists());
    assert!(bin.join("old.txt").exists());
}

#[cfg(unix)]
#[test]
fn test_link_creates_symlinks() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("target.txt");
    fs::write(&target, "t").unwrap();
    let dst = temp.path().join("links");

    let registry = TaskRegistry::default();
    let task = registry
        .new_task(TaskSpec::link(vec![target.clone()], &dst))
        .unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(snap.percent, Some(100));
    assert_eq!(fs::read_link(dst.join("target.txt")).unwrap(), target);
}

#[cfg(unix)]
#[test]
fn test_chmod_recursive() {
    use filetask_core::{ModeEdit, PermissionChange};
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let root = temp.path().join("dir");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("f"), "x").unwrap();
    fs::set_permissions(root.join("f"), fs::Permissions::from_mode(0o600)).unwrap();

    let registry = TaskRegistry::default();
    let spec = TaskSpec::chmod(
        vec![root.clone()],
        PermissionChange::mode(ModeEdit::add(0o044)),
    );
    let task = registry.new_task(spec).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(snap.items_done, 2);
    let mode = fs::metadata(root.join("f")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o644);
}

#[cfg(unix)]
#[test]
fn test_exec_captures_output() {
    use filetask_core::ExecCommand;

    let registry = TaskRegistry::default();
    let command = ExecCommand::new("sh").arg("-c").arg("echo hello-from-exec");
    let task = registry.new_task(TaskSpec::exec(command)).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.outcome, Some(TaskOutcome::Completed));
    assert_eq!(snap.percent, Some(100));
    assert!(snap.log.iter().any(|l| l == "hello-from-exec"));
}

#[cfg(unix)]
#[test]
fn test_exec_failure_recorded() {
    use filetask_core::ExecCommand;

    let registry = TaskRegistry::default();
    let command = ExecCommand::new("sh").arg("-c").arg("exit 3");
    let task = registry.new_task(TaskSpec::exec(command)).unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert_eq!(snap.errors[0].kind, ErrorKind::ExecFailed);
    assert_eq!(snap.outcome, Some(TaskOutcome::CompletedWithErrors));
}

#[cfg(unix)]
#[test]
fn test_exec_abort_kills_child() {
    use filetask_core::ExecCommand;

    let registry = TaskRegistry::default();
    let task = registry
        .new_task(TaskSpec::exec(ExecCommand::new("sleep").arg("30")))
        .unwrap();
    task.run().unwrap();
    thread::sleep(Duration::from_millis(100));
    task.request_pause();
    thread::sleep(Duration::from_millis(100));
    task.request_abort();

    let started = Instant::now();
    let snap = task.wait();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(snap.outcome, Some(TaskOutcome::Aborted));
}

#[cfg(unix)]
#[test]
fn test_exec_abort_kills_whole_process_group() {
    use filetask_core::ExecCommand;

    let registry = TaskRegistry::default();
    let command = ExecCommand::new("sh").arg("-c").arg("sleep 30; true");
    let task = registry.new_task(TaskSpec::exec(command)).unwrap();
    task.run().unwrap();
    thread::sleep(Duration::from_millis(200));
    task.request_abort();

    let started = Instant::now();
    let snap = task.wait();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(snap.outcome, Some(TaskOutcome::Aborted));
}

#[test]
fn test_size_discovery_timeout_estimates_from_sources() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("f.txt");
    fs::write(&file, "hello").unwrap();

    let config = EngineConfig::builder()
        .size_discovery_timeout(Duration::ZERO)
        .build()
        .unwrap();
    let registry = TaskRegistry::new(config);
    let task = registry
        .new_task(TaskSpec::copy(vec![file], temp.path().join("dst")))
        .unwrap();
    task.run().unwrap();
    let snap = task.wait();

    assert!(snap.size_unknown());
    assert_eq!(snap.error_count, 0);
    assert_eq!(snap.percent, Some(100));
    assert!(snap.log.iter().any(|l| l.contains("timed out")));
}

#[test]
fn test_registry_lists_in_order() {
    let temp = TempDir::new().unwrap();
    let registry = TaskRegistry::default();
    let ids: Vec<_> = (0..3)
        .map(|i| {
            registry
                .new_task(TaskSpec::delete(vec![temp.path().join(format!("{i}"))]))
                .unwrap()
                .id()
        })
        .collect();

    let listed: Vec<_> = registry.snapshots().iter().map(|s| s.id).collect();
    assert_eq!(listed, ids);

    for id in ids {
        let snap = registry.remove(id).unwrap();
        assert_eq!(snap.outcome, Some(TaskOutcome::Aborted));
    }
    assert!(registry.tasks().is_empty());
    assert_eq!(
        registry.remove(TaskId::new(99)).unwrap_err(),
        ControlError::UnknownTask { id: 99 }
    );
}
