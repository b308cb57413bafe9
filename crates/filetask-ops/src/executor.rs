//! Worker entry point and the context shared by all operation kinds.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use filetask_core::{EngineConfig, ErrorPolicy, TaskError, TaskKind, TaskOutcome, TaskSpec};

use crate::analyzer::PathAnalyzer;
use crate::control::TaskShared;
use crate::registry::Runtime;
use crate::resolver::{OverwriteResolver, Resolution};
use crate::size::{Discovery, discover, tree_totals};
use crate::trash::TrashStore;
use crate::{chmod, copy, delete, exec, link, move_op, trash};

/// Why the worker stopped walking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Halt {
    /// Abort was requested.
    Aborted,
    /// The error policy ended the task.
    Stopped,
    /// The current source root cannot be processed further.
    SkipRoot,
}

pub(crate) type Step<T = ()> = Result<T, Halt>;

/// Whether a subtree was handled in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visit {
    Done,
    /// Something below was skipped or failed.
    Incomplete,
}

pub(crate) struct Context {
    pub(crate) task: Arc<TaskShared>,
    pub(crate) config: EngineConfig,
    pub(crate) resolver: OverwriteResolver,
    pub(crate) analyzer: PathAnalyzer,
    pub(crate) trash: Arc<dyn TrashStore>,
    pub(crate) buffer: Vec<u8>,
}

impl Context {
    pub(crate) fn new(task: Arc<TaskShared>, runtime: &Runtime) -> Self {
        Self {
            resolver: OverwriteResolver::new(task.overwrite),
            analyzer: PathAnalyzer::new(Arc::clone(&runtime.lookup)),
            trash: Arc::clone(&runtime.trash),
            config: runtime.config.clone(),
            buffer: Vec::new(),
            task,
        }
    }

    pub(crate) fn spec(&self) -> &TaskSpec {
        &self.task.spec
    }

    pub(crate) fn checkpoint(&self) -> Step {
        self.task.checkpoint()
    }

    /// Publish the unit about to be processed, then pass a checkpoint.
    pub(crate) fn begin_unit(&self, source: &Path, destination: Option<&Path>) -> Step {
        self.task.set_current(source, destination);
        self.checkpoint()
    }

    /// Record a failed unit and apply the error policy.
    pub(crate) fn record(&self, error: TaskError, fallback: &Path) -> Step {
        if matches!(error, TaskError::Interrupted) {
            return Err(Halt::Aborted);
        }
        self.task.record_error(&error, fallback);
        if self.task.error_policy == ErrorPolicy::FirstErrorStops {
            Err(Halt::Stopped)
        } else if error.is_root_fatal() {
            Err(Halt::SkipRoot)
        } else {
            Ok(())
        }
    }

    /// Record a failed unit inside a walk.
    pub(crate) fn fail(&self, error: TaskError, fallback: &Path) -> Step<Visit> {
        self.record(error, fallback).map(|()| Visit::Incomplete)
    }

    /// Resolve the destination of one unit. None means the collision could
    /// not be resolved and the error has been recorded.
    pub(crate) fn resolve(
        &mut self,
        source: &Path,
        source_meta: &Metadata,
        destination: &Path,
    ) -> Step<Option<Resolution>> {
        let task = Arc::clone(&self.task);
        match self
            .resolver
            .resolve(source, source_meta, destination, |c| task.ask_overwrite(c))
        {
            Ok(Resolution::Abort) => {
                self.task.log("aborted from overwrite query");
                Err(Halt::Aborted)
            }
            Ok(resolution) => Ok(Some(resolution)),
            Err(e) => self.record(e, source).map(|()| None),
        }
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        if bytes > 0 {
            self.task.add_bytes(bytes);
        }
    }

    pub(crate) fn add_items(&self, items: u64) {
        self.task.add_items(items);
    }

    pub(crate) fn complete_root(&self) {
        self.task.complete_root();
    }

    /// Count a subtree left untouched as processed.
    pub(crate) fn skip_tree(&self, path: &Path) {
        let totals = tree_totals(path, self.config.follow_symlinks);
        self.add_bytes(totals.bytes);
        self.add_items(totals.items);
    }
}

/// Body of a task's worker thread.
pub(crate) fn run_worker(task: Arc<TaskShared>, runtime: Arc<Runtime>) {
    let mut ctx = Context::new(Arc::clone(&task), &runtime);
    // Queued tasks touch nothing until admitted.
    let result = ctx
        .checkpoint()
        .and_then(|()| {
            discover_totals(&task, &runtime.config);
            ctx.checkpoint()
        })
        .and_then(|()| dispatch(&mut ctx));

    let outcome = match result {
        Err(Halt::Aborted) => TaskOutcome::Aborted,
        Err(Halt::Stopped) => TaskOutcome::Failed,
        Err(Halt::SkipRoot) | Ok(()) => completion_outcome(task.error_count(), task.error_policy),
    };

    task.finish(outcome);
    runtime.scheduler.finished(task.id);
}

fn dispatch(ctx: &mut Context) -> Step {
    let task = Arc::clone(&ctx.task);
    let spec = &task.spec;
    let destination = spec.destination.clone().unwrap_or_default();
    match spec.kind {
        TaskKind::Copy => copy::run(ctx, &spec.sources, &destination),
        TaskKind::Move => move_op::run(ctx, &spec.sources, &destination),
        TaskKind::Link => link::run(ctx, &spec.sources, &destination),
        TaskKind::Delete => delete::run(ctx, &spec.sources),
        TaskKind::Trash => trash::run(ctx, &spec.sources),
        TaskKind::Chmod => chmod::run(ctx, &spec.sources),
        TaskKind::Exec => exec::run(ctx),
    }
}

/// Outcome of a task that walked every unit.
pub(crate) fn completion_outcome(errors: usize, policy: ErrorPolicy) -> TaskOutcome {
    match (errors, policy) {
        (0, _) => TaskOutcome::Completed,
        (_, ErrorPolicy::ContinueOnError) => TaskOutcome::CompletedWithErrors,
        _ => TaskOutcome::Failed,
    }
}

/// Whether a kind walks below its source roots during discovery.
fn discovery_recursive(spec: &TaskSpec) -> bool {
    match spec.kind {
        TaskKind::Link => false,
        TaskKind::Move | TaskKind::Trash => true,
        _ => spec.recursive,
    }
}

fn discover_totals(task: &TaskShared, config: &EngineConfig) {
    let spec = &task.spec;
    if spec.kind == TaskKind::Exec {
        task.set_totals(None, Some(1));
        return;
    }
    task.set_roots(spec.sources.len() as u64);

    task.begin_discovery();
    let started = Instant::now();
    let deadline = started + config.size_discovery_timeout;
    let result = discover(
        &spec.sources,
        discovery_recursive(spec),
        config.follow_symlinks,
        deadline,
        &|| task.should_stop(),
    );

    match result {
        Discovery::Complete(totals) => {
            let bytes = if matches!(spec.kind, TaskKind::Link | TaskKind::Chmod) {
                0
            } else {
                totals.bytes
            };
            task.set_totals(Some(bytes), Some(totals.items));
        }
        Discovery::TimedOut => {
            warn!(
                target: "filetask",
                task = %task.id,
                timeout = ?config.size_discovery_timeout,
                "size discovery timed out"
            );
            task.log(format!(
                "{}; progress is estimated from {} source(s)",
                TaskError::SizeDiscoveryTimeout,
                spec.sources.len()
            ));
        }
        Discovery::Interrupted => {}
    }
    task.end_discovery();
}

/// Children of a directory, sorted by name.
pub(crate) fn sorted_children(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut children = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    children.sort();
    Ok(children)
}
