//! Per-task control block and the caller-facing handle.
//!
//! All mutable task state lives behind one mutex paired with a condition
//! variable. The worker parks on the condvar at checkpoints while the task is
//! paused or queued, and while an overwrite decision is outstanding. Control
//! requests flip state under the lock and notify.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use filetask_core::{
    Conflict, ControlError, ErrorPolicy, ErrorRecord, OverwriteDecision, OverwritePolicy,
    ProgressSnapshot, TaskError, TaskEvent, TaskId, TaskOutcome, TaskSpec, TaskState,
};

use crate::accumulator::ProgressAccumulator;
use crate::executor::{self, Halt};
use crate::registry::Runtime;
use crate::resolver::OverwritePrompt;
use crate::scheduler::Schedulable;

/// Most recent errors kept for snapshots.
pub const ERROR_HISTORY: usize = 256;

/// Most recent log lines kept for snapshots.
pub const LOG_HISTORY: usize = 512;

/// What a long-running external process should do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Run,
    Hold,
    Abort,
}

struct TaskInner {
    state: TaskState,
    started: bool,
    abort: bool,
    /// Pause or queue requested while an overwrite decision is outstanding.
    deferred_hold: Option<TaskState>,
    decision: Option<OverwriteDecision>,
    conflict: Option<Conflict>,
    outcome: Option<TaskOutcome>,
    progress: ProgressAccumulator,
    current_source: Option<PathBuf>,
    current_destination: Option<PathBuf>,
    error_count: usize,
    first_error: Option<ErrorRecord>,
    errors: VecDeque<ErrorRecord>,
    log: VecDeque<String>,
}

impl TaskInner {
    fn push_log(&mut self, line: String) {
        if self.log.len() == LOG_HISTORY {
            self.log.pop_front();
        }
        self.log.push_back(line);
    }
}

/// Running time is counted only in these states.
fn counts_time(state: TaskState) -> bool {
    matches!(
        state,
        TaskState::Running | TaskState::SizeDiscovery | TaskState::Error
    )
}

/// State shared between the handle(s), the scheduler and the worker thread.
pub(crate) struct TaskShared {
    pub(crate) id: TaskId,
    pub(crate) spec: TaskSpec,
    pub(crate) overwrite: OverwritePolicy,
    pub(crate) error_policy: ErrorPolicy,
    pub(crate) resources: Vec<u64>,
    prompt: Option<Arc<dyn OverwritePrompt>>,
    events: broadcast::Sender<TaskEvent>,
    inner: Mutex<TaskInner>,
    cond: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskShared {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: TaskId,
        spec: TaskSpec,
        overwrite: OverwritePolicy,
        error_policy: ErrorPolicy,
        resources: Vec<u64>,
        speed_window: Duration,
        prompt: Option<Arc<dyn OverwritePrompt>>,
        events: broadcast::Sender<TaskEvent>,
    ) -> Self {
        Self {
            id,
            spec,
            overwrite,
            error_policy,
            resources,
            prompt,
            events,
            inner: Mutex::new(TaskInner {
                state: TaskState::Pending,
                started: false,
                abort: false,
                deferred_hold: None,
                decision: None,
                conflict: None,
                outcome: None,
                progress: ProgressAccumulator::new(speed_window),
                current_source: None,
                current_destination: None,
                error_count: 0,
                first_error: None,
                errors: VecDeque::new(),
                log: VecDeque::new(),
            }),
            cond: Condvar::new(),
            worker: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, TaskInner>) -> MutexGuard<'a, TaskInner> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, inner: &mut TaskInner, to: TaskState) {
        let from = inner.state;
        if from == to || from == TaskState::Finished {
            return;
        }
        let now = Instant::now();
        if counts_time(to) {
            inner.progress.resume(now);
        } else {
            inner.progress.suspend(now);
        }
        inner.state = to;
        debug!(target: "filetask", task = %self.id, %from, %to, "state changed");
        self.emit(TaskEvent::StateChanged {
            id: self.id,
            from,
            to,
        });
        self.cond.notify_all();
    }

    // ---- caller side -------------------------------------------------------

    fn start(&self) -> Result<(), ControlError> {
        let mut inner = self.lock();
        if inner.started || inner.state != TaskState::Pending {
            return Err(ControlError::AlreadyRunning);
        }
        inner.started = true;
        Ok(())
    }

    fn pause(&self) {
        let mut inner = self.lock();
        match inner.state {
            TaskState::Running | TaskState::SizeDiscovery | TaskState::Error => {
                self.transition(&mut inner, TaskState::Paused);
                inner.push_log("paused".to_string());
            }
            TaskState::QueryOverwrite => inner.deferred_hold = Some(TaskState::Paused),
            _ => {}
        }
    }

    /// Abort. Returns true if the task finished immediately (never started).
    fn abort(&self) -> bool {
        let mut inner = self.lock();
        if inner.state.is_finished() {
            return false;
        }
        inner.abort = true;
        self.cond.notify_all();
        if inner.state == TaskState::Pending {
            self.finish_locked(&mut inner, TaskOutcome::Aborted);
            return true;
        }
        false
    }

    fn resolve(&self, decision: OverwriteDecision) -> Result<(), ControlError> {
        let mut inner = self.lock();
        if inner.state != TaskState::QueryOverwrite
            || self.prompt.is_some()
            || inner.decision.is_some()
        {
            return Err(ControlError::NotWaiting);
        }
        inner.decision = Some(decision);
        self.leave_query(&mut inner);
        self.cond.notify_all();
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.lock();
        let now = Instant::now();
        let progress = &inner.progress;
        let current_speed = progress.current_speed();
        let average_speed = progress.average_speed(now);
        ProgressSnapshot {
            id: self.id,
            kind: self.spec.kind,
            state: inner.state,
            outcome: inner.outcome,
            total_bytes: progress.total_bytes(),
            bytes_done: progress.bytes_done(),
            total_items: progress.total_items(),
            items_done: progress.items_done(),
            percent: progress.percent(),
            current_speed,
            average_speed,
            elapsed: progress.elapsed(now),
            remaining_current: progress.remaining(current_speed),
            remaining_average: progress.remaining(average_speed),
            current_source: inner.current_source.clone(),
            current_destination: inner.current_destination.clone(),
            error_count: inner.error_count,
            first_error: inner.first_error.clone(),
            errors: inner.errors.iter().cloned().collect(),
            pending_conflict: inner.conflict.clone(),
            log: inner.log.iter().cloned().collect(),
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        self.lock().state
    }

    fn wait_finished(&self) {
        let mut inner = self.lock();
        while !inner.state.is_finished() {
            inner = self.wait(inner);
        }
    }

    fn join_worker(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(target: "filetask", task = %self.id, "worker thread panicked");
            }
        }
    }

    // ---- worker side -------------------------------------------------------

    /// Park while held, fail fast on abort, clear a transient error state.
    pub(crate) fn checkpoint(&self) -> Result<(), Halt> {
        let mut inner = self.lock();
        loop {
            if inner.abort {
                return Err(Halt::Aborted);
            }
            match inner.state {
                TaskState::Paused | TaskState::Queued => inner = self.wait(inner),
                TaskState::Error => {
                    self.transition(&mut inner, TaskState::Running);
                    return Ok(());
                }
                _ => return Ok(()),
            }
        }
    }

    /// Wait up to `timeout` and report what an external process should do.
    pub(crate) fn signal(&self, timeout: Duration) -> Signal {
        let inner = self.lock();
        let (inner, _) = self
            .cond
            .wait_timeout(inner, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        if inner.abort {
            Signal::Abort
        } else if inner.state.is_held() {
            Signal::Hold
        } else {
            Signal::Run
        }
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.lock().abort
    }

    pub(crate) fn begin_discovery(&self) {
        let mut inner = self.lock();
        if inner.state == TaskState::Running {
            self.transition(&mut inner, TaskState::SizeDiscovery);
        }
    }

    pub(crate) fn end_discovery(&self) {
        let mut inner = self.lock();
        if inner.state == TaskState::SizeDiscovery {
            self.transition(&mut inner, TaskState::Running);
        }
    }

    pub(crate) fn set_totals(&self, bytes: Option<u64>, items: Option<u64>) {
        self.lock().progress.set_totals(bytes, items);
    }

    pub(crate) fn set_roots(&self, roots: u64) {
        self.lock().progress.set_roots(roots);
    }

    pub(crate) fn set_manual_percent(&self, percent: Option<u8>) {
        self.lock().progress.set_manual_percent(percent);
    }

    pub(crate) fn set_current(&self, source: &Path, destination: Option<&Path>) {
        let mut inner = self.lock();
        inner.current_source = Some(source.to_path_buf());
        inner.current_destination = destination.map(Path::to_path_buf);
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        self.lock().progress.add_bytes(bytes, Instant::now());
    }

    pub(crate) fn add_items(&self, items: u64) {
        self.lock().progress.add_items(items, Instant::now());
    }

    pub(crate) fn complete_root(&self) {
        self.lock().progress.complete_root();
    }

    pub(crate) fn error_count(&self) -> usize {
        self.lock().error_count
    }

    pub(crate) fn log(&self, line: impl Into<String>) {
        self.lock().push_log(line.into());
    }

    pub(crate) fn record_error(&self, error: &TaskError, fallback: &Path) {
        let record = ErrorRecord::from_error(error, fallback);
        warn!(target: "filetask", task = %self.id, path = %record.path.display(), "{}", record.message);

        let mut inner = self.lock();
        inner.error_count += 1;
        if inner.first_error.is_none() {
            inner.first_error = Some(record.clone());
        }
        if inner.errors.len() == ERROR_HISTORY {
            inner.errors.pop_front();
        }
        inner.errors.push_back(record.clone());
        inner.push_log(format!("error: {record}"));
        if inner.state == TaskState::Running {
            self.transition(&mut inner, TaskState::Error);
        }
        self.emit(TaskEvent::ErrorRecorded {
            id: self.id,
            record,
        });
    }

    /// Obtain a decision for `conflict`, from the prompt collaborator or by
    /// blocking until `resolve_overwrite` is called.
    pub(crate) fn ask_overwrite(&self, conflict: &Conflict) -> Result<OverwriteDecision, TaskError> {
        {
            let mut inner = self.lock();
            if inner.abort {
                return Err(TaskError::Interrupted);
            }
            inner.decision = None;
            inner.conflict = Some(conflict.clone());
            inner.push_log(format!(
                "{}: {}",
                conflict.destination.display(),
                conflict.kind
            ));
            self.transition(&mut inner, TaskState::QueryOverwrite);
            self.emit(TaskEvent::OverwriteQuery {
                id: self.id,
                conflict: conflict.clone(),
            });
        }

        if let Some(prompt) = &self.prompt {
            let decision = prompt.decide(conflict);
            self.leave_query(&mut self.lock());
            return Ok(decision);
        }

        let mut inner = self.lock();
        loop {
            if inner.abort {
                inner.conflict = None;
                return Err(TaskError::Interrupted);
            }
            if let Some(decision) = inner.decision.take() {
                return Ok(decision);
            }
            inner = self.wait(inner);
        }
    }

    /// Apply a pause or queue request that arrived during the query.
    fn leave_query(&self, inner: &mut TaskInner) {
        inner.conflict = None;
        let to = inner.deferred_hold.take().unwrap_or(TaskState::Running);
        self.transition(inner, to);
        match to {
            TaskState::Paused => inner.push_log("paused".to_string()),
            TaskState::Queued => inner.push_log("queued".to_string()),
            _ => {}
        }
    }

    fn finish_locked(&self, inner: &mut TaskInner, outcome: TaskOutcome) {
        inner.outcome = Some(outcome);
        inner.conflict = None;
        inner.push_log(format!("finished: {outcome}"));
        self.transition(inner, TaskState::Finished);
        self.emit(TaskEvent::Finished {
            id: self.id,
            outcome,
        });
    }

    pub(crate) fn finish(&self, outcome: TaskOutcome) {
        let mut inner = self.lock();
        if inner.state.is_finished() {
            return;
        }
        self.finish_locked(&mut inner, outcome);
        info!(
            target: "filetask",
            task = %self.id,
            kind = %self.spec.kind,
            %outcome,
            errors = inner.error_count,
            "task finished"
        );
    }
}

impl Schedulable for TaskShared {
    fn task_id(&self) -> TaskId {
        self.id
    }

    fn resources(&self) -> &[u64] {
        &self.resources
    }

    fn admit(&self) {
        let mut inner = self.lock();
        match inner.state {
            TaskState::Pending | TaskState::Queued => {
                self.transition(&mut inner, TaskState::Running);
            }
            TaskState::QueryOverwrite if inner.deferred_hold == Some(TaskState::Queued) => {
                inner.deferred_hold = None;
            }
            _ => {}
        }
    }

    fn hold(&self) {
        let mut inner = self.lock();
        match inner.state {
            TaskState::Finished | TaskState::Queued => {}
            TaskState::QueryOverwrite => inner.deferred_hold = Some(TaskState::Queued),
            _ => {
                self.transition(&mut inner, TaskState::Queued);
                inner.push_log("queued".to_string());
            }
        }
    }

    fn resume_held(&self) {
        let mut inner = self.lock();
        match inner.state {
            TaskState::Paused => {
                self.transition(&mut inner, TaskState::Running);
                inner.push_log("resumed".to_string());
            }
            TaskState::QueryOverwrite => inner.deferred_hold = None,
            _ => {}
        }
    }
}

/// Caller-facing handle to one task.
///
/// Handles are cheap to clone; all clones control the same task.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) shared: Arc<TaskShared>,
    pub(crate) runtime: Arc<Runtime>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.spec.kind)
            .finish()
    }
}

impl TaskHandle {
    /// The task id.
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// The task description.
    pub fn spec(&self) -> &TaskSpec {
        &self.shared.spec
    }

    /// Start the task. It runs immediately or waits in the queue, depending
    /// on the scheduler.
    pub fn run(&self) -> Result<(), ControlError> {
        self.shared.start()?;
        info!(
            target: "filetask",
            task = %self.shared.id,
            kind = %self.shared.spec.kind,
            sources = self.shared.spec.sources.len(),
            "task started"
        );

        self.runtime
            .scheduler
            .submit(Arc::clone(&self.shared) as Arc<dyn Schedulable>);

        let shared = Arc::clone(&self.shared);
        let runtime = Arc::clone(&self.runtime);
        let spawned = thread::Builder::new()
            .name(format!("filetask-{}", self.shared.id.0))
            .spawn(move || executor::run_worker(shared, runtime));

        match spawned {
            Ok(handle) => {
                *self
                    .shared
                    .worker
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(e) => {
                let error = TaskError::Other {
                    path: PathBuf::new(),
                    source: e,
                };
                self.shared.record_error(&error, Path::new(""));
                self.shared.finish(TaskOutcome::Failed);
                self.runtime.scheduler.finished(self.shared.id);
            }
        }
        Ok(())
    }

    /// Pause at the next checkpoint. The task keeps its scheduler slot.
    pub fn request_pause(&self) {
        self.shared.pause();
    }

    /// Resume a paused task, or let a queued task be admitted.
    pub fn request_resume(&self) {
        self.runtime.scheduler.resume(self.shared.id);
    }

    /// Move the task to the queue, releasing its scheduler slot.
    pub fn request_queue(&self) {
        if self.shared.state() != TaskState::Pending {
            self.runtime.scheduler.queue(self.shared.id);
        }
    }

    /// Abort at the next checkpoint. A task that never ran finishes at once.
    pub fn request_abort(&self) {
        self.shared.abort();
    }

    /// Answer an outstanding overwrite query.
    pub fn resolve_overwrite(&self, decision: OverwriteDecision) -> Result<(), ControlError> {
        self.shared.resolve(decision)
    }

    /// Consistent copy of the task's progress.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared.snapshot()
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Block until the task is finished and return the final snapshot.
    ///
    /// A task that was never run returns its pending snapshot at once.
    pub fn wait(&self) -> ProgressSnapshot {
        if self.shared.state() == TaskState::Pending {
            return self.shared.snapshot();
        }
        self.shared.wait_finished();
        self.shared.join_worker();
        self.shared.snapshot()
    }

    /// Subscribe to this registry's events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.runtime.events.subscribe()
    }
}
