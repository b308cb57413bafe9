//! Task registry: creation, lookup and lifetime of tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use filetask_core::{
    ControlError, EngineConfig, ProgressSnapshot, SpecError, TaskEvent, TaskId, TaskSpec,
    TaskState,
};

use crate::EVENT_CHANNEL_SIZE;
use crate::analyzer::{DeviceLookup, MetadataLookup, resource_keys};
use crate::control::{TaskHandle, TaskShared};
use crate::resolver::OverwritePrompt;
use crate::scheduler::{AdmissionPolicy, DisjointDevices, Scheduler};
use crate::trash::{SystemTrash, TrashStore};

/// Environment collaborators, replaceable for testing.
#[derive(Clone)]
pub struct Collaborators {
    /// Device identity lookup.
    pub lookup: Arc<dyn DeviceLookup>,
    /// Trash location.
    pub trash: Arc<dyn TrashStore>,
    /// Admission rule used when smart queueing is on.
    pub admission: Arc<dyn AdmissionPolicy>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            lookup: Arc::new(MetadataLookup),
            trash: Arc::new(SystemTrash),
            admission: Arc::new(DisjointDevices),
        }
    }
}

/// State shared by the registry, its handles and worker threads.
pub(crate) struct Runtime {
    pub(crate) config: EngineConfig,
    pub(crate) scheduler: Scheduler,
    pub(crate) lookup: Arc<dyn DeviceLookup>,
    pub(crate) trash: Arc<dyn TrashStore>,
    pub(crate) events: broadcast::Sender<TaskEvent>,
}

/// Owns every task of one application instance.
pub struct TaskRegistry {
    tasks: DashMap<TaskId, TaskHandle>,
    runtime: Arc<Runtime>,
    next_id: AtomicU64,
}

impl TaskRegistry {
    /// Create a registry with the default collaborators.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_collaborators(config, Collaborators::default())
    }

    /// Create a registry with custom collaborators.
    pub fn with_collaborators(config: EngineConfig, collaborators: Collaborators) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let scheduler = Scheduler::new(config.smart_queue, collaborators.admission);
        Self {
            tasks: DashMap::new(),
            runtime: Arc::new(Runtime {
                config,
                scheduler,
                lookup: collaborators.lookup,
                trash: collaborators.trash,
                events,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.runtime.config
    }

    /// Create a task in the pending state. Overwrite queries block until
    /// [`TaskHandle::resolve_overwrite`] is called.
    pub fn new_task(&self, spec: TaskSpec) -> Result<TaskHandle, SpecError> {
        self.create(spec, None)
    }

    /// Create a task whose overwrite queries are answered by `prompt` on the
    /// worker thread.
    pub fn new_task_with_prompt(
        &self,
        spec: TaskSpec,
        prompt: Arc<dyn OverwritePrompt>,
    ) -> Result<TaskHandle, SpecError> {
        self.create(spec, Some(prompt))
    }

    fn create(
        &self,
        spec: TaskSpec,
        prompt: Option<Arc<dyn OverwritePrompt>>,
    ) -> Result<TaskHandle, SpecError> {
        spec.validate()?;

        let config = &self.runtime.config;
        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let overwrite = spec.overwrite.unwrap_or(config.default_overwrite);
        let error_policy = spec.error_policy.unwrap_or(config.default_error_policy);
        let resources = resource_keys(self.runtime.lookup.as_ref(), &spec);
        debug!(target: "filetask", task = %id, kind = %spec.kind, ?resources, "task created");

        let shared = TaskShared::new(
            id,
            spec,
            overwrite,
            error_policy,
            resources,
            config.speed_window,
            prompt,
            self.runtime.events.clone(),
        );
        let handle = TaskHandle {
            shared: Arc::new(shared),
            runtime: Arc::clone(&self.runtime),
        };
        self.tasks.insert(id, handle.clone());
        Ok(handle)
    }

    /// Look up a task.
    pub fn get(&self, id: TaskId) -> Option<TaskHandle> {
        self.tasks.get(&id).map(|entry| entry.value().clone())
    }

    /// All tasks, ordered by id.
    pub fn tasks(&self) -> Vec<TaskHandle> {
        let mut tasks: Vec<TaskHandle> = self.tasks.iter().map(|e| e.value().clone()).collect();
        tasks.sort_by_key(TaskHandle::id);
        tasks
    }

    /// Snapshots of all tasks, ordered by id.
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.tasks().iter().map(TaskHandle::snapshot).collect()
    }

    /// Ids currently holding a scheduler slot.
    pub fn running(&self) -> Vec<TaskId> {
        self.runtime.scheduler.running()
    }

    /// Ids waiting for a scheduler slot, in queue order.
    pub fn queued(&self) -> Vec<TaskId> {
        self.runtime.scheduler.waiting()
    }

    /// Forget a task. Only finished or never-started tasks can be removed.
    pub fn remove(&self, id: TaskId) -> Result<ProgressSnapshot, ControlError> {
        let handle = self
            .get(id)
            .ok_or(ControlError::UnknownTask { id: id.0 })?;
        match handle.state() {
            TaskState::Pending => handle.request_abort(),
            TaskState::Finished => {}
            _ => return Err(ControlError::StillRunning),
        }
        let snapshot = handle.wait();
        self.tasks.remove(&id);
        Ok(snapshot)
    }

    /// Subscribe to state-change, query, error and completion events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.runtime.events.subscribe()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
