//! Admission control for concurrently submitted tasks.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use filetask_core::TaskId;

/// View of a task presented to an [`AdmissionPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct Admission<'a> {
    /// The task.
    pub id: TaskId,
    /// Device ids the task reads or writes.
    pub resources: &'a [u64],
}

/// Decides whether a queued task may start alongside the running ones.
pub trait AdmissionPolicy: Send + Sync {
    /// Return true if `candidate` may run next to `running`.
    fn admit(&self, candidate: &Admission<'_>, running: &[Admission<'_>]) -> bool;
}

/// Admit a task only if no running task touches any of its devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisjointDevices;

impl AdmissionPolicy for DisjointDevices {
    fn admit(&self, candidate: &Admission<'_>, running: &[Admission<'_>]) -> bool {
        running.iter().all(|other| {
            !other
                .resources
                .iter()
                .any(|dev| candidate.resources.contains(dev))
        })
    }
}

/// Admit everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl AdmissionPolicy for Unlimited {
    fn admit(&self, _candidate: &Admission<'_>, _running: &[Admission<'_>]) -> bool {
        true
    }
}

/// A task as seen by the scheduler.
pub(crate) trait Schedulable: Send + Sync {
    fn task_id(&self) -> TaskId;
    fn resources(&self) -> &[u64];
    /// Move to running.
    fn admit(&self);
    /// Move to queued.
    fn hold(&self);
    /// Continue a paused task that kept its slot.
    fn resume_held(&self);
}

struct Waiting {
    task: Arc<dyn Schedulable>,
    /// Whether the task may be admitted without an explicit resume.
    eligible: bool,
}

#[derive(Default)]
struct Slots {
    running: Vec<Arc<dyn Schedulable>>,
    waiting: VecDeque<Waiting>,
}

/// Serializes admission decisions for one registry.
///
/// Admitted tasks keep their slot while paused; only queueing or finishing
/// gives it up. With smart queueing off, at most one task holds a slot and
/// waiting tasks start only on an explicit resume.
pub(crate) struct Scheduler {
    smart_queue: bool,
    policy: Arc<dyn AdmissionPolicy>,
    slots: Mutex<Slots>,
}

impl Scheduler {
    pub(crate) fn new(smart_queue: bool, policy: Arc<dyn AdmissionPolicy>) -> Self {
        Self {
            smart_queue,
            policy,
            slots: Mutex::new(Slots::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn can_admit(&self, slots: &Slots, task: &dyn Schedulable) -> bool {
        if !self.smart_queue {
            return slots.running.is_empty();
        }
        let running: Vec<Admission<'_>> = slots
            .running
            .iter()
            .map(|t| Admission {
                id: t.task_id(),
                resources: t.resources(),
            })
            .collect();
        let candidate = Admission {
            id: task.task_id(),
            resources: task.resources(),
        };
        self.policy.admit(&candidate, &running)
    }

    /// Admit a newly started task or queue it.
    pub(crate) fn submit(&self, task: Arc<dyn Schedulable>) {
        let mut slots = self.lock();
        if self.can_admit(&slots, task.as_ref()) {
            task.admit();
            slots.running.push(task);
        } else {
            tracing::debug!(target: "filetask", task = %task.task_id(), "task queued on submit");
            task.hold();
            slots.waiting.push_back(Waiting {
                task,
                eligible: self.smart_queue,
            });
        }
    }

    /// Explicitly queue a task, releasing its slot.
    pub(crate) fn queue(&self, id: TaskId) {
        let mut slots = self.lock();
        if let Some(pos) = slots.running.iter().position(|t| t.task_id() == id) {
            let task = slots.running.remove(pos);
            task.hold();
            slots.waiting.push_back(Waiting {
                task,
                eligible: false,
            });
        } else if let Some(entry) = slots.waiting.iter_mut().find(|w| w.task.task_id() == id) {
            entry.eligible = false;
        }
        self.pump(&mut slots);
    }

    /// Explicitly resume a task, queued or paused.
    pub(crate) fn resume(&self, id: TaskId) {
        let mut slots = self.lock();
        if let Some(task) = slots.running.iter().find(|t| t.task_id() == id) {
            task.resume_held();
            return;
        }
        if let Some(entry) = slots.waiting.iter_mut().find(|w| w.task.task_id() == id) {
            entry.eligible = true;
        }
        self.pump(&mut slots);
    }

    /// Forget a finished task and admit whatever can run now.
    pub(crate) fn finished(&self, id: TaskId) {
        let mut slots = self.lock();
        slots.running.retain(|t| t.task_id() != id);
        slots.waiting.retain(|w| w.task.task_id() != id);
        if self.smart_queue {
            for entry in slots.waiting.iter_mut() {
                entry.eligible = true;
            }
        }
        self.pump(&mut slots);
    }

    fn pump(&self, slots: &mut Slots) {
        let mut i = 0;
        while i < slots.waiting.len() {
            let admit = slots.waiting[i].eligible
                && self.can_admit(slots, slots.waiting[i].task.as_ref());
            if admit {
                if let Some(entry) = slots.waiting.remove(i) {
                    tracing::debug!(target: "filetask", task = %entry.task.task_id(), "task admitted");
                    entry.task.admit();
                    slots.running.push(entry.task);
                }
            } else {
                i += 1;
            }
        }
    }

    /// Ids holding a slot.
    pub(crate) fn running(&self) -> Vec<TaskId> {
        self.lock().running.iter().map(|t| t.task_id()).collect()
    }

    /// Ids waiting for a slot, in order.
    pub(crate) fn waiting(&self) -> Vec<TaskId> {
        self.lock().waiting.iter().map(|w| w.task.task_id()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};

    const IDLE: u8 = 0;
    const RUNNING: u8 = 1;
    const QUEUED: u8 = 2;

    struct FakeTask {
        id: TaskId,
        resources: Vec<u64>,
        state: AtomicU8,
    }

    impl FakeTask {
        fn new(id: u64, resources: &[u64]) -> Arc<Self> {
            Arc::new(Self {
                id: TaskId::new(id),
                resources: resources.to_vec(),
                state: AtomicU8::new(IDLE),
            })
        }

        fn state(&self) -> u8 {
            self.state.load(Ordering::SeqCst)
        }
    }

    impl Schedulable for FakeTask {
        fn task_id(&self) -> TaskId {
            self.id
        }
        fn resources(&self) -> &[u64] {
            &self.resources
        }
        fn admit(&self) {
            self.state.store(RUNNING, Ordering::SeqCst);
        }
        fn hold(&self) {
            self.state.store(QUEUED, Ordering::SeqCst);
        }
        fn resume_held(&self) {
            self.state.store(RUNNING, Ordering::SeqCst);
        }
    }

    fn smart() -> Scheduler {
        Scheduler::new(true, Arc::new(DisjointDevices))
    }

    #[test]
    fn test_disjoint_devices_run_together() {
        let sched = smart();
        let a = FakeTask::new(1, &[10]);
        let b = FakeTask::new(2, &[20]);
        sched.submit(a.clone());
        sched.submit(b.clone());
        assert_eq!(a.state(), RUNNING);
        assert_eq!(b.state(), RUNNING);
    }

    #[test]
    fn test_shared_device_waits_then_starts() {
        let sched = smart();
        let a = FakeTask::new(1, &[10]);
        let b = FakeTask::new(2, &[10, 20]);
        sched.submit(a.clone());
        sched.submit(b.clone());
        assert_eq!(b.state(), QUEUED);
        assert_eq!(sched.waiting(), vec![TaskId::new(2)]);

        sched.finished(TaskId::new(1));
        assert_eq!(b.state(), RUNNING);
        assert_eq!(sched.running(), vec![TaskId::new(2)]);
    }

    #[test]
    fn test_manual_queue_needs_resume() {
        let sched = Scheduler::new(false, Arc::new(DisjointDevices));
        let a = FakeTask::new(1, &[10]);
        let b = FakeTask::new(2, &[20]);
        sched.submit(a.clone());
        sched.submit(b.clone());
        assert_eq!(b.state(), QUEUED);

        sched.finished(TaskId::new(1));
        assert_eq!(b.state(), QUEUED);

        sched.resume(TaskId::new(2));
        assert_eq!(b.state(), RUNNING);
    }

    #[test]
    fn test_explicit_queue_releases_slot() {
        let sched = Scheduler::new(false, Arc::new(Unlimited));
        let a = FakeTask::new(1, &[10]);
        let b = FakeTask::new(2, &[10]);
        sched.submit(a.clone());
        sched.submit(b.clone());

        // Queue the running task, then start the waiting one by hand
        sched.queue(TaskId::new(1));
        assert_eq!(a.state(), QUEUED);
        sched.resume(TaskId::new(2));
        assert_eq!(b.state(), RUNNING);
        assert_eq!(sched.waiting(), vec![TaskId::new(1)]);
    }

    #[test]
    fn test_resume_paused_keeps_slot() {
        let sched = smart();
        let a = FakeTask::new(1, &[10]);
        sched.submit(a.clone());
        a.hold(); // paused in place
        sched.resume(TaskId::new(1));
        assert_eq!(a.state(), RUNNING);
        assert_eq!(sched.running(), vec![TaskId::new(1)]);
    }
}
