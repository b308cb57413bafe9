//! Background file-operation engine for filetask.
//!
//! Tasks (copy, move, link, delete, trash, chmod/chown and exec) run on their
//! own worker threads. Callers drive them through a [`TaskHandle`]: start,
//! pause, queue, resume, abort, answer overwrite queries and poll progress
//! snapshots. A [`TaskRegistry`] owns the tasks, decides which of them may
//! run concurrently and broadcasts [`TaskEvent`](filetask_core::TaskEvent)s.

mod accumulator;
mod analyzer;
mod chmod;
mod control;
mod copy;
mod delete;
mod exec;
mod executor;
mod link;
mod move_op;
mod registry;
mod resolver;
mod scheduler;
mod size;
mod trash;

pub use accumulator::ProgressAccumulator;
pub use analyzer::{DeviceLookup, MetadataLookup, PathAnalyzer, resource_keys};
pub use control::{ERROR_HISTORY, LOG_HISTORY, TaskHandle};
pub use registry::{Collaborators, TaskRegistry};
pub use resolver::{OverwritePrompt, OverwriteResolver, Resolution, auto_rename_path};
pub use scheduler::{Admission, AdmissionPolicy, DisjointDevices, Unlimited};
pub use size::{Discovery, Totals, discover, tree_totals};
pub use trash::{SystemTrash, TrashStore};

/// Capacity of the registry's event channel.
pub const EVENT_CHANNEL_SIZE: usize = 256;
