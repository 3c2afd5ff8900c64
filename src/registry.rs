//! The task registry: an insertion-ordered set of tasks, guarded by a
//! single scheduler-level lock (spec §3 "Registry").

use std::sync::Arc;

use parking_lot::Mutex;

use crate::task::{Status, Task, TaskId};

/// Insertion-ordered collection of tasks. No task is ever removed during
/// process lifetime. Guarded by one lock so the FIFO scan in
/// [`claim_pending`](Registry::claim_pending) and point lookups in
/// [`get`](Registry::get) never interleave.
#[derive(Default)]
pub struct Registry {
    tasks: Mutex<Vec<Arc<Task>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task to the registry and mark it `pending`.
    pub fn register(&self, task: Arc<Task>) {
        task.set_status(Status::Pending);
        self.tasks.lock().push(task);
    }

    /// Linear scan by id. `O(n)` is acceptable given the expected registry
    /// size and the absence of any persistence requirement (spec §4.3).
    pub fn get(&self, id: TaskId) -> Option<Arc<Task>> {
        self.tasks.lock().iter().find(|t| t.id() == id).cloned()
    }

    /// Scan in insertion order and transition every `pending` task to
    /// `requesting` within the same critical section, so no task is ever
    /// claimed twice (spec §4.3.1 step 1).
    pub fn claim_pending(&self) -> Vec<Arc<Task>> {
        let tasks = self.tasks.lock();
        tasks
            .iter()
            .filter(|t| t.status() == Status::Pending)
            .inspect(|t| t.set_status(Status::Requesting))
            .cloned()
            .collect()
    }
}
