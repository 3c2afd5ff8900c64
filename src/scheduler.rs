//! The scheduler: owns the peer set and the task registry, and runs the
//! step loop that advances tasks from `pending` through to a terminal
//! status (spec §4.3).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{DispatchError, Result};
use crate::peer::Peer;
use crate::registry::Registry;
use crate::strategy;
use crate::task::{Task, TaskId};

/// How often the step loop scans the registry for newly-pending tasks.
/// A ticker this short favours low pick-up latency over CPU idling; an
/// event-driven wake (a condvar signalled from `register`) would satisfy
/// the same FIFO-admission contract (spec §9 design note).
const STEP_PERIOD: Duration = Duration::from_millis(1);

/// Holds a fixed peer set and the task registry; drives tasks from
/// submission through to a terminal status.
pub struct Scheduler {
    peers: Arc<Vec<Peer>>,
    registry: Arc<Registry>,
    stop_tx: mpsc::Sender<oneshot::Sender<()>>,
    stop_rx: parking_lot::Mutex<Option<mpsc::Receiver<oneshot::Sender<()>>>>,
}

impl Scheduler {
    /// Construct a scheduler over a fixed, non-empty peer set.
    pub fn new(peers: Vec<Peer>) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        Self {
            peers: Arc::new(peers),
            registry: Arc::new(Registry::new()),
            stop_tx,
            stop_rx: parking_lot::Mutex::new(Some(stop_rx)),
        }
    }

    /// The fixed peer set bound at construction.
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// Register a task for the scheduler to work on. Never fails.
    pub fn register(&self, task: Arc<Task>) {
        info!(task_id = %task.id(), mode = %task.mode(), "registering task");
        self.registry.register(task);
    }

    /// Look up a task by id.
    pub fn get(&self, id: TaskId) -> Option<Arc<Task>> {
        self.registry.get(id)
    }

    /// Cancel a task, even mid-flight. Sets the terminal status *before*
    /// invoking its cancel tokens, so a strategy waking from its aborted
    /// dispatch observes the terminal status on its very next check (spec
    /// §4.3 "cancel").
    pub fn cancel_by_id(&self, id: TaskId) -> Result<()> {
        let task = self.get(id).ok_or(DispatchError::TaskNotFound(id))?;
        self.cancel(&task);
        Ok(())
    }

    /// As [`cancel_by_id`](Self::cancel_by_id), given the task directly.
    /// A task that already reached a terminal status is left alone — only
    /// an active (`pending`/`requesting`) task actually transitions to
    /// `cancelled` (spec §5, §8 *terminal stickiness*).
    pub fn cancel(&self, task: &Task) {
        task.cancel_if_active();
        task.cancel();
    }

    /// Enter the step loop. Blocks until [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        let mut stop_rx = self
            .stop_rx
            .lock()
            .take()
            .expect("Scheduler::run called more than once");

        let mut ticker = tokio::time::interval(STEP_PERIOD);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.step(),
                Some(ack) = stop_rx.recv() => {
                    let _ = ack.send(());
                    return;
                }
            }
        }
    }

    /// One pass of the step loop (spec §4.3.1): claim every pending task
    /// under the registry lock, then spawn its strategy off the lock.
    fn step(&self) {
        let claimed = self.registry.claim_pending();
        if claimed.is_empty() {
            return;
        }

        debug!(count = claimed.len(), "claimed pending tasks");
        for task in claimed {
            let peers = self.peers.clone();
            tokio::spawn(async move {
                strategy::run(task, peers).await;
            });
        }
    }

    /// Send a synchronous stop signal and wait for the loop to acknowledge.
    /// Safe to call once.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop_tx.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}
