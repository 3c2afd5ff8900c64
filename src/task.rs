//! Task identity, execution mode, and the status state machine (spec §3, §4.2).

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::DispatchError;

/// Unique identifier for a task.
pub type TaskId = Uuid;

/// How a task's payload is fanned out over the peer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One peer at a time, rotated from `client_id`.
    Sequential,
    /// All peers concurrently; order is undefined.
    Parallel,
}

impl FromStr for Mode {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Mode::Sequential),
            "parallel" => Ok(Mode::Parallel),
            other => Err(DispatchError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Sequential => "sequential",
            Mode::Parallel => "parallel",
        })
    }
}

/// A task's position in the state machine of spec §4.2.
///
/// ```text
///              Register
///   (ctor) ──────────────▶ pending
///                            │   Scheduler.step picks it up
///                            ▼
///                        requesting ──────▶ completed
///                            │
///                            ├──────▶ errored
///                            │
///                            └──────▶ cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Pending = 0,
    Requesting = 1,
    Completed = 2,
    Cancelled = 3,
    Errored = 4,
}

impl Status {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Status::Pending,
            1 => Status::Requesting,
            2 => Status::Completed,
            3 => Status::Cancelled,
            4 => Status::Errored,
            _ => unreachable!("status encodes only the five defined variants"),
        }
    }

    /// True for the three terminal states: completed, cancelled, errored.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Cancelled | Status::Errored)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Pending => "pending",
            Status::Requesting => "requesting",
            Status::Completed => "completed",
            Status::Cancelled => "cancelled",
            Status::Errored => "errored",
        })
    }
}

/// A unit of fan-out work: immutable identity and parameters, plus a small
/// mutable status cell and the list of cancel tokens registered as outbound
/// requests are created.
///
/// The status is stored as an [`AtomicU8`] so readers never take a lock
/// (spec §9 design note); the cancel-token list has its own `Mutex`,
/// separate from whatever lock the owning registry holds, so a strategy
/// appending a token never contends with a registry scan (spec §4.2
/// rationale).
pub struct Task {
    id: TaskId,
    mode: Mode,
    client_index: usize,
    payload: String,
    fail_on_error: bool,
    status: AtomicU8,
    cancel_tokens: Mutex<Vec<CancellationToken>>,
}

impl Task {
    /// Construct a new task. Status starts at `pending` only once
    /// [`Scheduler::register`](crate::scheduler::Scheduler::register) has
    /// been called; before that it is meaningless to observe.
    pub fn new(mode: Mode, client_index: usize, payload: impl Into<String>, fail_on_error: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            client_index,
            payload: payload.into(),
            fail_on_error,
            status: AtomicU8::new(Status::Pending as u8),
            cancel_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn client_index(&self) -> usize {
        self.client_index
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn fail_on_error(&self) -> bool {
        self.fail_on_error
    }

    /// Tear-free read of the current status.
    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Overwrite the status unconditionally.
    pub fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    /// Transition `pending -> requesting`, but only if the status is still
    /// `pending`. The registry's claim already performs this transition
    /// under its lock for the common path; strategies call this too so
    /// that running a strategy directly (as in tests, or were a future
    /// caller to bypass the registry) still observes the same guarded
    /// forward-only transition rather than an unconditional overwrite that
    /// could stomp a status set concurrently. Returns whether the
    /// transition was applied.
    pub fn begin_if_pending(&self) -> bool {
        self.status
            .compare_exchange(
                Status::Pending as u8,
                Status::Requesting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Transition `requesting -> completed`, but only if the status is
    /// still `requesting` — this is the guard from spec §4.2 that prevents
    /// a strategy from overwriting a `cancelled` or `errored` transition
    /// that raced it. Returns whether the transition was applied.
    pub fn complete_if_requesting(&self) -> bool {
        self.status
            .compare_exchange(
                Status::Requesting as u8,
                Status::Completed as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Transition `requesting -> errored`, but only if the status is still
    /// `requesting` — the same non-overwrite guard as
    /// [`complete_if_requesting`](Self::complete_if_requesting), applied to
    /// the errored transition so a strategy observing a failure after the
    /// task was already cancelled does not stomp `cancelled` back to
    /// `errored`. Returns whether the transition was applied.
    pub fn error_if_requesting(&self) -> bool {
        self.status
            .compare_exchange(
                Status::Requesting as u8,
                Status::Errored as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Transition to `cancelled`, but only if the current status is not
    /// already terminal — preserves an already-`completed`/`errored`/
    /// `cancelled` task instead of overwriting it (spec §5, §8 *terminal
    /// stickiness*). Returns whether the transition was applied.
    pub fn cancel_if_active(&self) -> bool {
        loop {
            let current = self.status.load(Ordering::SeqCst);
            if Status::from_u8(current).is_terminal() {
                return false;
            }
            match self.status.compare_exchange(
                current,
                Status::Cancelled as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    /// `true` iff status is `cancelled` or `errored`. Strategies poll this
    /// between peer iterations to exit promptly.
    pub fn terminated(&self) -> bool {
        self.status().is_terminal()
    }

    /// Append a cancel token under the task-local mutex.
    pub fn add_cancel(&self, token: CancellationToken) {
        self.cancel_tokens.lock().push(token);
    }

    /// Invoke every registered cancel token once, under the task-local
    /// mutex so appends and invocation never interleave partially.
    pub fn cancel(&self) {
        let tokens = self.cancel_tokens.lock();
        for token in tokens.iter() {
            token.cancel();
        }
    }
}
