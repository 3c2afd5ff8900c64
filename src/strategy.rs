//! The two fan-out execution disciplines over a task's peer set (spec §4.4).

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::DispatchError;
use crate::peer::{Peer, PeerOutcome};
use crate::task::Task;

/// Run `task` to completion (or to an earlier terminal state) over `peers`,
/// dispatching via `task.mode()`. An unknown mode cannot reach here: modes
/// are parsed into the closed [`Mode`](crate::task::Mode) enum at ingress
/// (spec §4.3.2).
pub async fn run(task: Arc<Task>, peers: Arc<Vec<Peer>>) {
    match task.mode() {
        crate::task::Mode::Sequential => sequential(task, peers).await,
        crate::task::Mode::Parallel => parallel(task, peers).await,
    }
}

/// Outcome of [`dispatch_to_peer`], distinguishing a genuine peer response
/// from the two ways a dispatch never produces one: the task having been
/// cancelled out from under it, or the request never having been built at
/// all. Keeping `Cancelled` distinct from [`PeerOutcome::NonOk`] matters:
/// a cancelled dispatch must never be mistaken for a failure that
/// `fail_on_error` would act on (spec §5, §8 *terminal stickiness*).
enum DispatchResult {
    Outcome(PeerOutcome),
    Cancelled,
    BuildFailed,
}

/// Build a request for peer `(i + task.client_index()) mod peers.len()`,
/// register its cancel token, and dispatch it.
async fn dispatch_to_peer(task: &Task, peers: &[Peer], i: usize) -> DispatchResult {
    let index = (i + task.client_index()) % peers.len();
    let peer = &peers[index];

    let request = match peer.new_request(task.payload()) {
        Ok(r) => r,
        Err(e) => {
            error!(task_id = %task.id(), peer = peer.addr(), error = %e, "failed to build peer request");
            task.error_if_requesting();
            return DispatchResult::BuildFailed;
        }
    };

    task.add_cancel(request.cancel_token());

    // A cancellation observed between registering the token and here must
    // still short-circuit the dispatch (spec §4.4.2).
    if task.terminated() {
        request.cancel();
    }

    info!(task_id = %task.id(), url = %request.url(), "dispatching to peer");

    match request.dispatch().await {
        Ok(outcome) => {
            debug!(task_id = %task.id(), peer = peer.addr(), ?outcome, "peer responded");
            DispatchResult::Outcome(outcome)
        }
        Err(DispatchError::Cancelled) => {
            debug!(task_id = %task.id(), peer = peer.addr(), "dispatch cancelled");
            DispatchResult::Cancelled
        }
        Err(e) => {
            warn!(task_id = %task.id(), peer = peer.addr(), error = %e, "peer dispatch failed");
            DispatchResult::Outcome(PeerOutcome::NonOk)
        }
    }
}

/// Iterates peer indices `0..peers.len()` in order; exactly one outbound
/// request is in flight at a time (spec §4.4.1).
async fn sequential(task: Arc<Task>, peers: Arc<Vec<Peer>>) {
    task.begin_if_pending();

    for i in 0..peers.len() {
        if task.terminated() {
            return;
        }

        match dispatch_to_peer(&task, &peers, i).await {
            DispatchResult::Outcome(PeerOutcome::Ok) => {}
            DispatchResult::Outcome(PeerOutcome::NonOk) => {
                if task.fail_on_error() {
                    task.error_if_requesting();
                    return;
                }
            }
            DispatchResult::Cancelled | DispatchResult::BuildFailed => return,
        }
    }

    task.complete_if_requesting();
}

/// Spawns one concurrent worker per peer; a coordinator waits for all of
/// them (barrier) before resolving the task (spec §4.4.2).
async fn parallel(task: Arc<Task>, peers: Arc<Vec<Peer>>) {
    task.begin_if_pending();

    let mut workers = Vec::with_capacity(peers.len());
    for i in 0..peers.len() {
        let task = task.clone();
        let peers = peers.clone();
        workers.push(tokio::spawn(async move {
            if task.terminated() {
                return false;
            }
            match dispatch_to_peer(&task, &peers, i).await {
                DispatchResult::Outcome(PeerOutcome::Ok) => false,
                DispatchResult::Outcome(PeerOutcome::NonOk) => task.fail_on_error(),
                DispatchResult::Cancelled => false,
                DispatchResult::BuildFailed => true,
            }
        }));
    }

    let mut any_error = false;
    for worker in workers {
        // A panicked worker is treated the same as a reported failure: it
        // can never have completed its peer contact successfully.
        any_error |= worker.await.unwrap_or(true);
    }

    if any_error {
        task.error_if_requesting();
    } else {
        task.complete_if_requesting();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Mode, Status};
    use axum::{extract::Query, http::StatusCode, routing::get, Router};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn spawn_agent(status: StatusCode, hit_counter: Arc<AtomicUsize>) -> Peer {
        let counter = hit_counter.clone();
        let app = Router::new().route(
            "/update",
            get(move |Query(_params): Query<HashMap<String, String>>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    status
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Peer::new("http", addr.to_string(), Arc::new(reqwest::Client::new()))
    }

    #[tokio::test]
    async fn sequential_success_completes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let peers = Arc::new(vec![
            spawn_agent(StatusCode::OK, hits.clone()).await,
            spawn_agent(StatusCode::OK, hits.clone()).await,
        ]);
        let task = Arc::new(Task::new(Mode::Sequential, 0, "hello", true));
        run(task.clone(), peers).await;

        assert_eq!(task.status(), Status::Completed);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sequential_fail_on_error_stops_early() {
        let hits = Arc::new(AtomicUsize::new(0));
        let peers = Arc::new(vec![
            spawn_agent(StatusCode::INTERNAL_SERVER_ERROR, hits.clone()).await,
            spawn_agent(StatusCode::OK, hits.clone()).await,
        ]);
        let task = Arc::new(Task::new(Mode::Sequential, 0, "hello", true));
        run(task.clone(), peers).await;

        assert_eq!(task.status(), Status::Errored);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_tolerates_errors_when_not_fail_on_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let peers = Arc::new(vec![
            spawn_agent(StatusCode::INTERNAL_SERVER_ERROR, hits.clone()).await,
            spawn_agent(StatusCode::OK, hits.clone()).await,
        ]);
        let task = Arc::new(Task::new(Mode::Sequential, 0, "hello", false));
        run(task.clone(), peers).await;

        assert_eq!(task.status(), Status::Completed);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn parallel_success_completes_and_hits_every_peer() {
        let hits = Arc::new(AtomicUsize::new(0));
        let peers = Arc::new(vec![
            spawn_agent(StatusCode::OK, hits.clone()).await,
            spawn_agent(StatusCode::OK, hits.clone()).await,
            spawn_agent(StatusCode::OK, hits.clone()).await,
        ]);
        let task = Arc::new(Task::new(Mode::Parallel, 1, "x", false));
        run(task.clone(), peers).await;

        assert_eq!(task.status(), Status::Completed);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn parallel_fail_on_error_errors_task() {
        let hits = Arc::new(AtomicUsize::new(0));
        let peers = Arc::new(vec![
            spawn_agent(StatusCode::OK, hits.clone()).await,
            spawn_agent(StatusCode::INTERNAL_SERVER_ERROR, hits.clone()).await,
        ]);
        let task = Arc::new(Task::new(Mode::Parallel, 0, "x", true));
        run(task.clone(), peers).await;

        assert_eq!(task.status(), Status::Errored);
    }

    async fn spawn_delayed_agent(status: StatusCode, delay: Duration, hit_counter: Arc<AtomicUsize>) -> Peer {
        let counter = hit_counter.clone();
        let app = Router::new().route(
            "/update",
            get(move |Query(_params): Query<HashMap<String, String>>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    status
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Peer::new("http", addr.to_string(), Arc::new(reqwest::Client::new()))
    }

    #[tokio::test]
    async fn sequential_cancel_mid_flight_with_fail_on_error_does_not_flip_to_errored() {
        let hits = Arc::new(AtomicUsize::new(0));
        let peers = Arc::new(vec![
            spawn_delayed_agent(StatusCode::OK, Duration::from_millis(200), hits.clone()).await,
            spawn_agent(StatusCode::OK, hits.clone()).await,
        ]);
        let task = Arc::new(Task::new(Mode::Sequential, 0, "x", true));
        let run_handle = {
            let task = task.clone();
            let peers = peers.clone();
            tokio::spawn(async move { run(task, peers).await })
        };

        for _ in 0..500 {
            if hits.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        task.cancel_if_active();
        task.cancel();

        run_handle.await.unwrap();
        assert_eq!(task.status(), Status::Cancelled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parallel_cancel_mid_flight_with_fail_on_error_does_not_flip_to_errored() {
        let hits = Arc::new(AtomicUsize::new(0));
        let peers = Arc::new(vec![
            spawn_delayed_agent(StatusCode::OK, Duration::from_millis(200), hits.clone()).await,
            spawn_delayed_agent(StatusCode::OK, Duration::from_millis(200), hits.clone()).await,
        ]);
        let task = Arc::new(Task::new(Mode::Parallel, 0, "x", true));
        let run_handle = {
            let task = task.clone();
            let peers = peers.clone();
            tokio::spawn(async move { run(task, peers).await })
        };

        for _ in 0..500 {
            if hits.load(Ordering::SeqCst) >= peers.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        task.cancel_if_active();
        task.cancel();

        run_handle.await.unwrap();
        assert_eq!(task.status(), Status::Cancelled);
    }

    #[tokio::test]
    async fn sequential_client_index_rotates_starting_peer() {
        // peers[1] should be contacted first, then peers[0] wraps around.
        let order = Arc::new(Mutex::new(Vec::new()));

        async fn spawn_recording_agent(idx: usize, order: Arc<Mutex<Vec<usize>>>) -> Peer {
            let app = Router::new().route(
                "/update",
                get(move |Query(_params): Query<HashMap<String, String>>| {
                    let order = order.clone();
                    async move {
                        order.lock().push(idx);
                        StatusCode::OK
                    }
                }),
            );
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            Peer::new("http", addr.to_string(), Arc::new(reqwest::Client::new()))
        }

        let peers = Arc::new(vec![
            spawn_recording_agent(0, order.clone()).await,
            spawn_recording_agent(1, order.clone()).await,
        ]);
        let task = Arc::new(Task::new(Mode::Sequential, 1, "x", true));
        run(task.clone(), peers).await;

        assert_eq!(*order.lock(), vec![1, 0]);
    }
}
