//! A small command-dispatch proxy: accepts HTTP "run" requests naming a
//! fan-out target, dispatches the payload to a fixed set of downstream
//! agent peers sequentially or in parallel, and lets callers poll status or
//! cancel an in-flight task.
//!
//! The core — task lifecycle, fan-out strategies, registry, and scheduler
//! loop — lives in [`task`], [`strategy`], [`registry`], and [`scheduler`].
//! [`peer`] builds the cancellable outbound requests the strategies issue.
//! [`api`] and [`agent`] are the ingress and companion-agent HTTP surfaces
//! that make the crate runnable end to end.
//!
//! # Example
//! ```no_run
//! use cmdproxy::{Peer, Scheduler};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Arc::new(reqwest::Client::new());
//!     let peers = vec![Peer::new("http", "127.0.0.1:8080", client)];
//!     let scheduler = Arc::new(Scheduler::new(peers));
//!
//!     let app = cmdproxy::api::router(scheduler.clone());
//!     let run = {
//!         let scheduler = scheduler.clone();
//!         tokio::spawn(async move { scheduler.run().await })
//!     };
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
//!     tokio::select! {
//!         _ = axum::serve(listener, app) => {}
//!         _ = tokio::signal::ctrl_c() => {}
//!     }
//!     scheduler.stop().await;
//!     let _ = run.await;
//! }
//! ```

pub mod agent;
pub mod api;
pub mod error;
pub mod peer;
pub mod registry;
pub mod scheduler;
pub mod strategy;
pub mod task;

pub use error::{DispatchError, Result};
pub use peer::{Peer, PeerOutcome, PeerRequest};
pub use scheduler::Scheduler;
pub use task::{Mode, Status, Task, TaskId};
