//! Ingress HTTP API (spec §6): `GET /run`, `GET /status`, `GET /stop` under
//! a `/proxy` prefix that is stripped before dispatch.
//!
//! The dispatcher core does not prescribe how these are encoded (spec §1
//! scopes the encoders as an external collaborator); this module supplies
//! one, grounded on `pkg/proxy/{api,query}.go`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::scheduler::Scheduler;
use crate::task::{Mode, Task, TaskId};

const HEADER_CLIENT_ID: &str = "X-Proxy-ClientID";
const HEADER_INFO: &str = "X-Proxy-Info";
const HEADER_MODE: &str = "X-Proxy-Mode";
const HEADER_FAIL_ON_ERROR: &str = "X-Proxy-FailOnError";
const HEADER_TASK_ID: &str = "X-Proxy-TaskID";
const HEADER_DURATION: &str = "X-Proxy-Duration";

/// Build the `/proxy`-nested router over a shared [`Scheduler`].
pub fn router(scheduler: Arc<Scheduler>) -> Router {
    Router::new().nest(
        "/proxy",
        Router::new()
            .route("/run", get(run_query))
            .route("/status", get(status_query))
            .route("/stop", get(stop_query))
            .with_state(scheduler),
    )
}

/// A `400` with a plain-text explanation (spec §7.1: input validation never
/// enters the dispatcher).
struct BadRequest(String);

impl IntoResponse for BadRequest {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.0).into_response()
    }
}

fn header(headers: &mut HeaderMap, name: &'static str, value: impl AsRef<str>) {
    if let Ok(v) = HeaderValue::from_str(value.as_ref()) {
        headers.insert(name, v);
    }
}

async fn run_query(
    State(scheduler): State<Arc<Scheduler>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let begin = Instant::now();

    let client_id_raw = match params.get("client_id") {
        Some(v) => v,
        None => return BadRequest("missing required query parameter: client_id".into()).into_response(),
    };
    let client_id: usize = match client_id_raw.parse() {
        Ok(v) => v,
        Err(_) => return BadRequest(format!("invalid client_id: {client_id_raw:?}")).into_response(),
    };

    let info = match params.get("info") {
        Some(v) if !v.is_empty() => v.clone(),
        _ => return BadRequest("missing required query parameter: info".into()).into_response(),
    };

    let mode_raw = match params.get("mode") {
        Some(v) => v,
        None => return BadRequest("missing required query parameter: mode".into()).into_response(),
    };
    let mode: Mode = match mode_raw.parse() {
        Ok(m) => m,
        Err(_) => return BadRequest(format!("invalid mode: {mode_raw:?}")).into_response(),
    };

    let fail_on_error_raw = match params.get("failonerror") {
        Some(v) => v,
        None => return BadRequest("missing required query parameter: failonerror".into()).into_response(),
    };
    let fail_on_error: bool = match fail_on_error_raw.parse() {
        Ok(v) => v,
        Err(_) => {
            return BadRequest(format!("invalid failonerror: {fail_on_error_raw:?}")).into_response()
        }
    };

    if client_id >= scheduler.peers().len() {
        return BadRequest(format!(
            "client_id {client_id} out of range for {} peers",
            scheduler.peers().len()
        ))
        .into_response();
    }

    let task = Arc::new(Task::new(mode, client_id, info.clone(), fail_on_error));
    let id = task.id();
    scheduler.register(task);

    let mut headers = HeaderMap::new();
    header(&mut headers, HEADER_CLIENT_ID, client_id.to_string());
    header(&mut headers, HEADER_INFO, &info);
    header(&mut headers, HEADER_MODE, mode.to_string());
    header(&mut headers, HEADER_FAIL_ON_ERROR, fail_on_error.to_string());
    header(&mut headers, HEADER_DURATION, format!("{:?}", begin.elapsed()));

    (StatusCode::OK, headers, id.to_string()).into_response()
}

fn parse_task_id(params: &HashMap<String, String>) -> Result<TaskId, BadRequest> {
    let raw = params
        .get("task_id")
        .ok_or_else(|| BadRequest("missing required query parameter: task_id".into()))?;
    raw.parse()
        .map_err(|_| BadRequest(format!("invalid task_id: {raw:?}")))
}

async fn status_query(
    State(scheduler): State<Arc<Scheduler>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let begin = Instant::now();

    let task_id = match parse_task_id(&params) {
        Ok(id) => id,
        Err(bad) => return bad.into_response(),
    };

    let Some(task) = scheduler.get(task_id) else {
        return (StatusCode::NOT_FOUND, "unknown task").into_response();
    };

    let mut headers = HeaderMap::new();
    header(&mut headers, HEADER_TASK_ID, task_id.to_string());
    header(&mut headers, HEADER_DURATION, format!("{:?}", begin.elapsed()));

    (StatusCode::OK, headers, task.status().to_string()).into_response()
}

async fn stop_query(
    State(scheduler): State<Arc<Scheduler>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let begin = Instant::now();

    let task_id = match parse_task_id(&params) {
        Ok(id) => id,
        Err(bad) => return bad.into_response(),
    };

    let Some(task) = scheduler.get(task_id) else {
        return (StatusCode::NOT_FOUND, "unknown task").into_response();
    };
    scheduler.cancel(&task);

    let mut headers = HeaderMap::new();
    header(&mut headers, HEADER_TASK_ID, task_id.to_string());
    header(&mut headers, HEADER_DURATION, format!("{:?}", begin.elapsed()));

    (StatusCode::OK, headers, task.status().to_string()).into_response()
}
