//! The companion agent process: an HTTP endpoint that answers `GET
//! /update?info=<payload>` after an artificial delay (spec §1, §6 egress
//! contract). Grounded on `pkg/agent/{api,broker}.go`; used primarily to
//! exercise the dispatcher, both in the `agents` CLI subcommand and in this
//! crate's own integration tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::{
    extract::Query,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::debug;

const HEADER_INFO: &str = "X-Proxy-Info";
const HEADER_DURATION: &str = "X-Proxy-Duration";

/// Build the agent's router: a single `GET /update` route that sleeps for
/// `delay` before responding `200`.
pub fn router(delay: Duration) -> Router {
    Router::new().route("/update", get(move |query| update(query, delay)))
}

async fn update(Query(params): Query<HashMap<String, String>>, delay: Duration) -> Response {
    let begin = Instant::now();

    let Some(info) = params.get("info") else {
        return (StatusCode::BAD_REQUEST, "missing required query parameter: info")
            .into_response();
    };

    debug!(info = %info, delay_ms = delay.as_millis(), "agent handling update");

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(info) {
        headers.insert(HEADER_INFO, v);
    }
    if let Ok(v) = HeaderValue::from_str(&format!("{:?}", begin.elapsed())) {
        headers.insert(HEADER_DURATION, v);
    }

    (StatusCode::OK, headers).into_response()
}

/// Bind and serve one agent on an OS-chosen ephemeral port, returning its
/// address before the server task is spawned — handy for tests and for the
/// `agents` CLI subcommand, which runs many of these sharing one handler.
pub async fn spawn_ephemeral(delay: Duration) -> std::io::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(delay);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_requires_info() {
        let (addr, _handle) = spawn_ephemeral(Duration::ZERO).await.unwrap();
        let res = reqwest::get(format!("http://{addr}/update")).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_echoes_info_header_and_waits_out_the_delay() {
        let (addr, _handle) = spawn_ephemeral(Duration::from_millis(50)).await.unwrap();
        let begin = Instant::now();
        let res = reqwest::get(format!("http://{addr}/update?info=hello")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("X-Proxy-Info").unwrap(), "hello");
        assert!(begin.elapsed() >= Duration::from_millis(50));
    }
}
