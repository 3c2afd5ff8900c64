//! A single downstream agent endpoint.
//!
//! A [`Peer`] is stateless with respect to tasks: many tasks and strategy
//! executions share the same `Peer`s (and the same underlying
//! [`reqwest::Client`]) concurrently for the lifetime of the process.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{DispatchError, Result};

/// One downstream agent endpoint: a scheme + `host:port` pair, reached
/// through a reusable HTTP client.
#[derive(Clone)]
pub struct Peer {
    scheme: String,
    addr: String,
    client: Arc<reqwest::Client>,
}

impl Peer {
    /// Create a peer addressed at `{scheme}://{addr}`, using `client` for
    /// all outbound dispatch.
    pub fn new(scheme: impl Into<String>, addr: impl Into<String>, client: Arc<reqwest::Client>) -> Self {
        Self {
            scheme: scheme.into(),
            addr: addr.into(),
            client,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Build an outbound `GET {scheme}://{addr}/update?info={payload}`,
    /// bound to a fresh cancellation scope. Performs no I/O; only request
    /// construction can fail here (a malformed base address).
    pub fn new_request(&self, payload: &str) -> Result<PeerRequest> {
        let url = Url::parse_with_params(
            &format!("{}://{}/update", self.scheme, self.addr),
            &[("info", payload)],
        )
        .map_err(|e| DispatchError::RequestBuild {
            addr: self.addr.clone(),
            source: Box::new(e),
        })?;

        Ok(PeerRequest {
            url,
            client: self.client.clone(),
            token: CancellationToken::new(),
        })
    }
}

/// An outbound request produced by a [`Peer`], ready to dispatch.
///
/// Carries the composed URL, the client that will send it, and a
/// cancellation scope: calling [`PeerRequest::cancel`] aborts an in-flight
/// [`PeerRequest::dispatch`].
pub struct PeerRequest {
    url: Url,
    client: Arc<reqwest::Client>,
    token: CancellationToken,
}

/// Outcome of dispatching a [`PeerRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOutcome {
    /// The peer responded with HTTP 200.
    Ok,
    /// The peer responded with a non-200 status.
    NonOk,
}

impl PeerRequest {
    /// Send the request and wait for a response, honouring the
    /// cancellation scope: if [`cancel`](Self::cancel) is invoked while the
    /// dispatch is in flight, this resolves immediately with
    /// [`DispatchError::Cancelled`] instead of waiting on the network.
    pub async fn dispatch(&self) -> Result<PeerOutcome> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(DispatchError::Cancelled),
            result = self.client.get(self.url.clone()).send() => {
                let response = result?;
                if response.status().is_success() {
                    Ok(PeerOutcome::Ok)
                } else {
                    Ok(PeerOutcome::NonOk)
                }
            }
        }
    }

    /// A cloneable handle that cancels this request. Cancelling is
    /// idempotent: invoking it more than once, or after the request has
    /// already completed, has no further effect.
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Release the cancellation scope, aborting an in-flight dispatch.
    /// Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The composed URL, useful for diagnostics.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Peer {
        Peer::new("http", "127.0.0.1:9", Arc::new(reqwest::Client::new()))
    }

    #[test]
    fn new_request_encodes_reserved_characters() {
        let req = peer().new_request("hello world&stuff").unwrap();
        assert!(req.url().as_str().contains("info=hello+world%26stuff")
            || req.url().query().unwrap().contains("info=hello%20world%26stuff"));
    }

    #[tokio::test]
    async fn cancel_before_dispatch_short_circuits() {
        let req = peer().new_request("x").unwrap();
        req.cancel();
        let result = req.dispatch().await;
        assert!(matches!(result, Err(DispatchError::Cancelled)));
    }

    #[test]
    fn cancel_is_idempotent() {
        let req = peer().new_request("x").unwrap();
        req.cancel();
        req.cancel();
        assert!(req.cancel_token().is_cancelled());
    }
}
