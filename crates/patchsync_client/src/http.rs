//! HTTP transport implementation.
//!
//! This module provides an HTTP-based [`PatchSource`] and [`RemoteMutator`]
//! over any [`HttpClient`]. [`LoopbackClient`] routes requests straight into
//! an in-process [`LoopbackServer`].
//!
//! | Endpoint        | Request body       | Response body          |
//! |-----------------|--------------------|------------------------|
//! | `/db/dump`      | `{}`               | [`Dump`]               |
//! | `/db/revisions` | [`UpdatesRequest`] | `[UpdateBatch]`        |
//! | `/rpc`          | [`MutationRequest`]| [`MutationResponse`]   |
//!
//! Non-2xx answers carry an [`RpcErrorBody`]. HTTP 401 and RPC code 34 both
//! mean the session expired.

use crate::error::RemoteError;
use crate::mutation::RemoteMutator;
use crate::transport::PatchSource;
use async_trait::async_trait;
use parking_lot::RwLock;
use patchsync_protocol::{
    decode_json, encode_json, Dump, MutationRequest, MutationResponse, RpcErrorBody, Sequence,
    UpdateBatch, UpdatesRequest,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Status code for an unauthenticated request.
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the status code and response body.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<(u16, Vec<u8>), String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// HTTP-based transport for both boundaries.
///
/// Uses JSON for request/response bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the host (e.g., "https://node.local").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Cleared only by [`close`](HttpTransport::close).
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Checks if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    /// Reopens a closed transport.
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Closes the transport. Calls fail until [`reconnect`](Self::reconnect).
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    async fn post_json<Req, Res>(&self, endpoint: &str, request: &Req) -> Result<Res, RemoteError>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        if !self.is_connected() {
            return Err(RemoteError::transport_retryable("not connected"));
        }

        let body = encode_json(request)
            .map_err(|e| RemoteError::Protocol(format!("failed to encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, endpoint);
        // A failed post is retryable; the next call tries the client again.
        let (status, response_body) = self.client.post(&url, body).await.map_err(|e| {
            self.set_error(&e);
            RemoteError::transport_retryable(e)
        })?;

        self.clear_error();
        debug!(endpoint, status, bytes = response_body.len(), "http response");

        if status == STATUS_UNAUTHORIZED {
            let message = decode_json::<RpcErrorBody>(&response_body)
                .map(|body| body.message)
                .unwrap_or_else(|_| "unauthorized".to_string());
            return Err(RemoteError::AuthExpired(message));
        }

        if !(200..300).contains(&status) {
            return Err(match decode_json::<RpcErrorBody>(&response_body) {
                Ok(body) => body.into(),
                Err(_) => RemoteError::Transport {
                    message: format!("http status {status}"),
                    retryable: status >= 500,
                },
            });
        }

        decode_json(&response_body)
            .map_err(|e| RemoteError::Protocol(format!("failed to decode response: {e}")))
    }
}

#[async_trait]
impl<C: HttpClient> PatchSource for HttpTransport<C> {
    async fn dump(&self) -> Result<Dump, RemoteError> {
        self.post_json("/db/dump", &serde_json::json!({})).await
    }

    async fn updates(
        &self,
        from: Sequence,
        to: Option<Sequence>,
    ) -> Result<Vec<UpdateBatch>, RemoteError> {
        self.post_json("/db/revisions", &UpdatesRequest::new(from, to))
            .await
    }
}

#[async_trait]
impl<C: HttpClient> RemoteMutator for HttpTransport<C> {
    async fn mutate(&self, request: MutationRequest) -> Result<MutationResponse, RemoteError> {
        self.post_json("/rpc", &request).await
    }
}

/// Trait for servers that can handle loopback requests.
#[async_trait]
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST to `path` and returns the status code and body.
    async fn handle_post(&self, path: &str, body: &[u8]) -> (u16, Vec<u8>);
}

#[async_trait]
impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    async fn handle_post(&self, path: &str, body: &[u8]) -> (u16, Vec<u8>) {
        (**self).handle_post(path, body).await
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    healthy: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            healthy: AtomicBool::new(true),
        }
    }

    /// Simulates the link going up or down.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

/// Strips scheme and authority, leaving the path.
fn path_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.find('/').map_or("/", |i| &rest[i..])
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<(u16, Vec<u8>), String> {
        if !self.is_healthy() {
            return Err("connection refused".into());
        }
        Ok(self.server.handle_post(path_of(url), &body).await)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
