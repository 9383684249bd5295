//! An in-memory authoritative host.
//!
//! `ReferenceServer` owns the real tree and its revision log. It answers both
//! boundaries the client talks to, directly ([`PatchSource`],
//! [`RemoteMutator`]) or as JSON over a loopback HTTP client
//! ([`LoopbackServer`]).
//!
//! The server maintains:
//! - The authoritative tree and its sequence
//! - Every durable revision in commit order, tagged with the expiry token of
//!   the mutation that produced it
//! - Registered method handlers
//! - Fault injection switches (failure, expired session, latency)

use async_trait::async_trait;
use parking_lot::RwLock;
use patchsync_client::{LoopbackServer, PatchSource, RemoteError, RemoteMutator};
use patchsync_protocol::{
    apply_operations, decode_json, encode_json, Dump, ExpiryToken, MutationRequest,
    MutationResponse, Operation, PathError, RpcErrorBody, Sequence, UpdateBatch, UpdatesRequest,
    AUTHORIZATION_CODE,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Error code for an unknown method.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Error code for a handler whose operations do not apply.
pub const INVALID_PARAMS: i32 = -32602;

/// What a handler decided: the call result and the operations to commit.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    /// Value returned to the caller.
    pub result: Value,
    /// Operations committed as one revision. Empty means no state change.
    pub operations: Vec<Operation>,
}

impl HandlerOutcome {
    /// An outcome that changes state.
    pub fn patch(result: Value, operations: Vec<Operation>) -> Self {
        Self { result, operations }
    }

    /// An outcome that leaves state alone.
    pub fn result(result: Value) -> Self {
        Self {
            result,
            operations: Vec::new(),
        }
    }
}

/// A method handler. Receives the current tree and the call params.
pub type Handler =
    dyn Fn(&Value, &Value) -> Result<HandlerOutcome, RpcErrorBody> + Send + Sync + 'static;

struct ServerState {
    tree: Value,
    sequence: Sequence,
    revisions: Vec<UpdateBatch>,
}

/// In-memory authoritative host.
pub struct ReferenceServer {
    state: RwLock<ServerState>,
    handlers: RwLock<HashMap<String, Arc<Handler>>>,
    failing: AtomicBool,
    auth_expired: AtomicBool,
    latency: RwLock<Duration>,
    mutations: AtomicUsize,
}

impl ReferenceServer {
    /// Creates a server holding `tree` at sequence 0.
    pub fn new(tree: Value) -> Self {
        Self::with_sequence(tree, 0)
    }

    /// Creates a server holding `tree` at `sequence`.
    pub fn with_sequence(tree: Value, sequence: Sequence) -> Self {
        Self {
            state: RwLock::new(ServerState {
                tree,
                sequence,
                revisions: Vec::new(),
            }),
            handlers: RwLock::new(HashMap::new()),
            failing: AtomicBool::new(false),
            auth_expired: AtomicBool::new(false),
            latency: RwLock::new(Duration::ZERO),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Registers a handler for `method`, replacing any previous one.
    pub fn register<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(&Value, &Value) -> Result<HandlerOutcome, RpcErrorBody> + Send + Sync + 'static,
    {
        self.handlers.write().insert(method.into(), Arc::new(handler));
    }

    /// Commits `operations` as the next revision.
    ///
    /// Atomic: on error neither the tree nor the sequence changes.
    pub fn commit(
        &self,
        operations: Vec<Operation>,
        expires: Option<ExpiryToken>,
    ) -> Result<UpdateBatch, PathError> {
        let mut state = self.state.write();
        apply_operations(&mut state.tree, &operations)?;
        state.sequence += 1;
        let mut batch = UpdateBatch::durable(state.sequence, operations);
        if let Some(token) = expires {
            batch = batch.with_expiry(token);
        }
        state.revisions.push(batch.clone());
        debug!(sequence = state.sequence, "committed revision");
        Ok(batch)
    }

    /// Returns a snapshot of the authoritative state.
    pub fn snapshot(&self) -> Dump {
        let state = self.state.read();
        Dump::new(state.tree.clone(), state.sequence)
    }

    /// Returns the current sequence.
    pub fn sequence(&self) -> Sequence {
        self.state.read().sequence
    }

    /// Returns the current tree.
    pub fn tree(&self) -> Value {
        self.state.read().tree.clone()
    }

    /// Returns revisions `from..=to` (or `from..`), in order.
    pub fn revisions(&self, from: Sequence, to: Option<Sequence>) -> Vec<UpdateBatch> {
        let state = self.state.read();
        state
            .revisions
            .iter()
            .filter(|batch| {
                let sequence = batch.sequence().unwrap_or(0);
                sequence >= from && to.map_or(true, |to| sequence <= to)
            })
            .cloned()
            .collect()
    }

    /// Returns the number of stored revisions.
    pub fn revision_count(&self) -> usize {
        self.state.read().revisions.len()
    }

    /// Makes every call fail with a retryable transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes every call fail as unauthenticated.
    pub fn set_auth_expired(&self, expired: bool) {
        self.auth_expired.store(expired, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Returns how many mutations were handled (including failed ones).
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), RemoteError> {
        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::transport_retryable("injected failure"));
        }
        if self.auth_expired.load(Ordering::SeqCst) {
            return Err(RemoteError::AuthExpired("session expired".into()));
        }
        Ok(())
    }

    fn run_handler(&self, request: &MutationRequest) -> Result<MutationResponse, RemoteError> {
        let handler = self
            .handlers
            .read()
            .get(&request.method)
            .cloned()
            .ok_or_else(|| RemoteError::Rpc {
                code: METHOD_NOT_FOUND,
                message: format!("method not found: {}", request.method),
            })?;

        let tree = self.tree();
        let outcome = handler(&tree, &request.params).map_err(RemoteError::from)?;
        if outcome.operations.is_empty() {
            return Ok(MutationResponse::new(outcome.result));
        }

        let patch = self
            .commit(outcome.operations, request.expire_id)
            .map_err(|e| RemoteError::Rpc {
                code: INVALID_PARAMS,
                message: e.to_string(),
            })?;
        Ok(MutationResponse::new(outcome.result).with_patch(patch))
    }
}

impl Default for ReferenceServer {
    fn default() -> Self {
        Self::new(Value::Object(Default::default()))
    }
}

impl std::fmt::Debug for ReferenceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceServer")
            .field("sequence", &self.sequence())
            .field("revisions", &self.revision_count())
            .finish()
    }
}

#[async_trait]
impl PatchSource for ReferenceServer {
    async fn dump(&self) -> Result<Dump, RemoteError> {
        self.gate().await?;
        Ok(self.snapshot())
    }

    async fn updates(
        &self,
        from: Sequence,
        to: Option<Sequence>,
    ) -> Result<Vec<UpdateBatch>, RemoteError> {
        self.gate().await?;
        Ok(self.revisions(from, to))
    }
}

#[async_trait]
impl RemoteMutator for ReferenceServer {
    async fn mutate(&self, request: MutationRequest) -> Result<MutationResponse, RemoteError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        debug!(method = %request.method, "handling mutation");
        self.run_handler(&request)
    }
}

fn json_reply<T: serde::Serialize>(status: u16, body: &T) -> (u16, Vec<u8>) {
    match encode_json(body) {
        Ok(bytes) => (status, bytes),
        Err(_) => (500, Vec::new()),
    }
}

fn error_reply(error: RemoteError) -> (u16, Vec<u8>) {
    match error {
        RemoteError::AuthExpired(message) => {
            json_reply(401, &RpcErrorBody::new(AUTHORIZATION_CODE, message))
        }
        RemoteError::Rpc { code, message } => json_reply(400, &RpcErrorBody::new(code, message)),
        // An opaque 503 reads as a retryable transport failure.
        _ => (503, Vec::new()),
    }
}

#[async_trait]
impl LoopbackServer for ReferenceServer {
    async fn handle_post(&self, path: &str, body: &[u8]) -> (u16, Vec<u8>) {
        let outcome = match path {
            "/db/dump" => PatchSource::dump(self).await.map(|dump| json_reply(200, &dump)),
            "/db/revisions" => match decode_json::<UpdatesRequest>(body) {
                Ok(request) => self
                    .updates(request.from, request.to)
                    .await
                    .map(|batches| json_reply(200, &batches)),
                Err(e) => return json_reply(400, &RpcErrorBody::new(INVALID_PARAMS, e.to_string())),
            },
            "/rpc" => match decode_json::<MutationRequest>(body) {
                Ok(request) => self
                    .mutate(request)
                    .await
                    .map(|response| json_reply(200, &response)),
                Err(e) => return json_reply(400, &RpcErrorBody::new(INVALID_PARAMS, e.to_string())),
            },
            other => {
                return json_reply(
                    404,
                    &RpcErrorBody::new(METHOD_NOT_FOUND, format!("no route for {other}")),
                )
            }
        };
        outcome.unwrap_or_else(error_reply)
    }
}
