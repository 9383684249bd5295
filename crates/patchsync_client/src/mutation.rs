//! Optimistic remote mutations.
//!
//! A mutation may carry a speculative patch. The patch is applied before the
//! remote call goes out, so watchers see the expected effect immediately. When
//! the call resolves, exactly one resolving batch is fed to the patch log:
//!
//! | Outcome                  | Resolving batch                          |
//! |--------------------------|------------------------------------------|
//! | response with a patch    | the patch, tagged with the token         |
//! | response without a patch | an empty retraction for the token        |
//! | error, timeout, drop     | an empty retraction for the token        |

use crate::applier::{Applied, PatchLog};
use crate::config::ClientConfig;
use crate::error::{RemoteError, SyncError};
use crate::session::Session;
use async_trait::async_trait;
use patchsync_protocol::{
    ExpiryToken, MutationRequest, MutationResponse, Operation, UpdateBatch,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Something that can perform remote-mutating calls.
#[async_trait]
pub trait RemoteMutator: Send + Sync {
    /// Performs the call. `request.expire_id` carries the speculative token,
    /// if one was applied, so the server can tag the revision it produces.
    async fn mutate(&self, request: MutationRequest) -> Result<MutationResponse, RemoteError>;
}

#[async_trait]
impl<T: RemoteMutator + ?Sized> RemoteMutator for Arc<T> {
    async fn mutate(&self, request: MutationRequest) -> Result<MutationResponse, RemoteError> {
        (**self).mutate(request).await
    }
}

/// Retracts a speculative patch when dropped, unless disarmed.
///
/// Holding one across an `.await` makes a cancelled call roll back its patch.
#[derive(Debug)]
pub struct RollbackGuard<'a> {
    log: &'a PatchLog,
    token: Option<ExpiryToken>,
}

impl<'a> RollbackGuard<'a> {
    /// Guards `token` on `log`. A `None` token guards nothing.
    pub fn new(log: &'a PatchLog, token: Option<ExpiryToken>) -> Self {
        Self { log, token }
    }

    /// Returns the guarded token.
    pub fn token(&self) -> Option<ExpiryToken> {
        self.token
    }

    /// Stops guarding and hands the token back to the caller.
    pub fn disarm(mut self) -> Option<ExpiryToken> {
        self.token.take()
    }
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if self.log.retract(token) {
                debug!(%token, "rolled back speculative patch");
            }
        }
    }
}

/// Runs `call` with optimistic local state.
///
/// `speculative` (if non-empty) is applied under a fresh token before `call`
/// starts, and `call` receives that token. Whatever the outcome, the token is
/// resolved exactly once before this returns. The remote error, if any, is
/// returned unchanged after the rollback.
///
/// A speculative patch that does not apply to the current tree is skipped and
/// the call proceeds without a token.
pub async fn optimistic<F, Fut>(
    log: &PatchLog,
    speculative: Vec<Operation>,
    call: F,
) -> Result<Value, RemoteError>
where
    F: FnOnce(Option<ExpiryToken>) -> Fut,
    Fut: Future<Output = Result<MutationResponse, RemoteError>>,
{
    let token = if speculative.is_empty() {
        None
    } else {
        match log.apply_speculative(speculative) {
            Ok(token) => Some(token),
            Err(err) => {
                warn!(error = %err, "speculative patch not applied");
                None
            }
        }
    };

    let guard = RollbackGuard::new(log, token);
    let response = call(token).await?;
    let token = guard.disarm();

    match (response.patch, token) {
        (Some(patch), Some(token)) => resolve_with_patch(log, patch.with_expiry(token), token),
        (Some(patch), None) => {
            if let Err(err) = log.apply_batch(patch) {
                warn!(error = %err, "mutation patch not applied");
            }
        }
        (None, Some(token)) => {
            log.retract(token);
        }
        (None, None) => {}
    }

    Ok(response.result)
}

fn resolve_with_patch(log: &PatchLog, patch: UpdateBatch, token: ExpiryToken) {
    match log.apply_batch(patch) {
        Ok(Applied::Committed { sequence }) => {
            debug!(%token, sequence, "speculative patch confirmed");
        }
        Ok(_) => {}
        Err(SyncError::SequenceGap { expected, found }) if found < expected => {
            // The sync engine already applied this revision.
            debug!(%token, found, "mutation patch already applied");
        }
        Err(err) => {
            warn!(%token, error = %err, "mutation patch not applied");
        }
    }
    // Whatever happened above, the token must not stay pending.
    log.retract(token);
}

/// Issues remote mutations through a [`RemoteMutator`] with optimistic state.
pub struct MutationClient<M: RemoteMutator> {
    mutator: M,
    log: Arc<PatchLog>,
    session: Session,
    timeout: Option<Duration>,
}

impl<M: RemoteMutator> MutationClient<M> {
    /// Creates a client.
    pub fn new(mutator: M, log: Arc<PatchLog>, session: Session, config: &ClientConfig) -> Self {
        Self {
            mutator,
            log,
            session,
            timeout: config.speculative_timeout,
        }
    }

    /// Returns the patch log this client resolves into.
    pub fn log(&self) -> &Arc<PatchLog> {
        &self.log
    }

    /// Returns the session this client reports to.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the underlying mutator.
    pub fn mutator(&self) -> &M {
        &self.mutator
    }

    /// Calls `method` with `params`, showing `speculative` until it resolves.
    ///
    /// An [`RemoteError::AuthExpired`] failure is also published on the
    /// session.
    pub async fn invoke(
        &self,
        method: &str,
        params: Value,
        speculative: Vec<Operation>,
    ) -> Result<Value, RemoteError> {
        if self.session.is_closed() {
            return Err(RemoteError::SessionClosed);
        }

        debug!(method, speculative = speculative.len(), "invoking remote mutation");
        let request = MutationRequest::new(method, params);
        let mutator = &self.mutator;
        let timeout = self.timeout;

        let result = optimistic(&self.log, speculative, |token| async move {
            let call = mutator.mutate(request.with_expire_id(token));
            match timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(RemoteError::Timeout)),
                None => call.await,
            }
        })
        .await;

        if let Err(err) = &result {
            warn!(method, error = %err, "remote mutation failed");
            if let RemoteError::AuthExpired(reason) = err {
                self.session.notify_unauthorized(reason.clone());
            }
        }
        result
    }

    /// Like [`invoke`](Self::invoke), deserializing the result into `T`.
    pub async fn invoke_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        speculative: Vec<Operation>,
    ) -> Result<T, RemoteError> {
        let value = self.invoke(method, params, speculative).await?;
        serde_json::from_value(value)
            .map_err(|e| RemoteError::Protocol(format!("unexpected result shape: {e}")))
    }
}

impl<M: RemoteMutator> std::fmt::Debug for MutationClient<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationClient")
            .field("log", &self.log)
            .field("timeout", &self.timeout)
            .finish()
    }
}
