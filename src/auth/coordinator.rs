// Refresh coordination
// Single-flight token refresh with a queue of requests waiting to be replayed

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::refresh::refresh_session;
use super::session::SessionController;
use crate::error::ApiError;
use crate::http_client::Dispatcher;
use crate::transport::{HttpResponse, RequestDescriptor};

type Reply = oneshot::Sender<Result<HttpResponse, ApiError>>;

/// A request that hit an expired token and waits for the refresh outcome
struct PendingRequest {
    request: RequestDescriptor,
    reply: Reply,
}

enum RefreshState {
    Idle,
    Refreshing { queue: Vec<PendingRequest> },
}

/// What to do with a request that just failed with an expired token
enum Admission {
    /// Start a refresh cycle with this request as its trigger
    Lead(RequestDescriptor),
    /// A cycle is running; wait for it
    Queued(oneshot::Receiver<Result<HttpResponse, ApiError>>),
    /// The token already changed since the request was sent
    Replay(RequestDescriptor),
    /// The session was torn down since the request was sent
    Reject(ApiError),
}

/// Snapshot of the coordinator for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStatus {
    pub refreshing: bool,
    pub queued: usize,
}

/// Coordinates access-token refresh across concurrent requests.
///
/// At most one refresh call is in flight. Requests failing with an expired
/// token while it runs are queued and replayed once the new token has been
/// written; if the refresh fails they all receive the same error and the
/// session is torn down once.
///
/// Each refresh cycle runs in its own task, so dropping the future of the
/// request that started it never leaves the coordinator stuck in `Refreshing`.
pub struct RefreshCoordinator {
    dispatcher: Dispatcher,
    session: Arc<dyn SessionController>,
    refresh_path: String,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        dispatcher: Dispatcher,
        session: Arc<dyn SessionController>,
        refresh_path: String,
    ) -> Self {
        Self {
            dispatcher,
            session,
            refresh_path,
            state: Mutex::new(RefreshState::Idle),
        }
    }

    pub fn status(&self) -> RefreshStatus {
        match &*self.state.lock() {
            RefreshState::Idle => RefreshStatus {
                refreshing: false,
                queued: 0,
            },
            RefreshState::Refreshing { queue } => RefreshStatus {
                refreshing: true,
                queued: queue.len(),
            },
        }
    }

    /// Recover `request` after it was rejected with an expired token.
    ///
    /// `sent_with` is the access token the failed attempt carried. The request
    /// is replayed at most once; a second expired-token failure propagates.
    pub(crate) async fn handle_auth_expired(
        self: &Arc<Self>,
        request: RequestDescriptor,
        sent_with: Option<String>,
    ) -> Result<HttpResponse, ApiError> {
        let request = request.into_retry();

        match self.admit(request, sent_with) {
            Admission::Lead(request) => {
                let (reply, settled) = oneshot::channel();
                tokio::spawn(Arc::clone(self).run_cycle(PendingRequest { request, reply }));
                Self::wait(settled).await
            }
            Admission::Queued(settled) => Self::wait(settled).await,
            Admission::Replay(request) => {
                tracing::debug!(
                    request_id = %request.id,
                    "Token changed while request was in flight, replaying"
                );
                self.dispatcher.dispatch(&request).await.1
            }
            Admission::Reject(err) => Err(err),
        }
    }

    /// Atomic check-and-set of the refresh state
    fn admit(&self, request: RequestDescriptor, sent_with: Option<String>) -> Admission {
        let mut state = self.state.lock();

        if let RefreshState::Refreshing { queue } = &mut *state {
            let (reply, settled) = oneshot::channel();
            tracing::debug!(
                request_id = %request.id,
                queued = queue.len() + 1,
                "Refresh in progress, queueing request"
            );
            queue.push(PendingRequest { request, reply });
            return Admission::Queued(settled);
        }

        let current = self.dispatcher.store().get().map(|t| t.access_token);
        match (current, sent_with) {
            (Some(current), sent) if sent.as_deref() != Some(current.as_str()) => {
                Admission::Replay(request)
            }
            (None, Some(_)) => Admission::Reject(ApiError::session_expired()),
            _ => {
                *state = RefreshState::Refreshing { queue: Vec::new() };
                Admission::Lead(request)
            }
        }
    }

    async fn wait(
        settled: oneshot::Receiver<Result<HttpResponse, ApiError>>,
    ) -> Result<HttpResponse, ApiError> {
        settled
            .await
            .unwrap_or_else(|_| Err(ApiError::refresh_failed("Token refresh was interrupted")))
    }

    /// One refresh cycle: refresh, then replay or reject everything waiting
    async fn run_cycle(self: Arc<Self>, trigger: PendingRequest) {
        let outcome = match self.dispatcher.store().get() {
            Some(token) if !token.refresh_token.is_empty() => {
                refresh_session(
                    self.dispatcher.transport(),
                    &self.refresh_path,
                    &token.refresh_token,
                )
                .await
            }
            _ => Err(ApiError::no_refresh_token()),
        };

        match outcome {
            Ok(token) => {
                // The new token must be readable before anything is replayed
                if let Err(e) = self.dispatcher.store().set(token) {
                    tracing::warn!("Failed to persist refreshed token: {:#}", e);
                }
                let queue = self.finish();

                tracing::info!(
                    queued = queue.len(),
                    "Replaying requests with refreshed token"
                );

                self.settle_by_replay(trigger).await;
                join_all(queue.into_iter().map(|pending| self.settle_by_replay(pending))).await;
            }
            Err(err) => {
                tracing::error!(kind = ?err.kind, "Token refresh failed: {}", err);

                if let Err(e) = self.dispatcher.store().clear() {
                    tracing::error!("Failed to clear token after refresh failure: {:#}", e);
                }
                self.session.logout();
                self.session.notify_unauthenticated();

                let queue = self.finish();
                tracing::warn!(
                    rejected = queue.len() + 1,
                    "Rejecting requests waiting on token refresh"
                );

                for pending in std::iter::once(trigger).chain(queue) {
                    let _ = pending.reply.send(Err(err.clone()));
                }
            }
        }
    }

    /// Return to `Idle`, handing back the queue
    fn finish(&self) -> Vec<PendingRequest> {
        match std::mem::replace(&mut *self.state.lock(), RefreshState::Idle) {
            RefreshState::Refreshing { queue } => queue,
            RefreshState::Idle => Vec::new(),
        }
    }

    async fn settle_by_replay(&self, pending: PendingRequest) {
        if pending.reply.is_closed() {
            tracing::debug!(
                request_id = %pending.request.id,
                "Caller went away, skipping replay"
            );
            return;
        }

        let (_, result) = self.dispatcher.dispatch(&pending.request).await;
        let _ = pending.reply.send(result);
    }
}
