use anyhow::Result as AnyResult;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{RefreshCoordinator, RefreshStatus, SessionController, TokenStore};
use crate::config::Config;
use crate::error::{ApiError, ErrorKind, Result};
use crate::transport::{FormPart, HttpResponse, ReqwestTransport, RequestDescriptor, Transport};

/// Attaches the current access token and executes a single attempt
#[derive(Clone)]
pub(crate) struct Dispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
}

impl Dispatcher {
    pub(crate) fn store(&self) -> &dyn TokenStore {
        self.store.as_ref()
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Send `request` once with the token read right now.
    ///
    /// Returns the access token that was attached alongside the outcome, so an
    /// expired-token failure can be matched against later token changes.
    pub(crate) async fn dispatch(
        &self,
        request: &RequestDescriptor,
    ) -> (Option<String>, Result<HttpResponse>) {
        let token = self.store.get().map(|t| t.access_token);

        let mut outgoing = request.clone();
        if let Some(ref token) = token {
            if let Err(e) = outgoing.set_bearer(token) {
                return (None, Err(e));
            }
        }

        tracing::debug!(
            request_id = %request.id,
            retry = request.is_retry(),
            authenticated = token.is_some(),
            "[Request] {} {}",
            request.method,
            request.path
        );

        match self.transport.execute(&outgoing).await {
            Ok(response) => {
                tracing::debug!(
                    request_id = %request.id,
                    "[Response] {} {}",
                    response.status.as_u16(),
                    request.path
                );
                (token, Ok(response))
            }
            Err(e) => {
                let err = e.classify();
                tracing::warn!(
                    request_id = %request.id,
                    kind = ?err.kind,
                    "[Response] {} {} failed: {}",
                    e,
                    request.path,
                    err
                );
                (token, Err(err))
            }
        }
    }
}

/// HTTP client with bearer authentication and transparent token refresh.
///
/// Requests carry the token held by the [`TokenStore`] at send time. A request
/// rejected with 401 is handed to the [`RefreshCoordinator`], which refreshes
/// the token once for every request failing concurrently and replays them;
/// callers only see the 401 when recovery is impossible.
#[derive(Clone)]
pub struct AuthClient {
    dispatcher: Dispatcher,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthClient {
    /// Create a new client from its collaborators
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        session: Arc<dyn SessionController>,
        refresh_path: impl Into<String>,
    ) -> Self {
        let dispatcher = Dispatcher { transport, store };
        let coordinator = Arc::new(RefreshCoordinator::new(
            dispatcher.clone(),
            session,
            refresh_path.into(),
        ));
        Self {
            dispatcher,
            coordinator,
        }
    }

    /// Create a client talking to `config.api_url` over reqwest
    pub fn from_config(
        config: &Config,
        store: Arc<dyn TokenStore>,
        session: Arc<dyn SessionController>,
    ) -> AnyResult<Self> {
        let transport = ReqwestTransport::new(
            &config.api_url,
            config.http_max_connections,
            config.http_connect_timeout,
            config.http_request_timeout,
        )?;

        Ok(Self::new(
            Arc::new(transport),
            store,
            session,
            config.refresh_path.clone(),
        ))
    }

    /// Send a request, recovering once from an expired access token
    pub async fn send(&self, request: RequestDescriptor) -> Result<HttpResponse> {
        let (sent_with, result) = self.dispatcher.dispatch(&request).await;

        match result {
            Err(err) if err.kind == ErrorKind::AuthExpired && !request.is_retry() => {
                tracing::info!(
                    request_id = %request.id,
                    "Access token expired, handing request to refresh coordinator"
                );
                self.coordinator
                    .handle_auth_expired(request, sent_with)
                    .await
            }
            other => other,
        }
    }

    pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let request = RequestDescriptor::get(path).with_query(params.iter().copied());
        self.send(request).await?.json()
    }

    pub async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Value> {
        let request = RequestDescriptor::post(path).with_json(encode(body)?);
        self.send(request).await?.json()
    }

    pub async fn put<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Value> {
        let request = RequestDescriptor::put(path).with_json(encode(body)?);
        self.send(request).await?.json()
    }

    pub async fn delete(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let request = RequestDescriptor::delete(path).with_query(params.iter().copied());
        self.send(request).await?.json()
    }

    /// Upload a `multipart/form-data` body
    pub async fn post_form_data(&self, path: &str, parts: Vec<FormPart>) -> Result<Value> {
        let request = RequestDescriptor::post(path).with_multipart(parts);
        self.send(request).await?.json()
    }

    pub fn refresh_status(&self) -> RefreshStatus {
        self.coordinator.status()
    }
}

fn encode<T: Serialize + ?Sized>(body: &T) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| {
        ApiError::new(
            ErrorKind::Unknown,
            format!("Failed to encode request body: {}", e),
        )
    })
}
