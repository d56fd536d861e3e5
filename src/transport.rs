// HTTP transport layer
// Request descriptors, responses and the reqwest-backed transport

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{classify, ApiError, ErrorKind};

/// Body of an outgoing request
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,

    /// Serialized as `application/json`
    Json(Value),

    /// Sent as `multipart/form-data` (file uploads)
    Multipart(Vec<FormPart>),
}

/// One field of a multipart form
#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: Option<String>,
        data: Bytes,
    },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        FormPart::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(name: impl Into<String>, file_name: impl Into<String>, data: Bytes) -> Self {
        FormPart::File {
            name: name.into(),
            file_name: file_name.into(),
            mime: None,
            data,
        }
    }
}

/// Everything needed to (re)issue a request.
///
/// Descriptors are cheap to clone so that a request can be replayed after a
/// token refresh.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub id: Uuid,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: RequestBody,
    retried: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn with_multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    /// Set `Authorization: Bearer <token>`, replacing any previous value
    pub fn set_bearer(&mut self, token: &str) -> std::result::Result<(), ApiError> {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| {
            ApiError::new(ErrorKind::Unknown, "Access token is not a valid header value")
        })?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    pub fn clear_bearer(&mut self) {
        self.headers.remove(AUTHORIZATION);
    }

    /// The bearer token currently attached, if any
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    /// Whether this request has already been replayed after an expired token
    pub fn is_retry(&self) -> bool {
        self.retried
    }

    pub(crate) fn into_retry(mut self) -> Self {
        self.retried = true;
        self
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Decode the body as JSON; an empty body decodes as `null`
    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, ApiError> {
        let bytes: &[u8] = if self.body.is_empty() { b"null" } else { &self.body };
        serde_json::from_slice(bytes)
            .map_err(|e| ApiError::network(format!("Failed to decode response body: {}", e)))
    }
}

/// Failure reported by a transport
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The server answered with a non-2xx status
    #[error("HTTP {status}")]
    Status { status: u16, body: Value },

    /// No usable response (connect failure, timeout, body read error)
    #[error("Network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Map into the classified error taxonomy
    pub fn classify(&self) -> ApiError {
        match self {
            TransportError::Status { status, body } => classify(*status, body),
            TransportError::Network(message) => ApiError::network(message.clone()),
        }
    }
}

/// Executes requests against the API.
///
/// Implementations must not interpret authentication; they only move bytes and
/// report non-2xx responses as [`TransportError::Status`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: &RequestDescriptor,
    ) -> std::result::Result<HttpResponse, TransportError>;
}

/// Transport over a pooled reqwest client
pub struct ReqwestTransport {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL every request path is joined onto
    base_url: Url,
}

impl ReqwestTransport {
    /// Create a new transport
    pub fn new(
        base_url: &str,
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(default_headers)
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid API URL: {}", base_url))?;

        Ok(Self { client, base_url })
    }

    /// Resolve a request path against the base URL, keeping any base path prefix
    fn url_for(&self, path: &str) -> std::result::Result<Url, TransportError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{}/{}", base, path))
            .map_err(|e| TransportError::Network(format!("Invalid request URL: {}", e)))
    }

    fn build(
        &self,
        request: &RequestDescriptor,
    ) -> std::result::Result<reqwest::RequestBuilder, TransportError> {
        let url = self.url_for(&request.path)?;
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder
                .header(CONTENT_TYPE, "application/json")
                .json(value),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        Ok(builder)
    }
}

/// Rebuild a multipart form; reqwest forms are consumed on send
fn build_form(parts: &[FormPart]) -> std::result::Result<reqwest::multipart::Form, TransportError> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                file_name,
                mime,
                data,
            } => {
                let mut file = reqwest::multipart::Part::bytes(data.to_vec())
                    .file_name(file_name.clone());
                if let Some(mime) = mime {
                    file = file
                        .mime_str(mime)
                        .map_err(|e| TransportError::Network(format!("Invalid MIME type: {}", e)))?;
                }
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

/// Categorize a reqwest error for logging
fn error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        request: &RequestDescriptor,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let builder = self.build(request)?;

        let response = builder.send().await.map_err(|e| {
            let kind = error_kind(&e);
            tracing::warn!(
                error_kind = kind,
                error = %e,
                request_id = %request.id,
                path = %request.path,
                "HTTP request error"
            );
            TransportError::Network(format!("HTTP request failed: {} (kind: {})", e, kind))
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(format!("Failed to read response body: {}", e)))?;

        if status.is_success() {
            return Ok(HttpResponse {
                status,
                headers,
                body,
            });
        }

        // Error bodies that are not JSON still surface as text
        let body = serde_json::from_slice(&body).unwrap_or_else(|_| {
            let text = String::from_utf8_lossy(&body);
            if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::json!({ "message": text.trim() })
            }
        });

        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
