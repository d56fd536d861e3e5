// Token refresh call

use super::types::{RefreshRequest, RefreshResponse, Token};
use crate::error::ApiError;
use crate::transport::{RequestDescriptor, Transport, TransportError};

/// Exchange `refresh_token` for a new token pair at `refresh_path`.
///
/// The call goes straight to the transport without an `Authorization` header.
/// Any failure (non-2xx, timeout, malformed body) is a [`ApiError::refresh_failed`].
pub async fn refresh_session(
    transport: &dyn Transport,
    refresh_path: &str,
    refresh_token: &str,
) -> Result<Token, ApiError> {
    tracing::info!("Refreshing access token...");

    let body = serde_json::to_value(RefreshRequest { refresh_token })
        .map_err(|e| ApiError::refresh_failed(format!("Failed to encode refresh request: {}", e)))?;
    let request = RequestDescriptor::post(refresh_path).with_json(body);

    let response = transport.execute(&request).await.map_err(|e| {
        let message = match &e {
            TransportError::Status { .. } => e.classify().message,
            TransportError::Network(message) => message.clone(),
        };
        tracing::error!(error = %e, message = %message, "Token refresh failed");
        ApiError::refresh_failed(message)
    })?;

    let data: RefreshResponse = response.json().map_err(|e| {
        tracing::error!("Failed to parse refresh response: {}", e);
        ApiError::refresh_failed("Failed to parse refresh response")
    })?;

    if data.access_token.is_empty() {
        return Err(ApiError::refresh_failed(
            "Refresh response does not contain access_token",
        ));
    }

    tracing::info!("Access token refreshed");

    Ok(Token {
        access_token: data.access_token,
        // Keep the current refresh token when the server does not rotate it
        refresh_token: data
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_string()),
    })
}
