// Error handling module
// Defines the connector error taxonomy and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Token persistence failure
///
/// Always logged by the caller and never fatal: the in-memory credential set
/// stays authoritative for the running process.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Token store I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize credentials: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Token store lock poisoned")]
    Poisoned,
}

/// OAuth grant failures against the token endpoint
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Authorization code exchange rejected upstream
    #[error("Token exchange failed: {status} - {body}")]
    ExchangeFailed { status: u16, body: String },

    /// Refresh grant rejected upstream
    #[error("Token refresh failed: {status} - {body}")]
    RefreshFailed { status: u16, body: String },

    /// No refresh token held; the user must reconnect
    #[error("No refresh token available, reconnect to QuickBooks")]
    NoRefreshToken,

    /// Token endpoint unreachable
    #[error("Token endpoint request failed: {0}")]
    Transport(String),

    /// Token endpoint answered 200 with a body we cannot use
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),
}

/// Failures of an authenticated call against the accounting API
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Not authenticated, connect to QuickBooks first")]
    Unauthenticated,

    #[error("Access token refresh failed: {0}")]
    AuthRefreshFailed(#[source] AuthError),

    #[error("QuickBooks API error: {status} - {body}")]
    ApiError { status: u16, body: String },

    #[error("QuickBooks request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid QuickBooks response: {0}")]
    InvalidResponse(String),
}

/// API errors returned by the route layer
#[derive(Error, Debug)]
pub enum ApiError {
    /// Gateway API key missing or wrong
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// No QuickBooks connection established
    #[error("Not connected to QuickBooks")]
    NotConnected,

    /// Connection exists but the tokens can no longer be renewed
    #[error("QuickBooks authorization required: {0}")]
    ReauthorizationRequired(String),

    /// Error relayed from the QuickBooks API
    #[error("QuickBooks API error: {status} - {message}")]
    UpstreamApi { status: u16, message: String },

    /// QuickBooks or the token endpoint could not be reached or parsed
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// Request validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NoRefreshToken => ApiError::ReauthorizationRequired(err.to_string()),
            AuthError::ExchangeFailed { status, body } | AuthError::RefreshFailed { status, body } => {
                ApiError::UpstreamApi {
                    status: if status >= 500 { 502 } else { 400 },
                    message: body,
                }
            }
            AuthError::Transport(msg) | AuthError::InvalidResponse(msg) => ApiError::BadGateway(msg),
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Unauthenticated => ApiError::NotConnected,
            UpstreamError::AuthRefreshFailed(auth) => {
                ApiError::ReauthorizationRequired(auth.to_string())
            }
            UpstreamError::ApiError { status, body } => ApiError::UpstreamApi {
                status,
                message: body,
            },
            UpstreamError::Transport(e) => ApiError::BadGateway(e.to_string()),
            UpstreamError::InvalidResponse(msg) => ApiError::BadGateway(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::AuthError(msg) => (StatusCode::UNAUTHORIZED, "auth_error", msg),
            ApiError::NotConnected => (
                StatusCode::UNAUTHORIZED,
                "not_connected",
                "Not connected to QuickBooks".to_string(),
            ),
            ApiError::ReauthorizationRequired(msg) => {
                (StatusCode::UNAUTHORIZED, "reauthorization_required", msg)
            }
            ApiError::UpstreamApi { status, message } => {
                let status_code =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status_code, "quickbooks_api_error", message)
            }
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "bad_gateway", msg),
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for route handlers
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_messages_keep_upstream_body() {
        let err = AuthError::ExchangeFailed {
            status: 400,
            body: r#"{"error":"invalid_grant"}"#.to_string(),
        };
        assert_eq!(
            err.to_string(),
            r#"Token exchange failed: 400 - {"error":"invalid_grant"}"#
        );

        let err = AuthError::RefreshFailed {
            status: 401,
            body: "expired".to_string(),
        };
        assert_eq!(err.to_string(), "Token refresh failed: 401 - expired");
    }

    #[test]
    fn test_upstream_error_messages() {
        let err = UpstreamError::ApiError {
            status: 429,
            body: "Throttled".to_string(),
        };
        assert_eq!(err.to_string(), "QuickBooks API error: 429 - Throttled");

        let err = UpstreamError::AuthRefreshFailed(AuthError::NoRefreshToken);
        assert!(err.to_string().contains("No refresh token"));
    }

    #[test]
    fn test_upstream_error_mapping() {
        assert!(matches!(
            ApiError::from(UpstreamError::Unauthenticated),
            ApiError::NotConnected
        ));
        assert!(matches!(
            ApiError::from(UpstreamError::AuthRefreshFailed(AuthError::NoRefreshToken)),
            ApiError::ReauthorizationRequired(_)
        ));
        match ApiError::from(UpstreamError::ApiError {
            status: 404,
            body: "Object Not Found".to_string(),
        }) {
            ApiError::UpstreamApi { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Object Not Found");
            }
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn test_auth_error_mapping() {
        assert!(matches!(
            ApiError::from(AuthError::NoRefreshToken),
            ApiError::ReauthorizationRequired(_)
        ));
        match ApiError::from(AuthError::ExchangeFailed {
            status: 401,
            body: "invalid_client".to_string(),
        }) {
            ApiError::UpstreamApi { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid_client");
            }
            other => panic!("unexpected mapping: {:?}", other),
        }
        assert!(matches!(
            ApiError::from(AuthError::Transport("connection refused".to_string())),
            ApiError::BadGateway(_)
        ));
    }

    #[tokio::test]
    async fn test_error_response_conversion() {
        let response = ApiError::NotConnected.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = ApiError::ReauthorizationRequired("gone".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = ApiError::ValidationError("Missing code".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::BadGateway("timeout".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = ApiError::Internal(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_upstream_api_error_passes_status_through() {
        for (status, expected) in [
            (400, StatusCode::BAD_REQUEST),
            (403, StatusCode::FORBIDDEN),
            (404, StatusCode::NOT_FOUND),
            (429, StatusCode::TOO_MANY_REQUESTS),
            (503, StatusCode::SERVICE_UNAVAILABLE),
        ] {
            let response = ApiError::UpstreamApi {
                status,
                message: "upstream".to_string(),
            }
            .into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn test_upstream_api_error_invalid_status() {
        let err = ApiError::UpstreamApi {
            status: 1000,
            message: "Unknown error".to_string(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
