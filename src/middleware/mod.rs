// Authentication and CORS middleware

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use tower_http::cors::{Any, CorsLayer};

use crate::error::ApiError;
use crate::routes::AppState;

/// API key middleware
///
/// When `PROXY_API_KEY` is configured, requests must carry it as
/// "Bearer {PROXY_API_KEY}" in Authorization or as x-api-key.
/// Without a configured key every request passes.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected_key) = state.config.proxy_api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    if let Some(auth_str) = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
    {
        if auth_str.strip_prefix("Bearer ") == Some(expected_key) {
            return Ok(next.run(request).await);
        }
    }

    if let Some(key_str) = request
        .headers()
        .get("x-api-key")
        .and_then(|h| h.to_str().ok())
    {
        if key_str == expected_key {
            return Ok(next.run(request).await);
        }
    }

    let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
    tracing::warn!(
        "[{}] Access attempt with invalid or missing API key: {} {}",
        request_id,
        request.method(),
        request.uri().path()
    );
    Err(ApiError::AuthError("Invalid or missing API Key".to_string()))
}

/// Create CORS middleware layer
///
/// Allows all origins, methods, and headers.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::tests::create_test_state;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::get,
        Router,
    };
    use tower::util::ServiceExt;

    async fn test_handler() -> &'static str {
        "OK"
    }

    fn create_test_app(state: AppState) -> Router {
        Router::new()
            .route("/test", get(test_handler))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ))
            .with_state(state)
    }

    fn keyed_app() -> Router {
        create_test_app(create_test_state(Some("test-key-123")))
    }

    async fn status_for(app: Router, header: Option<(&str, &str)>) -> StatusCode {
        let mut builder = Request::builder().uri("/test");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.status()
    }

    #[tokio::test]
    async fn test_valid_bearer_token() {
        let status = status_for(keyed_app(), Some(("authorization", "Bearer test-key-123"))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_valid_x_api_key() {
        let status = status_for(keyed_app(), Some(("x-api-key", "test-key-123"))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let status = status_for(keyed_app(), Some(("authorization", "Bearer wrong-key"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let status = status_for(keyed_app(), Some(("x-api-key", "wrong-key"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Key without the Bearer prefix is not accepted in Authorization
        let status = status_for(keyed_app(), Some(("authorization", "test-key-123"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let status = status_for(keyed_app(), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_no_configured_key_passes_through() {
        let app = create_test_app(create_test_state(None));
        let status = status_for(app, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_cors_layer_creation() {
        let _layer = cors_layer();
    }
}
