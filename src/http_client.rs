use anyhow::{Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthManager;
use crate::error::UpstreamError;

/// Authenticated HTTP client for the QuickBooks accounting API
///
/// Every call checks token expiry up front and refreshes if needed. A 401
/// from QuickBooks triggers one unconditional refresh and one retry, bounded
/// by `max_auth_retries`.
pub struct QuickBooksClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Authentication manager
    auth_manager: Arc<AuthManager>,

    /// Accounting API base URL (no trailing slash)
    base_url: String,

    /// Refresh-and-retry attempts allowed after a 401
    max_auth_retries: u32,
}

impl QuickBooksClient {
    /// Create a new client
    pub fn new(
        auth_manager: Arc<AuthManager>,
        base_url: &str,
        connect_timeout: u64,
        request_timeout: u64,
        max_auth_retries: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            auth_manager,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_auth_retries,
        })
    }

    pub fn auth_manager(&self) -> &Arc<AuthManager> {
        &self.auth_manager
    }

    /// Execute an authenticated call and return the parsed JSON body
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<Value, UpstreamError> {
        let mut creds = self.auth_manager.snapshot().await;
        if !creds.is_authenticated() {
            return Err(UpstreamError::Unauthenticated);
        }

        // Proactive refresh
        if creds.is_expired() && creds.refresh_token.is_some() {
            tracing::debug!("Access token expired, refreshing before request");
            creds = self
                .auth_manager
                .refresh_if_expired()
                .await
                .map_err(UpstreamError::AuthRefreshFailed)?;
        }

        let url = format!("{}{}", self.base_url, path);
        let mut token = creds.access_token.ok_or(UpstreamError::Unauthenticated)?;
        let mut attempt = 0;

        tracing::debug!(method = %method, url = %url, "Sending QuickBooks request");

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .header("Accept", "application/json");
            if let Some(body) = body {
                request = request.json(body);
            }
            if !query.is_empty() {
                request = request.query(query);
            }

            let response = request.send().await.map_err(|e| {
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else {
                    "request_error"
                };
                tracing::warn!(
                    error_kind = error_kind,
                    error = %e,
                    url = %url,
                    "QuickBooks request error"
                );
                UpstreamError::Transport(e)
            })?;

            let status = response.status();
            tracing::debug!(status = %status, attempt = attempt + 1, "Received QuickBooks response");

            // Reactive refresh
            if status == StatusCode::UNAUTHORIZED && attempt < self.max_auth_retries {
                tracing::warn!("Received 401, refreshing token and retrying...");

                let refreshed = self
                    .auth_manager
                    .refresh_rejected(&token)
                    .await
                    .map_err(|e| {
                        tracing::error!("Token refresh failed: {}", e);
                        UpstreamError::AuthRefreshFailed(e)
                    })?;
                token = refreshed
                    .access_token
                    .ok_or(UpstreamError::Unauthenticated)?;

                attempt += 1;
                continue;
            }

            let text = response.text().await?;

            if status.as_u16() >= 400 {
                tracing::error!(
                    status = status.as_u16(),
                    url = %url,
                    response_body = %text,
                    attempt = attempt + 1,
                    "QuickBooks API error"
                );
                return Err(UpstreamError::ApiError {
                    status: status.as_u16(),
                    body: text,
                });
            }

            if text.trim().is_empty() {
                return Ok(Value::Null);
            }

            return serde_json::from_str(&text)
                .map_err(|e| UpstreamError::InvalidResponse(e.to_string()));
        }
    }
}
