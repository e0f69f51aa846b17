use anyhow::{Context, Result};
use reqwest::{Client, Url};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::oauth;
use super::store::TokenStore;
use super::types::{ConnectionStatus, CredentialSet, OAuthClient, TokenGrant};
use crate::config::{Config, Environment};
use crate::error::AuthError;

/// Authentication manager
///
/// Owns the single credential set of the process. All writes go through
/// `exchange_code`, `refresh` and `disconnect`. Token grants are serialized
/// behind `grant_lock`, so concurrent requests that observe the same expired
/// token cause one refresh round trip, not one each.
pub struct AuthManager {
    /// Current credentials
    credentials: RwLock<CredentialSet>,

    /// Held for the duration of every token endpoint round trip
    grant_lock: Mutex<()>,

    /// OAuth client registration
    oauth: OAuthClient,

    /// Durable token storage
    store: Arc<dyn TokenStore>,

    /// HTTP client for token requests
    client: Client,

    environment: Environment,
}

impl AuthManager {
    /// Create a manager, hydrating credentials from the store
    pub fn new(
        oauth: OAuthClient,
        environment: Environment,
        store: Arc<dyn TokenStore>,
        client: Client,
    ) -> Self {
        let credentials = store.load().unwrap_or_default();

        if credentials.is_authenticated() {
            tracing::info!(
                realm_id = credentials.tenant_id.as_deref().unwrap_or("-"),
                expired = credentials.is_expired(),
                "Restored QuickBooks connection"
            );
        }

        Self {
            credentials: RwLock::new(credentials),
            grant_lock: Mutex::new(()),
            oauth,
            store,
            client,
            environment,
        }
    }

    /// Create a manager from configuration
    pub fn from_config(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.http_connect_timeout))
            .timeout(std::time::Duration::from_secs(config.http_request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let authorize_url = Url::parse(&config.auth_url)
            .with_context(|| format!("Invalid QUICKBOOKS_AUTH_URL: {}", config.auth_url))?;

        let oauth = OAuthClient {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            authorize_url,
            token_url: config.token_url.clone(),
            expiry_margin_secs: config.token_expiry_margin,
        };

        Ok(Self::new(oauth, config.environment, store, client))
    }

    /// Authorization URL for the given anti-CSRF state
    pub fn authorization_url(&self, state: &str) -> Url {
        oauth::authorization_url(&self.oauth, state)
    }

    /// Exchange an authorization code, replacing any previous connection
    pub async fn exchange_code(
        &self,
        code: &str,
        tenant_id: &str,
    ) -> Result<CredentialSet, AuthError> {
        let _guard = self.grant_lock.lock().await;

        let grant = oauth::exchange_code(&self.client, &self.oauth, code).await?;

        let credentials = CredentialSet {
            access_token: Some(grant.access_token),
            refresh_token: grant.refresh_token,
            tenant_id: Some(tenant_id.to_string()),
            expires_at: Some(grant.expires_at),
        };

        *self.credentials.write().await = credentials.clone();
        self.persist(&credentials);

        tracing::info!(realm_id = tenant_id, "Connected to QuickBooks");
        Ok(credentials)
    }

    /// Refresh the access token unconditionally
    pub async fn refresh(&self) -> Result<CredentialSet, AuthError> {
        let _guard = self.grant_lock.lock().await;
        self.refresh_locked().await
    }

    /// Refresh only if the token is still expired once the grant lock is held
    pub async fn refresh_if_expired(&self) -> Result<CredentialSet, AuthError> {
        let _guard = self.grant_lock.lock().await;

        let current = self.snapshot().await;
        if !current.is_expired() {
            tracing::debug!("Token already refreshed by a concurrent request");
            return Ok(current);
        }

        self.refresh_locked().await
    }

    /// Refresh after `rejected_token` was refused upstream, unless another
    /// request already replaced it while we waited for the grant lock
    pub async fn refresh_rejected(
        &self,
        rejected_token: &str,
    ) -> Result<CredentialSet, AuthError> {
        let _guard = self.grant_lock.lock().await;

        let current = self.snapshot().await;
        if current.access_token.as_deref().is_some_and(|t| t != rejected_token) {
            tracing::debug!("Rejected token already replaced by a concurrent request");
            return Ok(current);
        }

        self.refresh_locked().await
    }

    /// Caller must hold `grant_lock`
    async fn refresh_locked(&self) -> Result<CredentialSet, AuthError> {
        let refresh_token = self
            .credentials
            .read()
            .await
            .refresh_token
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;

        let grant: TokenGrant =
            oauth::refresh_token(&self.client, &self.oauth, &refresh_token).await?;

        let updated = {
            let mut creds = self.credentials.write().await;
            creds.apply_refresh(grant);
            creds.clone()
        };
        self.persist(&updated);

        Ok(updated)
    }

    /// Forget the connection and remove the stored record
    pub async fn disconnect(&self) {
        let _guard = self.grant_lock.lock().await;

        *self.credentials.write().await = CredentialSet::default();

        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "Failed to remove stored tokens");
        }

        tracing::info!("Disconnected from QuickBooks");
    }

    /// Persistence failures never fail the in-memory operation
    fn persist(&self, credentials: &CredentialSet) {
        if let Err(e) = self.store.save(credentials) {
            tracing::error!(
                error = %e,
                "Failed to persist tokens, continuing with in-memory credentials"
            );
        }
    }

    /// Copy of the current credentials
    pub async fn snapshot(&self) -> CredentialSet {
        self.credentials.read().await.clone()
    }

    /// Connection state for the route layer
    pub async fn status(&self) -> ConnectionStatus {
        let creds = self.credentials.read().await;
        ConnectionStatus {
            connected: creds.is_authenticated(),
            tenant_id: creds.tenant_id.clone(),
            environment: self.environment,
            token_expired: creds.is_expired(),
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.credentials.read().await.is_authenticated()
    }

    pub async fn tenant_id(&self) -> Option<String> {
        self.credentials.read().await.tenant_id.clone()
    }
}
