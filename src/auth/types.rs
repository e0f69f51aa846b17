// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Environment;
use crate::error::AuthError;

/// OAuth scope requested for the accounting API
pub const ACCOUNTING_SCOPE: &str = "com.intuit.quickbooks.accounting";

/// Token lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Complete credential set for the single QuickBooks connection
///
/// `access_token` and `tenant_id` are written together by the code exchange,
/// so "authenticated" is always the conjunction of both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialSet {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// QuickBooks company (realm) id
    pub tenant_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialSet {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some() && self.tenant_id.is_some()
    }

    /// Missing expiry counts as expired
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(exp) => now >= exp,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Apply a refresh grant: the refresh token is only replaced when the
    /// token endpoint issued a new one.
    pub fn apply_refresh(&mut self, grant: TokenGrant) {
        self.access_token = Some(grant.access_token);
        if let Some(refresh_token) = grant.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        self.expires_at = Some(grant.expires_at);
    }
}

/// Token data from a successful grant
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Convert into a grant issued at `issued_at`
    ///
    /// Fails with `InvalidResponse` when `expires_in` does not fit a timestamp.
    pub fn into_grant(
        self,
        issued_at: DateTime<Utc>,
        margin_secs: i64,
    ) -> Result<TokenGrant, AuthError> {
        let ttl = self.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let expires_at = Duration::try_seconds(effective_lifetime(ttl, margin_secs))
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .ok_or_else(|| AuthError::InvalidResponse(format!("expires_in out of range: {}", ttl)))?;

        Ok(TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        })
    }
}

/// Lifetime after subtracting the safety margin.
///
/// The margin never eats more than half of the reported TTL, so a provider
/// reporting a very short lifetime still yields a usable token.
pub fn effective_lifetime(ttl_secs: i64, margin_secs: i64) -> i64 {
    let ttl = ttl_secs.max(0);
    let margin = margin_secs.max(0).min(ttl / 2);
    ttl - margin
}

/// OAuth client registration used for authorize and token requests
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorize_url: reqwest::Url,
    pub token_url: String,
    /// Seconds subtracted from the reported token lifetime
    pub expiry_margin_secs: i64,
}

/// Read-only view of the connection consumed by the route layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(rename = "realm_id")]
    pub tenant_id: Option<String>,
    pub environment: Environment,
    pub token_expired: bool,
}
