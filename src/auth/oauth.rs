// OAuth 2.0 grants against the Intuit token endpoint

use chrono::Utc;
use reqwest::{Client, Url};

use super::types::{OAuthClient, TokenGrant, TokenResponse, ACCOUNTING_SCOPE};
use crate::error::AuthError;

/// Build the authorization URL the user is redirected to
pub fn authorization_url(oauth: &OAuthClient, state: &str) -> Url {
    let mut url = oauth.authorize_url.clone();
    url.query_pairs_mut()
        .append_pair("client_id", &oauth.client_id)
        .append_pair("scope", ACCOUNTING_SCOPE)
        .append_pair("redirect_uri", &oauth.redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("state", state);
    url
}

/// Which grant a token request performs
#[derive(Debug, Clone, Copy)]
enum GrantKind {
    AuthorizationCode,
    RefreshToken,
}

impl GrantKind {
    fn rejected(self, status: u16, body: String) -> AuthError {
        match self {
            GrantKind::AuthorizationCode => AuthError::ExchangeFailed { status, body },
            GrantKind::RefreshToken => AuthError::RefreshFailed { status, body },
        }
    }
}

/// Exchange an authorization code for tokens
pub async fn exchange_code(
    client: &Client,
    oauth: &OAuthClient,
    code: &str,
) -> Result<TokenGrant, AuthError> {
    tracing::info!("Exchanging authorization code for QuickBooks tokens...");

    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", oauth.redirect_uri.as_str()),
    ];

    request_grant(client, oauth, GrantKind::AuthorizationCode, &form).await
}

/// Mint a new access token from a refresh token
pub async fn refresh_token(
    client: &Client,
    oauth: &OAuthClient,
    refresh_token: &str,
) -> Result<TokenGrant, AuthError> {
    tracing::info!("Refreshing QuickBooks access token...");

    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ];

    request_grant(client, oauth, GrantKind::RefreshToken, &form).await
}

async fn request_grant(
    client: &Client,
    oauth: &OAuthClient,
    kind: GrantKind,
    form: &[(&str, &str)],
) -> Result<TokenGrant, AuthError> {
    let issued_at = Utc::now();

    let response = client
        .post(&oauth.token_url)
        .basic_auth(&oauth.client_id, Some(&oauth.client_secret))
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(grant = ?kind, error = %e, "Token endpoint request failed");
            AuthError::Transport(e.to_string())
        })?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            grant = ?kind,
            status = status.as_u16(),
            body = %error_text,
            "Token endpoint rejected grant"
        );
        return Err(kind.rejected(status.as_u16(), error_text));
    }

    let data: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

    if data.access_token.is_empty() {
        return Err(AuthError::InvalidResponse(
            "token response does not contain access_token".to_string(),
        ));
    }

    let expires_in = data.expires_in;
    let grant = data.into_grant(issued_at, oauth.expiry_margin_secs)?;

    tracing::info!(
        grant = ?kind,
        expires_in = ?expires_in,
        rotated_refresh_token = grant.refresh_token.is_some(),
        "Token grant succeeded, expires: {}",
        grant.expires_at.to_rfc3339()
    );

    Ok(grant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mockito::Matcher;

    fn oauth_client(token_url: String) -> OAuthClient {
        OAuthClient {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "http://localhost:8000/callback".to_string(),
            authorize_url: Url::parse("https://appcenter.intuit.com/connect/oauth2").unwrap(),
            token_url,
            expiry_margin_secs: 60,
        }
    }

    // base64("client-id:client-secret")
    const BASIC_AUTH: &str = "Basic Y2xpZW50LWlkOmNsaWVudC1zZWNyZXQ=";

    #[test]
    fn test_authorization_url_parameters() {
        let oauth = oauth_client("http://unused".to_string());
        let url = authorization_url(&oauth, "csrf-123");

        assert_eq!(url.host_str(), Some("appcenter.intuit.com"));
        assert_eq!(url.path(), "/connect/oauth2");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("client_id".to_string(), "client-id".to_string()),
                ("scope".to_string(), ACCOUNTING_SCOPE.to_string()),
                (
                    "redirect_uri".to_string(),
                    "http://localhost:8000/callback".to_string()
                ),
                ("response_type".to_string(), "code".to_string()),
                ("state".to_string(), "csrf-123".to_string()),
            ]
        );
    }

    #[test]
    fn test_authorization_url_is_deterministic() {
        let oauth = oauth_client("http://unused".to_string());
        assert_eq!(
            authorization_url(&oauth, "s"),
            authorization_url(&oauth, "s")
        );
    }

    #[tokio::test]
    async fn test_exchange_code_sends_basic_auth_and_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("authorization", BASIC_AUTH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "abc".into()),
                Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "http://localhost:8000/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"AT1","refresh_token":"RT1","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let oauth = oauth_client(format!("{}/token", server.url()));
        let before = Utc::now();
        let grant = exchange_code(&Client::new(), &oauth, "abc").await.unwrap();
        let after = Utc::now();

        assert_eq!(grant.access_token, "AT1");
        assert_eq!(grant.refresh_token.as_deref(), Some("RT1"));
        assert!(grant.expires_at >= before + Duration::seconds(3540));
        assert!(grant.expires_at <= after + Duration::seconds(3540));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_failure_carries_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let oauth = oauth_client(format!("{}/token", server.url()));
        let err = exchange_code(&Client::new(), &oauth, "bad").await.unwrap_err();

        assert_eq!(
            err,
            AuthError::ExchangeFailed {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_refresh_sends_refresh_grant() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("authorization", BASIC_AUTH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "RT1".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"AT2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let oauth = oauth_client(format!("{}/token", server.url()));
        let grant = refresh_token(&Client::new(), &oauth, "RT1").await.unwrap();

        assert_eq!(grant.access_token, "AT2");
        assert!(grant.refresh_token.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_carries_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(401)
            .with_body("invalid_client")
            .create_async()
            .await;

        let oauth = oauth_client(format!("{}/token", server.url()));
        let err = refresh_token(&Client::new(), &oauth, "RT1").await.unwrap_err();

        assert_eq!(
            err,
            AuthError::RefreshFailed {
                status: 401,
                body: "invalid_client".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_non_json_success_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let oauth = oauth_client(format!("{}/token", server.url()));
        let err = refresh_token(&Client::new(), &oauth, "RT1").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }
}
