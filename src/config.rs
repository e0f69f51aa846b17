use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

/// Largest MAXRESULTS value QuickBooks accepts on a query
pub const QUERY_MAX_RESULTS_LIMIT: u32 = 1000;

/// QuickBooks Online Gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "8000")]
    pub port: u16,

    /// Optional API key protecting the /api routes
    #[arg(short = 'k', long, env = "PROXY_API_KEY")]
    pub api_key: Option<String>,

    /// Intuit app client id
    #[arg(long, env = "QUICKBOOKS_CLIENT_ID", default_value = "")]
    pub client_id: String,

    /// Intuit app client secret
    #[arg(long, env = "QUICKBOOKS_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    pub client_secret: String,

    /// OAuth redirect URI registered with the Intuit app
    #[arg(
        long,
        env = "QUICKBOOKS_REDIRECT_URI",
        default_value = "http://localhost:8000/callback"
    )]
    pub redirect_uri: String,

    /// QuickBooks environment (sandbox, production)
    #[arg(short = 'e', long, env = "QUICKBOOKS_ENVIRONMENT", default_value = "sandbox")]
    pub environment: String,

    /// Path of the token file
    #[arg(short = 't', long, env = "TOKEN_FILE", default_value = "quickbooks_tokens.json")]
    pub token_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Retries after a 401 from the QuickBooks API
    #[arg(long, env = "HTTP_MAX_AUTH_RETRIES", default_value = "1")]
    pub http_auth_retries: u32,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Gateway authentication
    pub proxy_api_key: Option<String>,

    // QuickBooks OAuth
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub environment: Environment,
    pub auth_url: String,
    pub token_url: String,

    // QuickBooks API
    pub sandbox_api_url: String,
    pub production_api_url: String,
    pub query_max_results: u32,

    // Tokens
    pub token_file: PathBuf,
    pub token_expiry_margin: i64,
    pub oauth_state_ttl: i64,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub http_max_auth_retries: u32,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Sandbox => write!(f, "sandbox"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();

        let config = Config {
            server_host: args.host,
            server_port: args.port,

            proxy_api_key: args.api_key.filter(|k| !k.is_empty()),

            client_id: args.client_id,
            client_secret: args.client_secret,
            redirect_uri: args.redirect_uri,
            environment: parse_environment(&args.environment),

            auth_url: std::env::var("QUICKBOOKS_AUTH_URL")
                .unwrap_or_else(|_| "https://appcenter.intuit.com/connect/oauth2".to_string()),

            token_url: std::env::var("QUICKBOOKS_TOKEN_URL").unwrap_or_else(|_| {
                "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer".to_string()
            }),

            sandbox_api_url: std::env::var("QUICKBOOKS_SANDBOX_API")
                .unwrap_or_else(|_| "https://sandbox-quickbooks.api.intuit.com".to_string()),

            production_api_url: std::env::var("QUICKBOOKS_PRODUCTION_API")
                .unwrap_or_else(|_| "https://quickbooks.api.intuit.com".to_string()),

            query_max_results: std::env::var("QUERY_MAX_RESULTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),

            token_file: expand_tilde(&args.token_file),

            token_expiry_margin: std::env::var("TOKEN_EXPIRY_MARGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),

            oauth_state_ttl: std::env::var("OAUTH_STATE_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(600),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            http_max_auth_retries: args.http_auth_retries,

            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            anyhow::bail!("QUICKBOOKS_CLIENT_ID is required (use --client-id or set the env var)");
        }

        if self.client_secret.trim().is_empty() {
            anyhow::bail!("QUICKBOOKS_CLIENT_SECRET is required");
        }

        reqwest::Url::parse(&self.redirect_uri)
            .with_context(|| format!("Invalid QUICKBOOKS_REDIRECT_URI: {}", self.redirect_uri))?;

        reqwest::Url::parse(&self.api_base_url())
            .with_context(|| format!("Invalid QuickBooks API URL: {}", self.api_base_url()))?;

        if self.query_max_results == 0 || self.query_max_results > QUERY_MAX_RESULTS_LIMIT {
            anyhow::bail!(
                "QUERY_MAX_RESULTS must be between 1 and {}, got {}",
                QUERY_MAX_RESULTS_LIMIT,
                self.query_max_results
            );
        }

        Ok(())
    }

    /// Accounting API base URL for the configured environment
    pub fn api_base_url(&self) -> &str {
        match self.environment {
            Environment::Production => &self.production_api_url,
            Environment::Sandbox => &self.sandbox_api_url,
        }
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Anything other than "production" selects the sandbox
fn parse_environment(s: &str) -> Environment {
    match s.trim().to_lowercase().as_str() {
        "production" => Environment::Production,
        _ => Environment::Sandbox,
    }
}

fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}
