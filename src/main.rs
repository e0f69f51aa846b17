use anyhow::Result;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use qbo_gateway::{
    auth::{self, AuthManager, FileTokenStore, PendingStates},
    config::{self, LogFormat},
    http_client::QuickBooksClient,
    middleware,
    routes::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = config::Config::load()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .init(),
    }

    config.validate()?;

    tracing::info!("QuickBooks gateway starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    // Token persistence and authentication
    tracing::info!("Loading tokens from {}", config.token_file.display());
    let store: Arc<dyn auth::TokenStore> = Arc::new(FileTokenStore::new(config.token_file.clone()));
    let auth_manager = Arc::new(AuthManager::from_config(&config, store)?);

    let status = auth_manager.status().await;
    if status.connected {
        tracing::info!(
            realm_id = status.tenant_id.as_deref().unwrap_or("-"),
            token_expired = status.token_expired,
            "QuickBooks connection available"
        );
    } else {
        tracing::warn!("Not connected to QuickBooks, visit /auth/connect to authorize");
    }

    let qb_client = Arc::new(QuickBooksClient::new(
        auth_manager.clone(),
        config.api_base_url(),
        config.http_connect_timeout,
        config.http_request_timeout,
        config.http_max_auth_retries,
    )?);
    tracing::info!(
        environment = %config.environment,
        base_url = config.api_base_url(),
        "QuickBooks client initialized"
    );

    let app_state = AppState {
        auth_manager,
        qb_client,
        pending_states: PendingStates::new(config.oauth_state_ttl),
        config: Arc::new(config.clone()),
    };

    let app = build_app(app_state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    print_startup_banner(&config);

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Build the application with all routes and middleware
fn build_app(state: AppState) -> axum::Router {
    use axum::Router;

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::oauth_routes(state.clone()))
        .merge(routes::api_routes(state))
        .layer(middleware::cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Print startup banner
fn print_startup_banner(config: &config::Config) {
    println!();
    println!("  QuickBooks Online Gateway");
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:      http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  Environment: {}", config.environment);
    println!("  Token file:  {}", config.token_file.display());
    println!(
        "  API key:     {}",
        if config.proxy_api_key.is_some() {
            "required"
        } else {
            "disabled"
        }
    );
    println!("  Log Level:   {}", config.log_level);
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
