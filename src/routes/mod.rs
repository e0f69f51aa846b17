use axum::{
    extract::{Path, Query, State},
    middleware::{self as axum_middleware},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::auth::{AuthManager, ConnectionStatus, PendingStates};
use crate::config::Config;
use crate::error::ApiError;
use crate::http_client::QuickBooksClient;
use crate::middleware;
use crate::resources::{self, Entity};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth_manager: Arc<AuthManager>,
    pub qb_client: Arc<QuickBooksClient>,
    pub pending_states: PendingStates,
    pub config: Arc<Config>,
}

/// Query parameters for list endpoints
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
}

/// Query parameters Intuit appends to the redirect URI
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    #[serde(rename = "realmId")]
    pub realm_id: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Health check routes (no authentication required)
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// OAuth connect/callback routes
pub fn oauth_routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/disconnect", post(disconnect_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/auth/connect", get(connect_handler))
        .route("/auth/url", get(authorization_url_handler))
        .route("/callback", get(callback_handler))
        .merge(protected)
        .with_state(state)
}

/// QuickBooks resource routes (API key required when configured)
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/company", get(company_handler))
        .route(
            "/api/customers",
            get(list_customers_handler).post(create_customer_handler),
        )
        .route("/api/customers/:id", get(get_customer_handler))
        .route(
            "/api/invoices",
            get(list_invoices_handler).post(create_invoice_handler),
        )
        .route("/api/invoices/:id", get(get_invoice_handler))
        .route(
            "/api/payments",
            get(list_payments_handler).post(create_payment_handler),
        )
        .route("/api/accounts", get(list_accounts_handler))
        .route(
            "/api/vendors",
            get(list_vendors_handler).post(create_vendor_handler),
        )
        .route("/api/vendors/:id", get(get_vendor_handler))
        .route("/api/bills", get(list_bills_handler).post(create_bill_handler))
        .route("/api/bills/:id", get(get_bill_handler))
        .route(
            "/api/bill-payments",
            get(list_bill_payments_handler).post(create_bill_payment_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(state)
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "QuickBooks gateway is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "qbo-gateway",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

// ==================== OAuth ====================

/// GET /auth/connect - Redirect the browser to the Intuit consent page
async fn connect_handler(State(state): State<AppState>) -> Redirect {
    let csrf_state = state.pending_states.issue();
    let url = state.auth_manager.authorization_url(&csrf_state);
    tracing::info!("Redirecting to QuickBooks authorization");
    Redirect::temporary(url.as_str())
}

/// GET /auth/url - Authorization URL as JSON, for clients that redirect themselves
async fn authorization_url_handler(State(state): State<AppState>) -> Json<Value> {
    let csrf_state = state.pending_states.issue();
    let url = state.auth_manager.authorization_url(&csrf_state);
    Json(json!({
        "authorization_url": url.as_str(),
        "state": csrf_state,
    }))
}

/// GET /callback - Complete the authorization-code flow
async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<Value>, ApiError> {
    let state_valid = params
        .state
        .as_deref()
        .is_some_and(|s| state.pending_states.consume(s));

    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        tracing::warn!(error = %error, description = %description, "Authorization denied");
        return Err(ApiError::ValidationError(format!(
            "Authorization failed: {} {}",
            error, description
        )));
    }

    if params.state.is_none() {
        return Err(ApiError::ValidationError(
            "Missing state parameter".to_string(),
        ));
    }
    if !state_valid {
        tracing::warn!("Callback with unknown or expired OAuth state");
        return Err(ApiError::ValidationError(
            "Invalid or expired OAuth state".to_string(),
        ));
    }

    let code = params
        .code
        .ok_or_else(|| ApiError::ValidationError("Missing code parameter".to_string()))?;
    let realm_id = params
        .realm_id
        .ok_or_else(|| ApiError::ValidationError("Missing realmId parameter".to_string()))?;
    if !resources::is_entity_id(&realm_id) {
        return Err(ApiError::ValidationError(format!("Invalid realmId: {}", realm_id)));
    }

    state
        .auth_manager
        .exchange_code(&code, &realm_id)
        .await
        .inspect_err(|e| tracing::error!("Failed to complete QuickBooks connection: {}", e))?;

    Ok(Json(json!({
        "connected": true,
        "realm_id": realm_id,
    })))
}

/// POST /auth/disconnect - Forget the stored connection
async fn disconnect_handler(State(state): State<AppState>) -> Json<Value> {
    state.auth_manager.disconnect().await;
    Json(json!({ "connected": false }))
}

// ==================== Connection Status ====================

/// GET /api/status - Connection state
async fn status_handler(State(state): State<AppState>) -> Json<ConnectionStatus> {
    Json(state.auth_manager.status().await)
}

// ==================== Resources ====================

async fn require_connection(state: &AppState) -> Result<(), ApiError> {
    if state.auth_manager.is_authenticated().await {
        Ok(())
    } else {
        Err(ApiError::NotConnected)
    }
}

async fn list_entities(
    state: &AppState,
    entity: Entity,
    key: &str,
    params: ListParams,
) -> Result<Json<Value>, ApiError> {
    require_connection(state).await?;

    let limit = params.limit.unwrap_or(state.config.query_max_results);
    let items = state
        .qb_client
        .query(entity, limit)
        .await
        .inspect_err(|e| tracing::error!("Failed to list {}: {}", key, e))?;

    let count = items.len();
    let mut body = Map::new();
    body.insert(key.to_string(), Value::Array(items));
    body.insert("count".to_string(), json!(count));
    Ok(Json(Value::Object(body)))
}

async fn get_entity(state: &AppState, entity: Entity, id: &str) -> Result<Json<Value>, ApiError> {
    if !resources::is_entity_id(id) {
        return Err(ApiError::ValidationError(format!(
            "Invalid {} id: {}",
            entity.name(),
            id
        )));
    }
    require_connection(state).await?;

    let value = state.qb_client.get(entity, id).await.inspect_err(|e| {
        tracing::error!(id = %id, "Failed to get {}: {}", entity.name(), e)
    })?;
    Ok(Json(value))
}

async fn create_entity(
    state: &AppState,
    entity: Entity,
    body: Value,
) -> Result<Json<Value>, ApiError> {
    if !body.is_object() {
        return Err(ApiError::ValidationError(format!(
            "{} payload must be a JSON object",
            entity.name()
        )));
    }
    require_connection(state).await?;

    let created = state
        .qb_client
        .create(entity, &body)
        .await
        .inspect_err(|e| tracing::error!("Failed to create {}: {}", entity.name(), e))?;
    Ok(Json(created))
}

/// GET /api/company
async fn company_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    require_connection(&state).await?;
    let info = state
        .qb_client
        .company_info()
        .await
        .inspect_err(|e| tracing::error!("Failed to get company info: {}", e))?;
    Ok(Json(info))
}

async fn list_customers_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_entities(&state, Entity::Customer, "customers", params).await
}

async fn get_customer_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    get_entity(&state, Entity::Customer, &id).await
}

async fn create_customer_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    create_entity(&state, Entity::Customer, body).await
}

async fn list_invoices_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_entities(&state, Entity::Invoice, "invoices", params).await
}

async fn get_invoice_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    get_entity(&state, Entity::Invoice, &id).await
}

async fn create_invoice_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    create_entity(&state, Entity::Invoice, body).await
}

async fn list_payments_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_entities(&state, Entity::Payment, "payments", params).await
}

async fn create_payment_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    create_entity(&state, Entity::Payment, body).await
}

async fn list_accounts_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_entities(&state, Entity::Account, "accounts", params).await
}

async fn list_vendors_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_entities(&state, Entity::Vendor, "vendors", params).await
}

async fn get_vendor_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    get_entity(&state, Entity::Vendor, &id).await
}

async fn create_vendor_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    create_entity(&state, Entity::Vendor, body).await
}

async fn list_bills_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_entities(&state, Entity::Bill, "bills", params).await
}

async fn get_bill_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    get_entity(&state, Entity::Bill, &id).await
}

async fn create_bill_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    create_entity(&state, Entity::Bill, body).await
}

async fn list_bill_payments_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_entities(&state, Entity::BillPayment, "bill_payments", params).await
}

async fn create_bill_payment_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    create_entity(&state, Entity::BillPayment, body).await
}
