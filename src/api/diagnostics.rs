//! Operator diagnostics
//!
//! Mounted under `/auth` only when `diagnostics.enabled` is set. Upstream
//! failures are reported in the body as `{"status": "error", ...}` rather
//! than as an error status.

use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::AppError;
use crate::service::{Connection, ManagementError};

/// Keys the discovery document must carry
const REQUIRED_DISCOVERY_KEYS: [&str; 4] = [
    "authorization_endpoint",
    "token_endpoint",
    "userinfo_endpoint",
    "jwks_uri",
];

/// Create diagnostics router
///
/// Routes (nested under `/auth`):
/// - GET /debug
/// - GET /debug/connections
/// - GET /debug/github
/// - GET /debug/github-detailed
/// - GET /debug/connection-names
pub fn diagnostics_router() -> Router<AppState> {
    Router::new()
        .route("/debug", get(debug_provider))
        .route("/debug/connections", get(debug_connections))
        .route("/debug/github", get(debug_github))
        .route("/debug/github-detailed", get(debug_github_detailed))
        .route("/debug/connection-names", get(debug_connection_names))
}

fn error_body(error: impl std::fmt::Display) -> Json<Value> {
    tracing::error!(%error, "Diagnostics check failed");
    Json(json!({
        "status": "error",
        "message": error.to_string(),
    }))
}

fn management_error(error: ManagementError) -> Json<Value> {
    error_body(AppError::from(error))
}

/// GET /auth/debug
async fn debug_provider(State(state): State<AppState>) -> Json<Value> {
    let domain = state.config.provider.domain.clone();

    let document = match state.management.discovery().await {
        Ok(document) => document,
        Err(error) => {
            tracing::error!(%error, "Discovery check failed");
            return Json(json!({
                "status": "error",
                "message": format!("Error checking provider configuration: {error}"),
                "domain": domain,
            }));
        }
    };

    let missing: Vec<&str> = REQUIRED_DISCOVERY_KEYS
        .iter()
        .copied()
        .filter(|key| !document.contains_key(*key))
        .collect();

    if !missing.is_empty() {
        return Json(json!({
            "status": "warning",
            "message": format!(
                "Some required keys are missing from OpenID configuration: {}",
                missing.join(", ")
            ),
            "missing_keys": missing,
            "domain": domain,
            "config": document,
        }));
    }

    let config: serde_json::Map<String, Value> = REQUIRED_DISCOVERY_KEYS
        .iter()
        .map(|key| (key.to_string(), document[*key].clone()))
        .collect();

    Json(json!({
        "status": "ok",
        "message": "OpenID configuration is valid",
        "domain": domain,
        "config": config,
        "oauth_client": {
            "authorize_url": state.provider.authorize_url(),
            "access_token_url": state.provider.token_url(),
            "api_base_url": state.provider.endpoint_base(),
        },
    }))
}

/// GET /auth/debug/connections
///
/// Social connections only.
async fn debug_connections(State(state): State<AppState>) -> Json<Value> {
    let connections = match state.management.connections().await {
        Ok(connections) => connections,
        Err(error) => return management_error(error),
    };

    let social: Vec<Value> = connections
        .iter()
        .filter(|connection| matches!(connection.strategy.as_str(), "github" | "google-oauth2"))
        .map(|connection| {
            json!({
                "name": connection.name,
                "strategy": connection.strategy,
                "enabled_clients": connection.enabled_clients,
                "status": if connection.enabled_clients.is_empty() { "Disabled" } else { "Enabled" },
            })
        })
        .collect();

    Json(json!({
        "status": "success",
        "connections": social,
        "client_id": state.management.client_id(),
    }))
}

fn connection_summary(connection: &Connection, client_id: &str) -> serde_json::Map<String, Value> {
    let mut summary = serde_json::Map::new();
    summary.insert("name".to_string(), json!(connection.name));
    summary.insert("strategy".to_string(), json!(connection.strategy));
    summary.insert(
        "enabled_clients".to_string(),
        json!(connection.enabled_clients),
    );
    summary.insert(
        "is_enabled_for_this_app".to_string(),
        json!(connection.is_enabled_for(client_id)),
    );
    summary
}

/// GET /auth/debug/github
async fn debug_github(State(state): State<AppState>) -> Json<Value> {
    match state.management.github_connection().await {
        Ok(Some(connection)) => Json(json!({
            "status": "success",
            "connection": connection_summary(&connection, state.management.client_id()),
        })),
        Ok(None) => Json(json!({
            "status": "error",
            "message": "GitHub connection not found",
        })),
        Err(error) => management_error(error),
    }
}

/// GET /auth/debug/github-detailed
async fn debug_github_detailed(State(state): State<AppState>) -> Json<Value> {
    let connections = match state.management.connections().await {
        Ok(connections) => connections,
        Err(error) => return management_error(error),
    };
    let names: Vec<&str> = connections
        .iter()
        .map(|connection| connection.name.as_str())
        .collect();

    let Some(github) = connections
        .iter()
        .find(|connection| connection.strategy == "github")
    else {
        return Json(json!({
            "status": "error",
            "message": "GitHub connection not found",
            "available_connections": names,
        }));
    };

    let details = match state.management.connection(&github.id).await {
        Ok(details) => details,
        Err(error) => return management_error(error),
    };

    let client_id = state.management.client_id();
    let mut connection = connection_summary(github, client_id);
    connection.insert(
        "display_name".to_string(),
        details.get("display_name").cloned().unwrap_or(Value::Null),
    );
    connection.insert(
        "options".to_string(),
        details.get("options").cloned().unwrap_or_else(|| json!({})),
    );
    connection.insert("available_connections".to_string(), json!(names));

    Json(json!({
        "status": "success",
        "connection": connection,
        "your_client_id": client_id,
    }))
}

/// GET /auth/debug/connection-names
async fn debug_connection_names(State(state): State<AppState>) -> Json<Value> {
    let connections = match state.management.connections().await {
        Ok(connections) => connections,
        Err(error) => return management_error(error),
    };

    let client_id = state.management.client_id();
    let listed: Vec<_> = connections
        .iter()
        .map(|connection| connection_summary(connection, client_id))
        .collect();

    Json(json!({
        "status": "success",
        "connections": listed,
        "your_client_id": client_id,
    }))
}
