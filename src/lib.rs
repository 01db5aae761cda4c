//! Gatehouse - a thin authentication gateway in front of an OpenID Connect
//! identity provider
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Login / callback / profile / logout                      │
//! │  - Protected resources, GitHub push                         │
//! │  - Operator diagnostics, metrics                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Auth / Service Layer                       │
//! │  - Provider client (oauth2), callback reconciliation        │
//! │  - Signed cookie sessions                                   │
//! │  - GitHub contents API, provider management API             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers outside the login flow
//! - `auth`: Provider client, sessions, session guard, login routes
//! - `service`: Outbound GitHub and management API clients
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod service;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Value, json};

/// Application state shared across all handlers
///
/// This struct is cloned for each request; everything inside is shared.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Identity provider client
    pub provider: Arc<auth::ProviderClient>,

    /// Signed cookie sessions
    pub sessions: Arc<auth::SessionStore>,

    /// Provider management API
    pub management: Arc<service::ManagementClient>,

    /// GitHub contents API
    pub github: Arc<service::GitHubClient>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Build the provider client
    /// 2. Build the session store (cookie security from the public URL)
    /// 3. Build the outbound HTTP client and the GitHub client
    ///
    /// # Errors
    /// Returns error if any endpoint or client cannot be built
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let provider = Arc::new(auth::ProviderClient::new(&config)?);
        tracing::info!(endpoint = %provider.endpoint_base(), "Provider client initialized");

        let secure_cookies = config.should_use_secure_cookies();
        let sessions = auth::SessionStore::new(&config.auth, secure_cookies);

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("Gatehouse/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;
        let github = service::GitHubClient::new(http_client, &config.github.api_base_url);

        tracing::info!(
            secure_cookies,
            diagnostics = config.diagnostics.enabled,
            "Application state initialized successfully"
        );

        Ok(Self {
            management: Arc::new(service::ManagementClient::new(provider.clone())),
            provider,
            sessions: Arc::new(sessions),
            github: Arc::new(github),
            config: Arc::new(config),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> Router {
    use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config);

    let mut auth_routes = auth::auth_router();
    if state.config.diagnostics.enabled {
        auth_routes = auth_routes.merge(api::diagnostics_router());
    }

    let metrics_routes = api::metrics_router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_auth,
    ));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/auth", auth_routes)
        .nest("/api", api::protected_router())
        .nest("/github", api::github_router())
        .merge(metrics_routes)
        .layer(middleware::from_fn(api::track_http))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

fn build_cors_layer(config: &config::AppConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    let allowed_origin = config.server.base_url();
    if !allowed_origin.starts_with("https://") {
        return CorsLayer::permissive();
    }

    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from public URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(%detail, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": format!("Unhandled error: {detail}"),
            "type": "internal",
        })),
    )
        .into_response()
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Welcome to the Gatehouse authentication gateway",
        "auth_routes": {
            "login_page": "/auth/login",
            "login_with_auth0": "/auth/login/auth0",
            "login_with_google": "/auth/login/google",
            "login_with_github": "/auth/login/github",
            "user_profile": "/auth/profile",
            "logout": "/auth/logout",
        },
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "message": "Service is up and running",
    }))
}
