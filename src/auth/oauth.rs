//! Login flow routes
//!
//! Implements the OAuth 2.0 authorization code flow against the identity
//! provider and the session lifecycle around it.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use serde::Serialize;

use super::middleware::CurrentUser;
use super::reconcile::{CallbackParams, reconcile};
use super::session::SessionIdentity;
use crate::AppState;
use crate::error::AppError;
use crate::metrics::LOGINS_TOTAL;

/// Where a successful login lands
const LANDING_PATH: &str = "/api/protected/data";

/// Create authentication router
///
/// Routes (nested under `/auth`):
/// - GET /login - Login page
/// - GET /login/:variant - Redirect to the provider
/// - GET /callback - OAuth callback
/// - GET /profile - Current identity
/// - GET /logout - Logout
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page))
        .route("/login/:variant", get(login_redirect))
        .route("/callback", get(callback))
        .route("/profile", get(profile))
        .route("/logout", get(logout))
}

// =============================================================================
// Login
// =============================================================================

/// GET /auth/login
async fn login_page() -> impl IntoResponse {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign in - Gatehouse</title></head>
<body>
    <h1>Gatehouse</h1>
    <p>Choose how to sign in</p>
    <ul>
        <li><a href="/auth/login/auth0">Sign in with username and password</a></li>
        <li><a href="/auth/login/google">Sign in with Google</a></li>
        <li><a href="/auth/login/github">Sign in with GitHub</a></li>
    </ul>
</body>
</html>
"#,
    )
}

/// GET /auth/login/:variant
///
/// Replaces any existing session with a pending login and redirects to the
/// provider, pinned to the upstream connection the variant names.
async fn login_redirect(
    State(state): State<AppState>,
    Path(variant): Path<String>,
    jar: CookieJar,
) -> Response {
    let connection = match variant.as_str() {
        "auth0" => None,
        "google" => Some("google-oauth2".to_string()),
        "github" => match github_connection(&state).await {
            Ok(name) => Some(name),
            // A login attempt ends whatever session came before it
            Err(error) => return (state.sessions.clear(jar), error).into_response(),
        },
        "github-alt1" => Some("github-oauth2".to_string()),
        _ => return AppError::NotFound.into_response(),
    };

    let (url, pending) = state.provider.begin_redirect(connection.as_deref());
    match state.sessions.start_login(jar.clone(), pending) {
        Ok(jar) => (jar, Redirect::to(url.as_str())).into_response(),
        Err(error) => (state.sessions.clear(jar), error).into_response(),
    }
}

async fn github_connection(state: &AppState) -> Result<String, AppError> {
    match &state.config.provider.github_connection {
        Some(name) if !name.trim().is_empty() => Ok(name.clone()),
        _ => state.management.resolve_github_connection().await,
    }
}

// =============================================================================
// Callback
// =============================================================================

/// GET /auth/callback
///
/// Any failure clears the session before the error is reported.
async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    tracing::info!("Received callback from identity provider");

    let pending = state
        .sessions
        .load(&jar)
        .and_then(|session| session.pending);

    let outcome = match reconcile(&state.provider, &params, pending.as_ref()).await {
        Ok(identity) => state
            .sessions
            .establish(jar.clone(), &identity)
            .map(|jar| (identity, jar)),
        Err(error) => Err(error),
    };

    match outcome {
        Ok((identity, jar)) => {
            LOGINS_TOTAL
                .with_label_values(&[identity.auth_type.as_str(), "success"])
                .inc();
            (jar, Redirect::to(LANDING_PATH)).into_response()
        }
        Err(error) => {
            LOGINS_TOTAL
                .with_label_values(&["unknown", error.kind()])
                .inc();
            tracing::warn!(%error, "Login callback failed");
            (state.sessions.clear(jar), error).into_response()
        }
    }
}

// =============================================================================
// Profile
// =============================================================================

/// Public view of the session identity
///
/// Never includes the GitHub access token.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub auth_type: &'static str,
}

impl From<&SessionIdentity> for UserProfile {
    fn from(identity: &SessionIdentity) -> Self {
        Self {
            id: identity.subject_id.clone(),
            email: identity.email.clone(),
            name: identity.display_name.clone(),
            picture: identity.avatar_url.clone(),
            auth_type: identity.auth_type.as_str(),
        }
    }
}

/// GET /auth/profile
async fn profile(CurrentUser(identity): CurrentUser) -> Json<UserProfile> {
    Json(UserProfile::from(&identity))
}

// =============================================================================
// Logout
// =============================================================================

/// GET /auth/logout
///
/// Clears the session cookie and redirects to the provider logout, which
/// ends the provider session and returns to the public URL.
async fn logout(State(state): State<AppState>, jar: CookieJar) -> Result<impl IntoResponse, AppError> {
    let logout_url = state.provider.logout_url()?;
    tracing::info!(%logout_url, "Logging out user");

    Ok((state.sessions.clear(jar), Redirect::to(logout_url.as_str())))
}
