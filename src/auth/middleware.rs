//! Authentication middleware
//!
//! Protects routes that require a signed-in session.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, State},
    http::{Request, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use super::session::{SessionIdentity, SessionStore};
use crate::AppState;
use crate::error::AppError;

/// Read the identity from the session
///
/// Pure guard: never refreshes or re-derives the identity.
///
/// # Errors
/// `Unauthenticated` if no valid session carries an identity
pub fn require_session(jar: &CookieJar, sessions: &SessionStore) -> Result<SessionIdentity, AppError> {
    sessions.identity(jar).ok_or(AppError::Unauthenticated)
}

/// Middleware to require authentication
///
/// Adds the `SessionIdentity` to request extensions if valid.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/metrics", ...)
///     .route_layer(middleware::from_fn_with_state(state, require_auth));
/// ```
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let identity = require_session(&jar, &state.sessions)?;
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

/// Extractor for the current signed-in user
///
/// # Usage
/// ```ignore
/// async fn handler(
///     CurrentUser(identity): CurrentUser,
/// ) -> impl IntoResponse {
///     format!("Hello, {}", identity.subject_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub SessionIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<SessionIdentity>().cloned() {
            return Ok(CurrentUser(identity));
        }

        let state = AppState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let identity = require_session(&jar, &state.sessions)?;
        parts.extensions.insert(identity.clone());

        Ok(CurrentUser(identity))
    }
}
