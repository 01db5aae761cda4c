//! OpenID Connect authentication
//!
//! Handles:
//! - Provider redirect and code exchange
//! - Id token verification against the provider's signing keys
//! - Callback reconciliation into a session identity
//! - Signed cookie sessions
//! - Authentication middleware

mod jwks;
mod middleware;
mod oauth;
pub mod provider;
pub mod reconcile;
pub mod session;

pub use middleware::{CurrentUser, require_auth, require_session};
pub use oauth::auth_router;
pub use provider::{IdentityClaims, ProviderClient, TokenBundle};
pub use reconcile::{CallbackParams, reconcile};
pub use session::{
    AuthType, PendingLogin, SESSION_COOKIE, SessionData, SessionIdentity, SessionStore,
    create_session_token, verify_session_token,
};
