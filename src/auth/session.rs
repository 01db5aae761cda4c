//! Session management
//!
//! The session is a typed [`SessionData`] value carried in an HMAC-signed
//! cookie. It is serialized only at the cookie boundary and validated on
//! every read: a bad signature, an expired session or an inconsistent
//! identity all read as "no session".

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::provider::IdentityClaims;
use crate::config::AuthConfig;
use crate::error::AppError;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session";

/// Coarse label for how the user signed in
///
/// Derived from the subject identifier prefix only. It is a presentation
/// label and must never drive authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Auth0,
    Google,
    Github,
}

impl AuthType {
    pub fn from_subject(subject_id: &str) -> Self {
        if subject_id.starts_with("google-oauth2") {
            AuthType::Google
        } else if subject_id.starts_with("github") {
            AuthType::Github
        } else {
            AuthType::Auth0
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Auth0 => "auth0",
            AuthType::Google => "google",
            AuthType::Github => "github",
        }
    }
}

/// Normalized identity stored in the session after login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    /// Provider-namespaced subject (e.g. `github|456`)
    pub subject_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub auth_type: AuthType,
    /// GitHub access token, kept only for GitHub-originated logins
    pub provider_access_token: Option<String>,
}

impl SessionIdentity {
    /// Normalize provider claims into a session identity
    ///
    /// The access token is retained only when the subject is namespaced
    /// under the GitHub connection.
    ///
    /// # Errors
    /// `InvalidIdentity` when the subject identifier is empty
    pub fn from_claims(claims: IdentityClaims, access_token: &str) -> Result<Self, AppError> {
        let subject_id = claims.sub.trim().to_string();
        if subject_id.is_empty() {
            return Err(AppError::InvalidIdentity(
                "identity claims carry no subject identifier".to_string(),
            ));
        }

        let provider_access_token = (subject_id.starts_with("github|")
            && !access_token.is_empty())
        .then(|| access_token.to_string());

        Ok(Self {
            auth_type: AuthType::from_subject(&subject_id),
            subject_id,
            email: claims.email,
            display_name: claims.name,
            avatar_url: claims.picture,
            provider_access_token,
        })
    }

    fn is_consistent(&self) -> bool {
        !self.subject_id.is_empty()
            && self.auth_type == AuthType::from_subject(&self.subject_id)
            && (self.provider_access_token.is_none() || self.subject_id.starts_with("github|"))
    }
}

/// Login started but not yet completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    /// CSRF state sent to the provider
    pub state: String,
    /// Upstream connection the login was pinned to
    pub connection: Option<String>,
}

/// Everything stored in the session cookie
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub pending: Option<PendingLogin>,
    pub identity: Option<SessionIdentity>,
    /// When session was created
    pub created_at: DateTime<Utc>,
    /// When session expires
    pub expires_at: DateTime<Utc>,
}

impl SessionData {
    fn fresh(max_age: i64) -> Self {
        let now = Utc::now();
        Self {
            pending: None,
            identity: None,
            created_at: now,
            expires_at: now + Duration::seconds(max_age),
        }
    }

    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    fn is_valid(&self) -> bool {
        !self.is_expired()
            && self
                .identity
                .as_ref()
                .is_none_or(SessionIdentity::is_consistent)
    }
}

/// Create a signed session token
///
/// Token format: base64(payload).base64(hmac_sha256(payload))
pub fn create_session_token(session: &SessionData, secret: &str) -> Result<String, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let payload = serde_json::to_string(session).map_err(|e| AppError::Internal(e.into()))?;
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload.as_bytes());

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(format!("invalid session secret: {e}")))?;
    mac.update(payload_b64.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{}.{}", payload_b64, signature_b64))
}

/// Verify and decode a session token
///
/// # Errors
/// `Unauthenticated` if the signature is invalid, the token is malformed,
/// the session is expired or its identity is inconsistent
pub fn verify_session_token(token: &str, secret: &str) -> Result<SessionData, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let (payload_b64, signature_b64) = token.split_once('.').ok_or(AppError::Unauthenticated)?;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(format!("invalid session secret: {e}")))?;
    mac.update(payload_b64.as_bytes());

    let signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthenticated)?;

    mac.verify_slice(&signature)
        .map_err(|_| AppError::Unauthenticated)?;

    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AppError::Unauthenticated)?;

    let session: SessionData =
        serde_json::from_slice(&payload_bytes).map_err(|_| AppError::Unauthenticated)?;

    if !session.is_valid() {
        return Err(AppError::Unauthenticated);
    }

    Ok(session)
}

/// Cookie-backed session store
///
/// Keyed per client by the cookie itself; no server-side state.
#[derive(Debug, Clone)]
pub struct SessionStore {
    secret: String,
    max_age: i64,
    secure: bool,
}

impl SessionStore {
    pub fn new(auth: &AuthConfig, secure: bool) -> Self {
        Self {
            secret: auth.session_secret.clone(),
            max_age: auth.session_max_age,
            secure,
        }
    }

    /// Read and validate the session carried by the request
    pub fn load(&self, jar: &CookieJar) -> Option<SessionData> {
        let token = jar.get(SESSION_COOKIE)?.value();
        if token.is_empty() {
            return None;
        }

        match verify_session_token(token, &self.secret) {
            Ok(session) => Some(session),
            Err(_) => {
                tracing::debug!("Discarding invalid session cookie");
                None
            }
        }
    }

    /// Identity of the signed-in user, if any
    pub fn identity(&self, jar: &CookieJar) -> Option<SessionIdentity> {
        self.load(jar).and_then(|session| session.identity)
    }

    /// Replace whatever session exists with one holding only a pending login
    pub fn start_login(&self, jar: CookieJar, pending: PendingLogin) -> Result<CookieJar, AppError> {
        let mut session = SessionData::fresh(self.max_age);
        session.pending = Some(pending);
        self.write(jar, &session)
    }

    /// Replace whatever session exists with an authenticated one
    pub fn establish(
        &self,
        jar: CookieJar,
        identity: &SessionIdentity,
    ) -> Result<CookieJar, AppError> {
        let token = self.issue(identity)?;
        Ok(jar.add(self.cookie(token)))
    }

    /// Signed token for an authenticated session
    pub fn issue(&self, identity: &SessionIdentity) -> Result<String, AppError> {
        let mut session = SessionData::fresh(self.max_age);
        session.identity = Some(identity.clone());
        create_session_token(&session, &self.secret)
    }

    /// Expire the session cookie
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.add(
            Cookie::build((SESSION_COOKIE, ""))
                .http_only(true)
                .secure(self.secure)
                .same_site(SameSite::Lax)
                .path("/")
                .max_age(time::Duration::ZERO)
                .build(),
        )
    }

    fn write(&self, jar: CookieJar, session: &SessionData) -> Result<CookieJar, AppError> {
        let token = create_session_token(session, &self.secret)?;
        Ok(jar.add(self.cookie(token)))
    }

    fn cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(self.max_age))
            .build()
    }
}
