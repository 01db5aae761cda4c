//! Callback reconciliation
//!
//! Turns an authorization callback into a [`SessionIdentity`]:
//!
//! 1. provider error parameter → `AuthenticationDenied`
//! 2. state not matching the pending login → `StateMismatch`
//! 3. code exchange, then claims from the id token, falling back to the
//!    userinfo endpoint (`IdentityUnavailable` if both fail)
//! 4. normalization (`InvalidIdentity` on an empty subject)
//!
//! The caller clears the session on every failure.

use serde::Deserialize;

use super::provider::{IdentityClaims, ProviderClient, TokenBundle};
use super::session::{PendingLogin, SessionIdentity};
use crate::error::AppError;

/// Query parameters of the provider callback
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Reconcile a callback into a session identity
pub async fn reconcile(
    provider: &ProviderClient,
    params: &CallbackParams,
    pending: Option<&PendingLogin>,
) -> Result<SessionIdentity, AppError> {
    if let Some(error) = &params.error {
        let description = params
            .error_description
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string());
        tracing::error!(%error, %description, "Identity provider returned an error");
        return Err(AppError::AuthenticationDenied(description));
    }

    let expected = pending.map(|pending| pending.state.as_str());
    if expected.is_none() || expected != params.state.as_deref() {
        tracing::error!(
            has_pending_login = pending.is_some(),
            "State mismatch; session expired or possible CSRF attempt"
        );
        return Err(AppError::StateMismatch);
    }

    let code = params
        .code
        .as_deref()
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AppError::AuthenticationDenied("missing authorization code".to_string()))?;

    let tokens = provider.exchange_code(code).await?;
    let claims = resolve_claims(provider, &tokens).await?;
    let identity = SessionIdentity::from_claims(claims, &tokens.access_token)?;

    tracing::info!(
        subject = %identity.subject_id,
        auth_type = identity.auth_type.as_str(),
        github_token = identity.provider_access_token.is_some(),
        "User authenticated"
    );

    Ok(identity)
}

async fn resolve_claims(
    provider: &ProviderClient,
    tokens: &TokenBundle,
) -> Result<IdentityClaims, AppError> {
    if let Some(id_token) = &tokens.id_token {
        match provider.parse_id_token(id_token).await {
            Ok(claims) => {
                tracing::info!(subject = %claims.sub, "Identity read from verified id token");
                return Ok(claims);
            }
            Err(error) => tracing::warn!(%error, "Could not verify id token"),
        }
    }

    let claims = provider.fetch_userinfo(&tokens.access_token).await?;
    tracing::info!(subject = %claims.sub, "Identity read from userinfo endpoint");
    Ok(claims)
}
