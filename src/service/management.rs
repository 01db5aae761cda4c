//! Identity provider management API client
//!
//! Used by the operator diagnostics and to look up the GitHub connection
//! name. Access is through a client credentials grant for the
//! `{base}/api/v2/` audience.

use std::sync::Arc;
use std::time::Duration;

use oauth2::basic::BasicErrorResponseType;
use oauth2::{RequestTokenError, TokenResponse};
use serde::Deserialize;
use thiserror::Error;

use crate::auth::provider::{ProviderClient, token_error};
use crate::error::AppError;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Name used when the management API cannot be consulted
pub const DEFAULT_GITHUB_CONNECTION: &str = "github";

/// Failure talking to the management API
#[derive(Debug, Error)]
pub enum ManagementError {
    /// This client is not authorized for the management API
    #[error("management API access denied")]
    Forbidden,

    #[error(transparent)]
    Provider(#[from] AppError),
}

impl From<ManagementError> for AppError {
    fn from(err: ManagementError) -> Self {
        match err {
            ManagementError::Forbidden => {
                AppError::ProviderRejected("management API access denied".to_string())
            }
            ManagementError::Provider(e) => e,
        }
    }
}

/// Connection as listed by the management API
#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub strategy: String,
    #[serde(default)]
    pub enabled_clients: Vec<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub options: serde_json::Value,
}

impl Connection {
    pub fn is_enabled_for(&self, client_id: &str) -> bool {
        self.enabled_clients.iter().any(|id| id == client_id)
    }
}

/// Management API client
pub struct ManagementClient {
    provider: Arc<ProviderClient>,
}

impl ManagementClient {
    pub fn new(provider: Arc<ProviderClient>) -> Self {
        Self { provider }
    }

    pub fn client_id(&self) -> &str {
        self.provider.client_id()
    }

    /// Fetch the OpenID Connect discovery document
    pub async fn discovery(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, AppError> {
        let url = self.provider.discovery_url();
        tracing::info!(%url, "Fetching OpenID configuration");

        let response = self
            .provider
            .http()
            .get(&url)
            .timeout(DISCOVERY_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderRejected(format!(
                "discovery document returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ProviderRejected(format!("malformed discovery document: {e}")))
    }

    /// Service token for the management API
    pub async fn access_token(&self) -> Result<String, ManagementError> {
        let audience = self.provider.management_audience();
        match self.provider.request_client_credentials(&audience).await {
            Ok(response) => Ok(response.access_token().secret().clone()),
            Err(RequestTokenError::ServerResponse(response)) if is_access_denied(response.error()) => {
                tracing::warn!(error = %response, "Management API token denied");
                Err(ManagementError::Forbidden)
            }
            Err(e) => Err(ManagementError::Provider(token_error(e))),
        }
    }

    /// List every connection of the tenant
    pub async fn connections(&self) -> Result<Vec<Connection>, ManagementError> {
        self.get_json("connections").await
    }

    /// Full details of one connection
    pub async fn connection(&self, id: &str) -> Result<serde_json::Value, ManagementError> {
        self.get_json(&format!("connections/{}", urlencoding::encode(id)))
            .await
    }

    /// First connection with the `github` strategy
    pub async fn github_connection(&self) -> Result<Option<Connection>, ManagementError> {
        Ok(self
            .connections()
            .await?
            .into_iter()
            .find(|connection| connection.strategy == "github"))
    }

    /// Connection name to pin GitHub logins to
    ///
    /// Falls back to [`DEFAULT_GITHUB_CONNECTION`] when the management API
    /// refuses access.
    ///
    /// # Errors
    /// `Config` when the tenant has no GitHub connection, or it is not
    /// enabled for this client
    pub async fn resolve_github_connection(&self) -> Result<String, AppError> {
        match self.github_connection().await {
            Ok(Some(connection)) if connection.is_enabled_for(self.client_id()) => {
                tracing::info!(connection = %connection.name, "Using GitHub connection");
                Ok(connection.name)
            }
            Ok(Some(connection)) => {
                tracing::error!(
                    connection = %connection.name,
                    client_id = %self.client_id(),
                    "GitHub connection not enabled for this client"
                );
                Err(AppError::Config(format!(
                    "GitHub connection '{}' is not enabled for this application; \
                     enable it under Authentication > Social > {} > Applications",
                    connection.name, connection.name
                )))
            }
            Ok(None) => {
                tracing::error!("GitHub connection not found");
                Err(AppError::Config(
                    "GitHub connection not found; create one under Authentication > Social"
                        .to_string(),
                ))
            }
            Err(ManagementError::Forbidden) => {
                tracing::warn!(
                    "Management API access not available, trying default GitHub connection"
                );
                Ok(DEFAULT_GITHUB_CONNECTION.to_string())
            }
            Err(ManagementError::Provider(e)) => Err(e),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ManagementError> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.provider.management_audience(), path);

        let response = self
            .provider
            .http()
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(ManagementError::Forbidden);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderRejected(format!(
                "management API returned {status}: {body}"
            ))
            .into());
        }

        response.json().await.map_err(|e| {
            AppError::ProviderRejected(format!("malformed management API response: {e}")).into()
        })
    }
}

fn is_access_denied(kind: &BasicErrorResponseType) -> bool {
    match kind {
        BasicErrorResponseType::UnauthorizedClient => true,
        BasicErrorResponseType::Extension(code) => code == "access_denied",
        _ => false,
    }
}
