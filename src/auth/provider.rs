//! Identity provider client
//!
//! Wraps the `oauth2` client for the authorization code and client
//! credentials grants, plus the OpenID Connect pieces the gateway needs:
//! id token verification against the tenant's signing keys and the
//! userinfo endpoint.
//!
//! Built once at start-up from [`ProviderConfig`] and shared through
//! `AppState`; there is no process-global client registration.

use std::time::Duration;

use jsonwebtoken::{Algorithm, Validation};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, ExtraTokenFields, HttpClientError, RedirectUrl,
    RequestTokenError, Scope, StandardRevocableToken, StandardTokenResponse, TokenResponse,
    TokenUrl,
};
use serde::{Deserialize, Serialize};
use url::Url;

use super::jwks::JwksCache;
use super::session::PendingLogin;
use crate::config::{AppConfig, ProviderConfig};
use crate::error::AppError;

const SCOPES: [&str; 3] = ["openid", "profile", "email"];
const USERINFO_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra token endpoint fields: the OpenID Connect id token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

pub(crate) type ProviderTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;
pub(crate) type TokenRequestError =
    RequestTokenError<HttpClientError<reqwest::Error>, BasicErrorResponse>;

type OAuthClient = Client<
    BasicErrorResponse,
    ProviderTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Result of a successful code exchange
#[derive(Debug, Clone)]
pub struct TokenBundle {
    pub access_token: String,
    pub id_token: Option<String>,
}

/// Identity claims as served by the id token and the userinfo endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IdentityClaims {
    #[serde(default)]
    pub sub: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Identity provider client
pub struct ProviderClient {
    oauth: OAuthClient,
    http: reqwest::Client,
    jwks: JwksCache,
    endpoint_base: String,
    issuer: String,
    client_id: String,
    audience: Option<String>,
    return_to: String,
}

impl ProviderClient {
    /// Build the client from configuration
    ///
    /// # Errors
    /// Returns `AppError::Config` if any derived endpoint is not a valid URL
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let provider: &ProviderConfig = &config.provider;
        let endpoint_base = provider.endpoint_base();

        let auth_url = AuthUrl::new(format!("{endpoint_base}/authorize"))
            .map_err(|e| AppError::Config(format!("invalid authorize URL: {e}")))?;
        let token_url = TokenUrl::new(format!("{endpoint_base}/oauth/token"))
            .map_err(|e| AppError::Config(format!("invalid token URL: {e}")))?;
        let redirect_url = RedirectUrl::new(config.server.callback_url())
            .map_err(|e| AppError::Config(format!("invalid callback URL: {e}")))?;

        let oauth: OAuthClient = Client::new(ClientId::new(provider.client_id.clone()))
            .set_client_secret(ClientSecret::new(provider.client_secret.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url)
            .set_auth_type(AuthType::RequestBody);

        // The token endpoint must never be followed through redirects.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("Gatehouse/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        let jwks = JwksCache::new(http.clone(), format!("{endpoint_base}/.well-known/jwks.json"));

        Ok(Self {
            oauth,
            http,
            jwks,
            issuer: provider.issuer(),
            endpoint_base,
            client_id: provider.client_id.clone(),
            audience: provider
                .audience
                .clone()
                .filter(|audience| !audience.trim().is_empty()),
            return_to: config.server.base_url(),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Endpoint base without a trailing slash (e.g. `https://tenant.auth0.com`)
    pub fn endpoint_base(&self) -> &str {
        &self.endpoint_base
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/authorize", self.endpoint_base)
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.endpoint_base)
    }

    pub fn userinfo_url(&self) -> String {
        format!("{}/userinfo", self.endpoint_base)
    }

    pub fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.endpoint_base)
    }

    /// Audience of the management API
    pub fn management_audience(&self) -> String {
        format!("{}/api/v2/", self.endpoint_base)
    }

    /// Build the authorization redirect
    ///
    /// Returns the provider URL and the pending login to store in a fresh
    /// session. `connection` pins an upstream connection
    /// (e.g. `google-oauth2`).
    pub fn begin_redirect(&self, connection: Option<&str>) -> (Url, PendingLogin) {
        let mut request = self
            .oauth
            .authorize_url(CsrfToken::new_random)
            .add_scopes(SCOPES.iter().map(|scope| Scope::new((*scope).to_string())));

        if let Some(connection) = connection {
            request = request.add_extra_param("connection", connection.to_string());
        }
        if let Some(audience) = &self.audience {
            request = request.add_extra_param("audience", audience.clone());
        }

        let (url, state) = request.url();

        tracing::info!(
            connection = connection.unwrap_or("default"),
            "Redirecting to identity provider"
        );

        (
            url,
            PendingLogin {
                state: state.secret().clone(),
                connection: connection.map(ToOwned::to_owned),
            },
        )
    }

    /// Exchange an authorization code for tokens
    ///
    /// # Errors
    /// - `ProviderUnavailable` on transport failure
    /// - `ProviderRejected` on an error response or a malformed body
    pub async fn exchange_code(&self, code: &str) -> Result<TokenBundle, AppError> {
        let response = self
            .oauth
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(token_error)?;

        tracing::debug!(
            has_id_token = response.extra_fields().id_token.is_some(),
            "Authorization code exchanged"
        );

        Ok(TokenBundle {
            access_token: response.access_token().secret().clone(),
            id_token: response.extra_fields().id_token.clone(),
        })
    }

    /// Request a service token with the client credentials grant
    pub(crate) async fn request_client_credentials(
        &self,
        audience: &str,
    ) -> Result<ProviderTokenResponse, TokenRequestError> {
        self.oauth
            .exchange_client_credentials()
            .add_extra_param("audience", audience.to_string())
            .request_async(&self.http)
            .await
    }

    /// Verify an id token and read its identity claims
    ///
    /// The token must be RS256-signed by a key in the tenant's JWKS and
    /// carry this client as audience, the tenant as issuer and an unexpired
    /// `exp`.
    ///
    /// # Errors
    /// `InvalidIdentity` on any verification failure
    pub async fn parse_id_token(&self, id_token: &str) -> Result<IdentityClaims, AppError> {
        let header = jsonwebtoken::decode_header(id_token)
            .map_err(|e| AppError::InvalidIdentity(format!("malformed id token: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(AppError::InvalidIdentity(format!(
                "unsupported id token algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AppError::InvalidIdentity("id token names no signing key".to_string()))?;
        let key = self.jwks.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);

        jsonwebtoken::decode::<IdentityClaims>(id_token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::InvalidIdentity(format!("id token rejected: {e}")))
    }

    /// Fetch identity claims from the userinfo endpoint
    ///
    /// # Errors
    /// Any failure is reported as `IdentityUnavailable`
    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<IdentityClaims, AppError> {
        let response = self
            .http
            .get(self.userinfo_url())
            .bearer_auth(access_token)
            .timeout(USERINFO_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::IdentityUnavailable(format!("userinfo request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "Userinfo endpoint returned an error");
            return Err(AppError::IdentityUnavailable(format!(
                "userinfo endpoint returned {status}"
            )));
        }

        response
            .json::<IdentityClaims>()
            .await
            .map_err(|e| AppError::IdentityUnavailable(format!("malformed userinfo response: {e}")))
    }

    /// Provider logout URL returning to the public base URL
    pub fn logout_url(&self) -> Result<Url, AppError> {
        let mut url = Url::parse(&format!("{}/v2/logout", self.endpoint_base))
            .map_err(|e| AppError::Config(format!("invalid logout URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("returnTo", &self.return_to);
        Ok(url)
    }

    /// Shared HTTP client for other provider endpoints
    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

/// Map a token endpoint failure onto the error taxonomy
pub(crate) fn token_error(err: TokenRequestError) -> AppError {
    match err {
        RequestTokenError::Request(e) => {
            tracing::error!(error = %e, "Token endpoint unreachable");
            AppError::ProviderUnavailable(e.to_string())
        }
        RequestTokenError::ServerResponse(e) => {
            tracing::warn!(error = %e, "Token endpoint rejected the request");
            AppError::ProviderRejected(e.to_string())
        }
        RequestTokenError::Parse(e, _) => {
            tracing::warn!(error = %e, "Malformed token endpoint response");
            AppError::ProviderRejected(format!("malformed token response: {e}"))
        }
        RequestTokenError::Other(message) => AppError::ProviderRejected(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuthConfig, DiagnosticsConfig, GitHubConfig, LoggingConfig, ServerConfig,
    };
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SIGNING_KEY: &str = include_str!("../../tests/fixtures/provider_rsa.pem");
    const FORGED_KEY: &str = include_str!("../../tests/fixtures/forged_rsa.pem");
    const JWKS: &str = include_str!("../../tests/fixtures/jwks.json");
    const KID: &str = "gatehouse-test-key";

    fn config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                public_url: "http://localhost:8000".to_string(),
                debug: false,
            },
            provider: ProviderConfig {
                domain: "tenant.example.auth0.com".to_string(),
                client_id: "client-id".to_string(),
                client_secret: "client-secret".to_string(),
                audience: Some("https://api.example.com".to_string()),
                base_url: None,
                github_connection: None,
            },
            auth: AuthConfig {
                session_secret: "x".repeat(32),
                session_max_age: 3600,
            },
            github: GitHubConfig {
                api_base_url: "https://api.github.com".to_string(),
            },
            diagnostics: DiagnosticsConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }


    /// Provider whose endpoint base is a mock serving the test key set
    async fn keyed_provider() -> (MockServer, ProviderClient) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS, "application/json"))
            .mount(&server)
            .await;

        let mut config = config();
        config.provider.base_url = Some(server.uri());
        let client = ProviderClient::new(&config).expect("client builds");
        (server, client)
    }

    fn claims(server: &MockServer, audience: &str) -> serde_json::Value {
        json!({
            "iss": format!("{}/", server.uri()),
            "aud": audience,
            "exp": chrono::Utc::now().timestamp() + 600,
            "sub": "google-oauth2|123",
            "email": "ada@example.com",
            "name": "Ada",
            "picture": "https://example.com/ada.png",
        })
    }

    fn sign_rs256(claims: &serde_json::Value, pem: &str, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        jsonwebtoken::encode(
            &header,
            claims,
            &EncodingKey::from_rsa_pem(pem.as_bytes()).expect("test key parses"),
        )
        .expect("token encodes")
    }

    #[test]
    fn begin_redirect_pins_connection_and_state() {
        let client = ProviderClient::new(&config()).expect("client builds");
        let (url, pending) = client.begin_redirect(Some("google-oauth2"));

        assert!(url.as_str().starts_with("https://tenant.example.auth0.com/authorize?"));
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("client_id").map(String::as_str), Some("client-id"));
        assert_eq!(pairs.get("response_type").map(String::as_str), Some("code"));
        assert_eq!(
            pairs.get("connection").map(String::as_str),
            Some("google-oauth2")
        );
        assert_eq!(
            pairs.get("audience").map(String::as_str),
            Some("https://api.example.com")
        );
        assert_eq!(
            pairs.get("redirect_uri").map(String::as_str),
            Some("http://localhost:8000/auth/callback")
        );
        assert_eq!(pairs.get("state"), Some(&pending.state));
        assert_eq!(pending.connection.as_deref(), Some("google-oauth2"));

        let scope = pairs.get("scope").expect("scope present");
        for expected in SCOPES {
            assert!(scope.contains(expected), "scope {scope} lacks {expected}");
        }
    }

    #[test]
    fn begin_redirect_generates_fresh_state() {
        let client = ProviderClient::new(&config()).expect("client builds");
        let (_, first) = client.begin_redirect(None);
        let (_, second) = client.begin_redirect(None);
        assert_ne!(first.state, second.state);
        assert!(first.connection.is_none());
    }

    #[tokio::test]
    async fn parse_id_token_reads_claims() {
        let (server, client) = keyed_provider().await;
        let token = sign_rs256(&claims(&server, "client-id"), SIGNING_KEY, KID);

        let claims = client.parse_id_token(&token).await.expect("claims parse");
        assert_eq!(claims.sub, "google-oauth2|123");
        assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
        assert_eq!(claims.name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn parse_id_token_rejects_foreign_audience() {
        let (server, client) = keyed_provider().await;
        let token = sign_rs256(&claims(&server, "someone-else"), SIGNING_KEY, KID);

        assert!(matches!(
            client.parse_id_token(&token).await,
            Err(AppError::InvalidIdentity(_))
        ));
    }

    #[tokio::test]
    async fn parse_id_token_rejects_forged_signature() {
        let (server, client) = keyed_provider().await;
        let token = sign_rs256(&claims(&server, "client-id"), FORGED_KEY, KID);

        assert!(matches!(
            client.parse_id_token(&token).await,
            Err(AppError::InvalidIdentity(_))
        ));
    }

    #[tokio::test]
    async fn parse_id_token_rejects_symmetric_algorithm() {
        let (server, client) = keyed_provider().await;
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(KID.to_string());
        let token = jsonwebtoken::encode(
            &header,
            &claims(&server, "client-id"),
            &EncodingKey::from_secret(b"client-secret"),
        )
        .expect("token encodes");

        assert!(matches!(
            client.parse_id_token(&token).await,
            Err(AppError::InvalidIdentity(_))
        ));
    }

    #[tokio::test]
    async fn parse_id_token_rejects_unknown_key_id() {
        let (server, client) = keyed_provider().await;
        let token = sign_rs256(&claims(&server, "client-id"), SIGNING_KEY, "rotated-away");

        assert!(matches!(
            client.parse_id_token(&token).await,
            Err(AppError::InvalidIdentity(_))
        ));
    }

    #[tokio::test]
    async fn signing_keys_are_fetched_once() {
        let (server, client) = keyed_provider().await;
        let token = sign_rs256(&claims(&server, "client-id"), SIGNING_KEY, KID);

        client.parse_id_token(&token).await.expect("first parse");
        client.parse_id_token(&token).await.expect("second parse");

        let fetches = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path() == "/.well-known/jwks.json")
            .count();
        assert_eq!(fetches, 1);
    }

    #[tokio::test]
    async fn parse_id_token_rejects_garbage() {
        let (_server, client) = keyed_provider().await;
        assert!(client.parse_id_token("not-a-jwt").await.is_err());
    }

    #[test]
    fn logout_url_returns_to_public_url() {
        let client = ProviderClient::new(&config()).expect("client builds");
        let url = client.logout_url().expect("logout url");
        assert_eq!(url.path(), "/v2/logout");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("client_id").map(String::as_str), Some("client-id"));
        assert_eq!(
            pairs.get("returnTo").map(String::as_str),
            Some("http://localhost:8000")
        );
    }
}
