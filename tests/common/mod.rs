//! Common test utilities for E2E tests
//!
//! Every server gets its own mock identity provider and mock GitHub API.

#![allow(dead_code)]

use gatehouse::auth::{AuthType, SessionIdentity};
use gatehouse::{AppState, config};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "test-client-id";
pub const PUBLIC_URL: &str = "http://localhost:8000";

/// Key the mock provider signs id tokens with, published in its JWKS
pub const SIGNING_KEY: &str = include_str!("../fixtures/provider_rsa.pem");
/// Key unknown to the mock provider
pub const FORGED_KEY: &str = include_str!("../fixtures/forged_rsa.pem");
pub const SIGNING_KEY_ID: &str = "gatehouse-test-key";
const JWKS: &str = include_str!("../fixtures/jwks.json");

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub client: reqwest::Client,
    /// Stand-in for the identity provider tenant
    pub provider: MockServer,
    /// Stand-in for the GitHub REST API
    pub github: MockServer,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Test server with the diagnostics routes mounted
    pub async fn with_diagnostics() -> Self {
        Self::with_config(|config| config.diagnostics.enabled = true).await
    }

    /// Create a test server, adjusting the configuration first
    pub async fn with_config(configure: impl FnOnce(&mut config::AppConfig)) -> Self {
        let provider = MockServer::start().await;
        let github = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS, "application/json"))
            .mount(&provider)
            .await;

        // Create test configuration
        let mut config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                public_url: PUBLIC_URL.to_string(),
                debug: false,
            },
            provider: config::ProviderConfig {
                domain: "tenant.example.auth0.com".to_string(),
                client_id: CLIENT_ID.to_string(),
                client_secret: "test-client-secret".to_string(),
                audience: None,
                base_url: Some(provider.uri()),
                github_connection: None,
            },
            auth: config::AuthConfig {
                session_secret: "test-secret-key-32-bytes-long!!!".to_string(),
                session_max_age: 604800,
            },
            github: config::GitHubConfig {
                api_base_url: github.uri(),
            },
            diagnostics: config::DiagnosticsConfig::default(),
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };
        configure(&mut config);

        gatehouse::metrics::init_metrics();

        // Initialize app state
        let state = AppState::new(config).unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = gatehouse::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            client,
            provider,
            github,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Issuer the provider mock stands for
    pub fn issuer(&self) -> String {
        format!("{}/", self.provider.uri())
    }

    /// Id token as the provider would issue it for this client
    pub fn id_token(&self, claims: Value) -> String {
        self.id_token_signed_with(claims, SIGNING_KEY)
    }

    /// Id token with valid claims signed by an arbitrary RSA key
    pub fn id_token_signed_with(&self, claims: Value, pem: &str) -> String {
        let mut claims = claims;
        let now = chrono::Utc::now().timestamp();
        claims["iss"] = json!(self.issuer());
        claims["aud"] = json!(CLIENT_ID);
        claims["iat"] = json!(now);
        claims["exp"] = json!(now + 3600);

        let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(SIGNING_KEY_ID.to_string());
        jsonwebtoken::encode(
            &header,
            &claims,
            &jsonwebtoken::EncodingKey::from_rsa_pem(pem.as_bytes()).expect("test key parses"),
        )
        .expect("id token encodes")
    }

    /// Answer the authorization code grant
    pub async fn mock_code_exchange(&self, body: Value) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.provider)
            .await;
    }

    /// Answer the management API client credentials grant
    pub async fn mock_management_token(&self) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "management-token",
                "token_type": "Bearer",
                "expires_in": 86400,
            })))
            .mount(&self.provider)
            .await;
    }

    /// Management API connection list
    pub async fn mock_connections(&self, connections: Value) {
        Mock::given(method("GET"))
            .and(path("/api/v2/connections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(connections))
            .mount(&self.provider)
            .await;
    }

    /// Session cookie for an already signed-in user
    pub fn session_for(&self, identity: &SessionIdentity) -> String {
        let token = self
            .state
            .sessions
            .issue(identity)
            .expect("session token issues");
        format!("session={token}")
    }

    /// Run the whole login flow for `variant` and return the session cookie
    /// of the resulting signed-in session
    pub async fn login(&self, variant: &str) -> String {
        let client = no_redirect_client();

        let response = client
            .get(self.url(&format!("/auth/login/{variant}")))
            .send()
            .await
            .expect("login request succeeds");
        assert!(response.status().is_redirection());
        let state = query_param(&location(&response), "state").expect("state parameter");
        let pending = session_cookie(&response).expect("pending session cookie");

        let response = client
            .get(self.url(&format!("/auth/callback?code=test-code&state={state}")))
            .header("Cookie", pending)
            .send()
            .await
            .expect("callback request succeeds");
        assert!(
            response.status().is_redirection(),
            "callback failed with {}",
            response.status()
        );

        session_cookie(&response).expect("session cookie")
    }
}

pub fn github_identity(token: Option<&str>) -> SessionIdentity {
    SessionIdentity {
        subject_id: "github|4242".to_string(),
        email: Some("octocat@example.com".to_string()),
        display_name: Some("The Octocat".to_string()),
        avatar_url: Some("https://avatars.example.com/octocat.png".to_string()),
        auth_type: AuthType::Github,
        provider_access_token: token.map(ToOwned::to_owned),
    }
}

pub fn google_identity() -> SessionIdentity {
    SessionIdentity {
        subject_id: "google-oauth2|1001".to_string(),
        email: Some("ada@example.com".to_string()),
        display_name: Some("Ada Lovelace".to_string()),
        avatar_url: None,
        auth_type: AuthType::Google,
        provider_access_token: None,
    }
}

pub fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("failed to build no-redirect client")
}

pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// `Set-Cookie` header for the session cookie, if any
pub fn session_set_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("session="))
        .map(ToOwned::to_owned)
}

/// `session=...` pair ready to send back as a `Cookie` header
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    session_set_cookie(response)
        .and_then(|header| header.split(';').next().map(ToOwned::to_owned))
        .filter(|pair| pair != "session=")
}
