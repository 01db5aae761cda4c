//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::net::IpAddr;
use url::Url;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub auth: AuthConfig,
    pub github: GitHubConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8000)
    pub port: u16,
    /// Externally reachable base URL (e.g., "https://login.example.com")
    pub public_url: String,
    /// Verbose logging
    #[serde(default)]
    pub debug: bool,
}

impl ServerConfig {
    /// Public base URL without a trailing slash
    pub fn base_url(&self) -> String {
        self.public_url.trim_end_matches('/').to_string()
    }

    /// URL the identity provider redirects back to
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.base_url())
    }
}

/// Identity provider (Auth0 tenant) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Tenant domain (e.g., "example.eu.auth0.com")
    pub domain: String,
    pub client_id: String,
    pub client_secret: String,
    /// API audience requested at authorization time
    pub audience: Option<String>,
    /// Overrides `https://{domain}` as the endpoint base
    pub base_url: Option<String>,
    /// Connection name used for GitHub logins.
    ///
    /// When unset, the name is looked up through the management API.
    pub github_connection: Option<String>,
}

impl ProviderConfig {
    /// Endpoint base without a trailing slash
    pub fn endpoint_base(&self) -> String {
        match self.base_url.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.domain.trim().trim_end_matches('/')),
        }
    }

    /// Issuer expected in identity tokens (the base with a trailing slash)
    pub fn issuer(&self) -> String {
        format!("{}/", self.endpoint_base())
    }
}

/// Session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session signing secret (32+ bytes)
    pub session_secret: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
}

/// GitHub API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// REST API base (default: "https://api.github.com")
    pub api_base_url: String,
}

/// Operator-only diagnostics
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DiagnosticsConfig {
    /// Mount the `/auth/debug*` endpoints
    #[serde(default)]
    pub enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (GATEHOUSE__SECTION__KEY)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("server.public_url", "http://localhost:8000")?
            .set_default("server.debug", false)?
            .set_default("auth.session_max_age", 604800)?
            .set_default("github.api_base_url", "https://api.github.com")?
            .set_default("diagnostics.enabled", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("GATEHOUSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        match Url::parse(&self.server.public_url) {
            Ok(url) => {
                url.scheme().eq_ignore_ascii_case("https")
                    || !url.host_str().is_some_and(is_local_host)
            }
            Err(_) => true,
        }
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.auth.session_secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(crate::error::AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.provider.client_id.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "provider.client_id must not be empty".to_string(),
            ));
        }

        if self.provider.domain.trim().is_empty() && self.provider.base_url.is_none() {
            return Err(crate::error::AppError::Config(
                "provider.domain must not be empty".to_string(),
            ));
        }

        let public_url = Url::parse(&self.server.public_url).map_err(|e| {
            crate::error::AppError::Config(format!("server.public_url is not a valid URL: {e}"))
        })?;

        if !self.should_use_secure_cookies() {
            tracing::warn!(
                public_url = %public_url,
                "Using insecure session cookies for local development"
            );
        } else if public_url.scheme() != "https" {
            return Err(crate::error::AppError::Config(
                "server.public_url must use https for non-local hosts".to_string(),
            ));
        }

        if self.diagnostics.enabled && public_url.scheme() == "https" {
            tracing::warn!(
                "Diagnostics endpoints are enabled on a public deployment; \
                 they expose identity provider connection metadata"
            );
        }

        Ok(())
    }
}

fn is_local_host(host: &str) -> bool {
    let host = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
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
                audience: None,
                base_url: None,
                github_connection: None,
            },
            auth: AuthConfig {
                session_secret: "x".repeat(32),
                session_max_age: 604_800,
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

    #[test]
    fn validate_accepts_http_on_localhost() {
        let config = valid_config();
        assert!(config.validate().is_ok());
        assert!(!config.should_use_secure_cookies());
    }

    #[test]
    fn validate_rejects_short_session_secret() {
        let mut config = valid_config();
        config.auth.session_secret = "short-secret".to_string();

        let error = config
            .validate()
            .expect_err("session secret shorter than 32 bytes must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("auth.session_secret")
        ));
    }

    #[test]
    fn validate_rejects_http_for_non_local_host() {
        let mut config = valid_config();
        config.server.public_url = "http://login.example.com".to_string();

        let error = config
            .validate()
            .expect_err("public hosts must require https");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("must use https")
        ));
    }

    #[test]
    fn https_public_url_uses_secure_cookies() {
        let mut config = valid_config();
        config.server.public_url = "https://login.example.com".to_string();
        assert!(config.validate().is_ok());
        assert!(config.should_use_secure_cookies());
    }

    #[test]
    fn endpoint_base_prefers_explicit_base_url() {
        let mut config = valid_config();
        assert_eq!(
            config.provider.endpoint_base(),
            "https://tenant.example.auth0.com"
        );
        assert_eq!(config.provider.issuer(), "https://tenant.example.auth0.com/");

        config.provider.base_url = Some("http://127.0.0.1:9000/".to_string());
        assert_eq!(config.provider.endpoint_base(), "http://127.0.0.1:9000");
    }

    #[test]
    fn callback_url_is_derived_from_public_url() {
        let mut config = valid_config();
        config.server.public_url = "http://localhost:8000/".to_string();
        assert_eq!(
            config.server.callback_url(),
            "http://localhost:8000/auth/callback"
        );
    }
}
