//! Provider signing keys
//!
//! Fetches the tenant's JSON Web Key Set and keeps it for a while. An id
//! token naming a key id the cached set lacks triggers one refetch, so
//! provider key rotation is picked up without a restart.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::JwkSet;
use tokio::sync::RwLock;

use crate::error::AppError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Cached key set with expiration
#[derive(Debug, Clone)]
struct CachedJwks {
    keys: JwkSet,
    expires_at: DateTime<Utc>,
}

impl CachedJwks {
    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// JWKS client with caching
pub struct JwksCache {
    http: reqwest::Client,
    url: String,
    ttl: chrono::Duration,
    cache: RwLock<Option<CachedJwks>>,
}

impl JwksCache {
    /// Creates a cache with the default TTL (1 hour)
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self {
            http,
            url,
            ttl: chrono::Duration::hours(1),
            cache: RwLock::new(None),
        }
    }

    /// Decoding key for `kid`
    ///
    /// # Errors
    /// `InvalidIdentity` if the key set cannot be fetched or has no usable
    /// key with that id
    pub async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AppError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|cached| !cached.is_expired())
                && let Some(jwk) = cached.keys.find(kid)
            {
                return key_from_jwk(jwk);
            }
        }

        let keys = self.fetch().await?;
        let key = keys
            .find(kid)
            .ok_or_else(|| AppError::InvalidIdentity(format!("unknown signing key '{kid}'")))
            .and_then(key_from_jwk);

        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            keys,
            expires_at: Utc::now() + self.ttl,
        });

        key
    }

    async fn fetch(&self) -> Result<JwkSet, AppError> {
        tracing::debug!(url = %self.url, "Fetching provider signing keys");

        let response = self
            .http
            .get(&self.url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::InvalidIdentity(format!("signing keys unavailable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(%status, "JWKS endpoint returned an error");
            return Err(AppError::InvalidIdentity(format!(
                "signing keys unavailable: JWKS endpoint returned {status}"
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| AppError::InvalidIdentity(format!("malformed JWKS document: {e}")))
    }
}

fn key_from_jwk(jwk: &jsonwebtoken::jwk::Jwk) -> Result<DecodingKey, AppError> {
    DecodingKey::from_jwk(jwk)
        .map_err(|e| AppError::InvalidIdentity(format!("unusable signing key: {e}")))
}
