//! Remote domain signing keys
//!
//! A wallet provider publishes its signing key in a `stellar.toml` file at
//! a well-known path on its domain. During challenge issuance the service
//! resolves that key so the provider's account can be bound into the
//! challenge as the client-domain signer.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::auth::crypto;

/// Errors resolving a domain's published signing key
#[derive(Error, Debug)]
pub enum DomainKeyError {
    #[error("fetching stellar.toml from {domain}: {message}")]
    Fetch { domain: String, message: String },

    #[error("stellar.toml at {0} is malformed: {1}")]
    Malformed(String, String),

    #[error("stellar.toml at {0} is missing SIGNING_KEY")]
    MissingSigningKey(String),

    #[error("stellar.toml SIGNING_KEY at {0} is not a valid account address")]
    InvalidSigningKey(String),
}

/// Resolves the signing key a remote domain publishes.
#[async_trait]
pub trait DomainKeyFetcher: Send + Sync {
    /// Fetch and validate the domain's signing key. When
    /// `allow_http_retry` is set, a failed HTTPS fetch is retried once
    /// over plain HTTP.
    async fn fetch_signing_key(
        &self,
        domain: &str,
        allow_http_retry: bool,
    ) -> Result<String, DomainKeyError>;
}

#[derive(Debug, Deserialize)]
struct StellarToml {
    #[serde(rename = "SIGNING_KEY")]
    signing_key: Option<String>,
}

/// HTTP implementation fetching `https://<domain>/.well-known/stellar.toml`.
pub struct HttpDomainKeyFetcher {
    http: Client,
}

impl HttpDomainKeyFetcher {
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    async fn fetch_body(&self, scheme: &str, domain: &str) -> Result<String, DomainKeyError> {
        let url = format!("{scheme}://{domain}/.well-known/stellar.toml");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DomainKeyError::Fetch {
                domain: domain.to_string(),
                message: e.to_string(),
            })?;
        response.text().await.map_err(|e| DomainKeyError::Fetch {
            domain: domain.to_string(),
            message: e.to_string(),
        })
    }
}

impl Default for HttpDomainKeyFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DomainKeyFetcher for HttpDomainKeyFetcher {
    async fn fetch_signing_key(
        &self,
        domain: &str,
        allow_http_retry: bool,
    ) -> Result<String, DomainKeyError> {
        let body = match self.fetch_body("https", domain).await {
            Ok(body) => body,
            Err(err) if allow_http_retry => {
                warn!(%domain, error = %err, "stellar.toml fetch failed, retrying over http");
                self.fetch_body("http", domain).await?
            }
            Err(err) => return Err(err),
        };
        parse_signing_key(domain, &body)
    }
}

/// Extract and validate the SIGNING_KEY from a stellar.toml document.
pub fn parse_signing_key(domain: &str, body: &str) -> Result<String, DomainKeyError> {
    let parsed: StellarToml = toml::from_str(body)
        .map_err(|e| DomainKeyError::Malformed(domain.to_string(), e.to_string()))?;

    let key = parsed
        .signing_key
        .map(|k| k.trim().to_string())
        .unwrap_or_default();
    if key.is_empty() {
        return Err(DomainKeyError::MissingSigningKey(domain.to_string()));
    }
    if !crypto::is_valid_ed25519_public_key(&key) {
        return Err(DomainKeyError::InvalidSigningKey(domain.to_string()));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::crypto::Keypair;

    #[test]
    fn test_parse_signing_key() {
        let key = Keypair::random().address().to_string();
        let body = format!(
            "VERSION = \"2.0.0\"\nSIGNING_KEY = \"{key}\"\n\n[[CURRENCIES]]\ncode = \"USDC\"\n"
        );
        assert_eq!(parse_signing_key("wallet.example.com", &body).unwrap(), key);
    }

    #[test]
    fn test_parse_missing_signing_key() {
        let result = parse_signing_key("wallet.example.com", "VERSION = \"2.0.0\"\n");
        assert!(matches!(result, Err(DomainKeyError::MissingSigningKey(_))));
    }

    #[test]
    fn test_parse_invalid_signing_key() {
        let result = parse_signing_key(
            "wallet.example.com",
            "SIGNING_KEY = \"GNOTAVALIDKEY\"\n",
        );
        assert!(matches!(result, Err(DomainKeyError::InvalidSigningKey(_))));
    }

    #[test]
    fn test_parse_malformed_toml() {
        let result = parse_signing_key("wallet.example.com", "SIGNING_KEY = [unterminated");
        assert!(matches!(result, Err(DomainKeyError::Malformed(_, _))));
    }
}
