//! Session token generation and validation
//!
//! The [`TokenManager`] issues and parses the four token variants used by
//! the platform: classic-account sessions, smart-contract-account sessions,
//! short-lived deposit/withdraw sessions, and machine-to-machine service
//! tokens. All variants are compact three-part signed tokens with fixed
//! claim names so they round-trip exactly with any downstream verifier.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use super::crypto;

/// Subject used by tokens that represent the platform itself.
pub const PLATFORM_NAME: &str = "lumenpay-backend";

const MIN_SECRET_BYTES: usize = 12;
const MIN_EXPIRATION_MS: i64 = 5000;

/// Token-related errors
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("secret is required to have at least {MIN_SECRET_BYTES} characters")]
    SecretTooShort,

    #[error("expiration milliseconds is required to be at least {MIN_EXPIRATION_MS}")]
    ExpirationTooShort,

    #[error("token encoding failed: {0}")]
    EncodingFailed(String),

    #[error("parsing {0} token: {1}")]
    ParsingFailed(&'static str, String),

    #[error("token expired")]
    TokenExpired,

    #[error("invalid claims: {0}")]
    InvalidClaims(String),
}

fn require_non_empty(value: &str, name: &str) -> Result<(), TokenError> {
    if value.trim().is_empty() {
        return Err(TokenError::InvalidClaims(format!("{name} is required")));
    }
    Ok(())
}

fn require_future_expiry(exp: i64) -> Result<(), TokenError> {
    if exp <= 0 {
        return Err(TokenError::InvalidClaims(
            "exp (expires at) is required".to_string(),
        ));
    }
    if exp <= Utc::now().timestamp() {
        return Err(TokenError::InvalidClaims("token is expired".to_string()));
    }
    Ok(())
}

/// A light syntactic check for domain-shaped claim values.
fn require_valid_domain(domain: &str, name: &str) -> Result<(), TokenError> {
    if domain.trim().is_empty()
        || domain.contains(char::is_whitespace)
        || domain.contains("://")
        || domain.contains('/')
    {
        return Err(TokenError::InvalidClaims(format!(
            "{name} is not a valid domain"
        )));
    }
    Ok(())
}

/// Claims for a classic-account session token.
///
/// The subject is either a bare account address or `account:memo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicSessionClaims {
    pub iss: String,
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_domain: Option<String>,
}

impl ClassicSessionClaims {
    /// The account portion of the subject, before any memo.
    pub fn account(&self) -> &str {
        match self.sub.split_once(':') {
            Some((account, _)) => account,
            None => &self.sub,
        }
    }

    /// The memo portion of the subject; empty when absent.
    pub fn memo(&self) -> &str {
        match self.sub.split_once(':') {
            Some((_, memo)) => memo,
            None => "",
        }
    }

    pub fn valid(&self) -> Result<(), TokenError> {
        require_non_empty(&self.iss, "issuer")?;
        require_non_empty(&self.sub, "subject")?;
        require_non_empty(&self.jti, "jti (token id)")?;
        if self.iat == 0 {
            return Err(TokenError::InvalidClaims(
                "iat (issued at) is required".to_string(),
            ));
        }
        require_future_expiry(self.exp)?;
        if !crypto::is_valid_ed25519_public_key(self.account()) {
            return Err(TokenError::InvalidClaims(format!(
                "subject {} is not a valid account address",
                self.account()
            )));
        }
        if let Some(domain) = &self.client_domain {
            require_valid_domain(domain, "client_domain")?;
        }
        if let Some(domain) = &self.home_domain {
            require_valid_domain(domain, "home_domain")?;
        }
        Ok(())
    }
}

/// Claims for a smart-contract-account session token.
///
/// Same shape as the classic variant, but the subject is a contract address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSessionClaims {
    pub iss: String,
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_domain: Option<String>,
}

impl ContractSessionClaims {
    pub fn valid(&self) -> Result<(), TokenError> {
        require_non_empty(&self.iss, "issuer")?;
        require_non_empty(&self.sub, "subject")?;
        require_non_empty(&self.jti, "jti (token id)")?;
        if self.iat == 0 {
            return Err(TokenError::InvalidClaims(
                "iat (issued at) is required".to_string(),
            ));
        }
        require_future_expiry(self.exp)?;
        if !crypto::is_valid_contract_address(&self.sub) {
            return Err(TokenError::InvalidClaims(format!(
                "subject {} is not a valid contract address",
                self.sub
            )));
        }
        if let Some(domain) = &self.client_domain {
            require_valid_domain(domain, "client_domain")?;
        }
        if let Some(domain) = &self.home_domain {
            require_valid_domain(domain, "home_domain")?;
        }
        Ok(())
    }
}

/// Claims for a short-lived deposit/withdraw session token.
///
/// The id is the transaction being processed; the subject is the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSessionClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_domain: Option<String>,
}

impl DepositSessionClaims {
    pub fn valid(&self) -> Result<(), TokenError> {
        require_non_empty(&self.sub, "subject")?;
        require_non_empty(&self.jti, "jti (transaction id)")?;
        require_future_expiry(self.exp)?;
        if let Some(domain) = &self.client_domain {
            require_valid_domain(domain, "client_domain")?;
        }
        Ok(())
    }
}

/// Claims for a machine-to-machine service token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl ServiceClaims {
    pub fn valid(&self) -> Result<(), TokenError> {
        require_non_empty(&self.sub, "subject")?;
        require_non_empty(&self.jti, "jti (token id)")?;
        require_future_expiry(self.exp)
    }
}

/// Issues and parses all session token variants.
///
/// One manager per tenant configuration; the secret is never logged.
pub struct TokenManager {
    secret: Vec<u8>,
    expiration_ms: i64,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("expiration_ms", &self.expiration_ms)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a new manager from a signing secret and the expiration used
    /// for deposit and service tokens.
    pub fn new(secret: &str, expiration_ms: i64) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(TokenError::SecretTooShort);
        }
        if expiration_ms < MIN_EXPIRATION_MS {
            return Err(TokenError::ExpirationTooShort);
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
            expiration_ms,
        })
    }

    /// Generate a classic-account session token.
    ///
    /// The subject is `account` or `account:memo` when a memo is given.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_classic_session_token(
        &self,
        issuer: &str,
        account: &str,
        memo: &str,
        token_id: &str,
        client_domain: &str,
        home_domain: &str,
        iat: DateTime<Utc>,
        exp: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let sub = if memo.is_empty() {
            account.to_string()
        } else {
            format!("{account}:{memo}")
        };
        let claims = ClassicSessionClaims {
            iss: issuer.to_string(),
            sub,
            jti: token_id.to_string(),
            iat: iat.timestamp(),
            exp: exp.timestamp(),
            client_domain: optional(client_domain),
            home_domain: optional(home_domain),
        };
        claims.valid()?;
        self.sign(&claims)
    }

    /// Parse a classic-account session token.
    pub fn parse_classic_session_token(
        &self,
        token: &str,
    ) -> Result<ClassicSessionClaims, TokenError> {
        self.parse(token, "classic session")
    }

    /// Generate a smart-contract-account session token.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_contract_session_token(
        &self,
        issuer: &str,
        account: &str,
        token_id: &str,
        client_domain: &str,
        home_domain: &str,
        iat: DateTime<Utc>,
        exp: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = ContractSessionClaims {
            iss: issuer.to_string(),
            sub: account.to_string(),
            jti: token_id.to_string(),
            iat: iat.timestamp(),
            exp: exp.timestamp(),
            client_domain: optional(client_domain),
            home_domain: optional(home_domain),
        };
        claims.valid()?;
        self.sign(&claims)
    }

    /// Parse a smart-contract-account session token.
    pub fn parse_contract_session_token(
        &self,
        token: &str,
    ) -> Result<ContractSessionClaims, TokenError> {
        self.parse(token, "contract session")
    }

    /// Generate a deposit/withdraw session token for a transaction.
    pub fn generate_deposit_session_token(
        &self,
        transaction_id: &str,
        client_domain: &str,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = DepositSessionClaims {
            sub: PLATFORM_NAME.to_string(),
            jti: transaction_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::milliseconds(self.expiration_ms)).timestamp(),
            client_domain: optional(client_domain),
        };
        claims.valid()?;
        self.sign(&claims)
    }

    /// Parse a deposit/withdraw session token.
    pub fn parse_deposit_session_token(
        &self,
        token: &str,
    ) -> Result<DepositSessionClaims, TokenError> {
        self.parse(token, "deposit session")
    }

    /// Generate a machine-to-machine service token.
    pub fn generate_service_token(&self, token_id: &str) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = ServiceClaims {
            sub: PLATFORM_NAME.to_string(),
            jti: token_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::milliseconds(self.expiration_ms)).timestamp(),
        };
        claims.valid()?;
        self.sign(&claims)
    }

    /// Parse a machine-to-machine service token.
    pub fn parse_service_token(&self, token: &str) -> Result<ServiceClaims, TokenError> {
        self.parse(token, "service")
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| TokenError::EncodingFailed(e.to_string()))
    }

    fn parse<T: DeserializeOwned>(
        &self,
        token: &str,
        variant: &'static str,
    ) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Match the network's verifiers: no clock leeway.
        validation.leeway = 0;
        validation.validate_exp = true;

        let token_data = decode::<T>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::TokenExpired,
            _ => TokenError::ParsingFailed(variant, e.to_string()),
        })?;

        Ok(token_data.claims)
    }
}

fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::crypto::{encode_contract_address, Keypair};

    const TEST_SECRET: &str = "1234567890ab";

    fn manager() -> TokenManager {
        TokenManager::new(TEST_SECRET, 5000).unwrap()
    }

    #[test]
    fn test_new_rejects_short_secret() {
        let result = TokenManager::new("short", 5000);
        assert!(matches!(result, Err(TokenError::SecretTooShort)));
        assert_eq!(
            result.unwrap_err().to_string(),
            "secret is required to have at least 12 characters"
        );
    }

    #[test]
    fn test_new_rejects_short_expiration() {
        let result = TokenManager::new(TEST_SECRET, 4999);
        assert!(matches!(result, Err(TokenError::ExpirationTooShort)));
        assert_eq!(
            result.unwrap_err().to_string(),
            "expiration milliseconds is required to be at least 5000"
        );
    }

    #[test]
    fn test_classic_session_round_trip() {
        let manager = manager();
        let account = Keypair::random().address().to_string();
        let iat = Utc::now();
        let exp = iat + Duration::minutes(5);

        let token = manager
            .generate_classic_session_token(
                "https://example.com/webauth",
                &account,
                "123456",
                "challenge-123456",
                "wallet.example.com",
                "example.com",
                iat,
                exp,
            )
            .unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = manager.parse_classic_session_token(&token).unwrap();
        claims.valid().unwrap();
        assert_eq!(claims.iss, "https://example.com/webauth");
        assert_eq!(claims.account(), account);
        assert_eq!(claims.memo(), "123456");
        assert_eq!(claims.jti, "challenge-123456");
        assert_eq!(claims.client_domain.as_deref(), Some("wallet.example.com"));
        assert_eq!(claims.home_domain.as_deref(), Some("example.com"));
        assert_eq!(claims.iat, iat.timestamp());
        assert_eq!(claims.exp, exp.timestamp());
    }

    #[test]
    fn test_classic_session_without_memo_or_domains() {
        let manager = manager();
        let account = Keypair::random().address().to_string();
        let iat = Utc::now();

        let token = manager
            .generate_classic_session_token(
                "https://example.com/webauth",
                &account,
                "",
                "challenge-1",
                "",
                "",
                iat,
                iat + Duration::minutes(5),
            )
            .unwrap();

        let claims = manager.parse_classic_session_token(&token).unwrap();
        assert_eq!(claims.sub, account);
        assert_eq!(claims.memo(), "");
        assert_eq!(claims.client_domain, None);
        assert_eq!(claims.home_domain, None);
    }

    #[test]
    fn test_classic_session_rejects_invalid_account() {
        let manager = manager();
        let iat = Utc::now();
        let result = manager.generate_classic_session_token(
            "https://example.com/webauth",
            "not-an-account",
            "",
            "challenge-1",
            "",
            "",
            iat,
            iat + Duration::minutes(5),
        );
        assert!(matches!(result, Err(TokenError::InvalidClaims(_))));
    }

    #[test]
    fn test_contract_session_round_trip() {
        let manager = manager();
        let account = encode_contract_address(&[7u8; 32]);
        let iat = Utc::now();
        let exp = iat + Duration::hours(2);

        let token = manager
            .generate_contract_session_token(
                "https://example.com/webauth/contract",
                &account,
                "abc123",
                "wallet.example.com",
                "example.com",
                iat,
                exp,
            )
            .unwrap();

        let claims = manager.parse_contract_session_token(&token).unwrap();
        claims.valid().unwrap();
        assert_eq!(claims.sub, account);
        assert_eq!(claims.jti, "abc123");
        assert_eq!(claims.client_domain.as_deref(), Some("wallet.example.com"));
        assert_eq!(claims.home_domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_contract_session_rejects_classic_account_subject() {
        let manager = manager();
        let account = Keypair::random().address().to_string();
        let iat = Utc::now();
        let result = manager.generate_contract_session_token(
            "https://example.com/webauth/contract",
            &account,
            "abc123",
            "",
            "",
            iat,
            iat + Duration::hours(2),
        );
        assert!(matches!(result, Err(TokenError::InvalidClaims(_))));
    }

    #[test]
    fn test_deposit_session_round_trip() {
        let manager = manager();
        let before = Utc::now();
        let token = manager
            .generate_deposit_session_token("test-transaction-id", "wallet.example.com")
            .unwrap();
        let after = Utc::now();

        let claims = manager.parse_deposit_session_token(&token).unwrap();
        claims.valid().unwrap();
        assert_eq!(claims.sub, PLATFORM_NAME);
        assert_eq!(claims.jti, "test-transaction-id");
        assert_eq!(claims.client_domain.as_deref(), Some("wallet.example.com"));
        assert!(claims.exp >= (before + Duration::milliseconds(4000)).timestamp());
        assert!(claims.exp <= (after + Duration::milliseconds(5000)).timestamp());
    }

    #[test]
    fn test_service_token_round_trip() {
        let manager = manager();
        let id = uuid::Uuid::new_v4().to_string();
        let token = manager.generate_service_token(&id).unwrap();

        let claims = manager.parse_service_token(&token).unwrap();
        claims.valid().unwrap();
        assert_eq!(claims.sub, PLATFORM_NAME);
        assert_eq!(claims.jti, id);
    }

    #[test]
    fn test_parse_with_wrong_secret_fails() {
        let manager = manager();
        let other = TokenManager::new("different12345", 5000).unwrap();

        let token = manager.generate_service_token("some-id").unwrap();
        let result = other.parse_service_token(&token);
        assert!(matches!(result, Err(TokenError::ParsingFailed(_, _))));
    }

    #[test]
    fn test_parse_malformed_token_fails() {
        let manager = manager();
        assert!(manager.parse_service_token("not.a.token").is_err());
        assert!(manager.parse_service_token("").is_err());
    }

    #[test]
    fn test_parse_expired_token_fails() {
        let manager = manager();
        let now = Utc::now();
        // Sign an already-expired set of claims directly; the manager refuses
        // to generate one.
        let claims = ServiceClaims {
            sub: PLATFORM_NAME.to_string(),
            jti: "expired-id".to_string(),
            iat: (now - Duration::minutes(10)).timestamp(),
            exp: (now - Duration::minutes(5)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap();

        let result = manager.parse_service_token(&token);
        assert!(matches!(result, Err(TokenError::TokenExpired)));
    }

    #[test]
    fn test_generate_expired_claims_fails() {
        let manager = manager();
        let account = Keypair::random().address().to_string();
        let iat = Utc::now() - Duration::minutes(10);
        let exp = Utc::now() - Duration::minutes(5);
        let result = manager.generate_classic_session_token(
            "https://example.com/webauth",
            &account,
            "",
            "challenge-1",
            "",
            "",
            iat,
            exp,
        );
        assert!(matches!(result, Err(TokenError::InvalidClaims(_))));
    }
}
