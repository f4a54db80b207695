//! Ledger web-authentication
//!
//! Challenge/response proof of account control, issued in two variants:
//! a classic keypair-based challenge transaction and a smart-contract
//! account challenge built from simulated contract invocations. Both end
//! in a session token minted by the token manager.

mod args;
mod classic;
mod contract;
mod tracker;
pub mod xdr;

pub use args::ChallengeArgs;
pub use classic::{
    ClassicAuthService, ClassicAuthServiceOptions, ClassicChallengeRequest,
    ClassicChallengeResponse, ClassicValidationRequest, ClassicValidationResponse,
};
pub use contract::{
    ContractAuthService, ContractAuthServiceOptions, ContractChallengeRequest,
    ContractChallengeResponse, ContractValidationRequest, ContractValidationResponse,
};

use sha2::{Digest, Sha256};

use crate::error::WebAuthError;
use crate::rpc::{SimulationError, SimulationErrorKind};

/// Name of the well-known account-ownership-verification contract function.
pub const WEB_AUTH_FUNCTION_NAME: &str = "web_auth_verify";

/// Ledgers after which a server-signed authorization record expires.
pub const SIGNATURE_EXPIRATION_LEDGERS: u32 = 10;

/// Timeout applied to challenge invocation transactions, in seconds.
pub const CHALLENGE_TIMEOUT_SECONDS: u64 = 300;

/// Default lifetime of an issued session token, in seconds (2 hours).
pub const DEFAULT_SESSION_TOKEN_LIFETIME_SECONDS: i64 = 2 * 60 * 60;

/// The network id: SHA-256 of the network passphrase.
pub fn network_id(passphrase: &str) -> [u8; 32] {
    let digest = Sha256::digest(passphrase.as_bytes());
    digest.into()
}

/// The domain callers authenticate against: host (and explicit port) of
/// the service's own base URL.
pub fn web_auth_domain(base_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(base_url).ok()?;
    let host = url.host_str()?.to_string();
    match url.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host),
    }
}

/// The service's base domain: host of the base URL, without port.
pub fn base_domain(base_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(base_url).ok()?;
    url.host_str().map(|h| h.to_string())
}

/// A home domain is accepted when it equals the base domain or is a
/// subdomain of it, case-insensitively.
pub fn is_valid_home_domain(base_url: &str, home_domain: &str) -> bool {
    let Some(base) = base_domain(base_url) else {
        return false;
    };
    let base = base.to_lowercase();
    let home = home_domain.to_lowercase();
    home == base || home.ends_with(&format!(".{base}"))
}

/// Scheme of the base URL, defaulting to http when unparsable.
pub fn base_url_scheme(base_url: &str) -> String {
    reqwest::Url::parse(base_url)
        .map(|u| u.scheme().to_string())
        .unwrap_or_else(|_| "http".to_string())
}

/// Map a simulation failure onto the caller-visible error kinds:
/// authorization, contract-execution, and unparsable-transaction failures
/// are the caller's fault; everything else is an infrastructure failure.
pub(crate) fn map_simulation_error(err: SimulationError) -> WebAuthError {
    match err.kind {
        SimulationErrorKind::Auth
        | SimulationErrorKind::ContractExecution
        | SimulationErrorKind::TransactionInvalid => {
            WebAuthError::validation(format!("simulating transaction: {err}"))
        }
        _ => WebAuthError::internal(format!("simulating transaction: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_id_is_sha256_of_passphrase() {
        let id = network_id("Test SDF Network ; September 2015");
        assert_eq!(
            hex::encode(id),
            "cee0302d59844d32bdca915c8203dd44b33fbb7edc19051ea37abedf28ecd472"
        );
    }

    #[test]
    fn test_web_auth_domain() {
        assert_eq!(
            web_auth_domain("https://example.com").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            web_auth_domain("https://example.com:8000/path").as_deref(),
            Some("example.com:8000")
        );
        assert_eq!(web_auth_domain("not a url"), None);
    }

    #[test]
    fn test_is_valid_home_domain() {
        assert!(is_valid_home_domain("https://example.com", "example.com"));
        assert!(is_valid_home_domain("https://example.com", "EXAMPLE.com"));
        assert!(is_valid_home_domain(
            "https://example.com",
            "tenant.example.com"
        ));
        assert!(!is_valid_home_domain("https://example.com", "example.org"));
        assert!(!is_valid_home_domain(
            "https://example.com",
            "notexample.com"
        ));
    }

    #[test]
    fn test_base_url_scheme() {
        assert_eq!(base_url_scheme("https://example.com"), "https");
        assert_eq!(base_url_scheme("http://localhost:8000"), "http");
        assert_eq!(base_url_scheme("garbage"), "http");
    }

    #[test]
    fn test_map_simulation_error() {
        let err = map_simulation_error(SimulationError::from_response_error(
            "authorization failed",
        ));
        assert!(err.is_validation());

        let err = map_simulation_error(SimulationError::network("connection refused"));
        assert!(err.is_internal());
    }
}
