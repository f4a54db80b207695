//! Smart-contract-account challenge service
//!
//! Issues challenges as sets of authorization records for a well-known
//! ownership-verification contract function, and validates the
//! counter-signed records the caller returns. Validation re-simulates the
//! invocation against the ledger as a second, independent confirmation
//! before a session token is minted.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stellar_xdr::next::{
    InvokeContractArgs, Limits, ScAddress, ScVal, SorobanAuthorizationEntry,
    SorobanAuthorizedFunction, SorobanCredentials, VecM, WriteXdr,
};
use tracing::info;

use crate::auth::crypto::{self, Keypair};
use crate::auth::jwt::TokenManager;
use crate::error::{WebAuthError, WebAuthResult};
use crate::nonce::{self, NonceStore};
use crate::rpc::LedgerRpcClient;
use crate::stellar_toml::DomainKeyFetcher;

use super::args::{self, ChallengeArgs};
use super::tracker::{AuthEntryTracker, TrackerContext};
use super::xdr;
use super::{
    base_url_scheme, is_valid_home_domain, map_simulation_error, network_id, web_auth_domain,
    base_domain, CHALLENGE_TIMEOUT_SECONDS, DEFAULT_SESSION_TOKEN_LIFETIME_SECONDS,
    SIGNATURE_EXPIRATION_LEDGERS, WEB_AUTH_FUNCTION_NAME,
};

/// Request for a new smart-contract-account challenge.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractChallengeRequest {
    pub account: String,
    pub home_domain: String,
    #[serde(default)]
    pub client_domain: Option<String>,
}

impl ContractChallengeRequest {
    pub fn validate(&self) -> WebAuthResult<()> {
        if self.account.trim().is_empty() {
            return Err(WebAuthError::validation("account is required"));
        }
        if !crypto::is_valid_contract_address(self.account.trim()) {
            return Err(WebAuthError::validation(
                "account must be a valid contract address",
            ));
        }
        if self.home_domain.trim().is_empty() {
            return Err(WebAuthError::validation("home_domain is required"));
        }
        Ok(())
    }
}

/// A challenge: partially signed authorization records plus the network
/// they are valid on.
#[derive(Debug, Clone, Serialize)]
pub struct ContractChallengeResponse {
    pub authorization_entries: String,
    pub network_passphrase: String,
}

/// The caller's counter-signed records.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractValidationRequest {
    pub authorization_entries: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractValidationResponse {
    pub token: String,
}

/// Construction options for [`ContractAuthService`].
pub struct ContractAuthServiceOptions {
    pub rpc_client: Arc<dyn LedgerRpcClient>,
    pub domain_key_fetcher: Arc<dyn DomainKeyFetcher>,
    pub nonce_store: Arc<dyn NonceStore>,
    pub token_manager: Arc<TokenManager>,
    pub network_passphrase: String,
    pub web_auth_contract_id: String,
    pub signing_keypair: Keypair,
    pub base_url: String,
    pub allow_http_retry: bool,
}

/// The smart-contract-account web-auth service.
///
/// Stateless per request; one instance per tenant configuration. The only
/// long-lived material is the immutable signing keypair and configuration.
pub struct ContractAuthService {
    rpc: Arc<dyn LedgerRpcClient>,
    domain_keys: Arc<dyn DomainKeyFetcher>,
    nonces: Arc<dyn NonceStore>,
    tokens: Arc<TokenManager>,
    network_passphrase: String,
    network_id: [u8; 32],
    contract_id: [u8; 32],
    signing_keypair: Keypair,
    base_url: String,
    allow_http_retry: bool,
    token_lifetime: Duration,
}

/// The canonical arguments extracted from the first validated record.
struct ParsedChallengeArgs {
    raw: ChallengeArgs,
    invocation_args: VecM<ScVal>,
    client_account: String,
    client_contract_id: [u8; 32],
    home_domain: String,
    client_domain: Option<String>,
    client_domain_account: Option<String>,
}

impl ContractAuthService {
    pub fn new(options: ContractAuthServiceOptions) -> WebAuthResult<Self> {
        if options.network_passphrase.trim().is_empty() {
            return Err(WebAuthError::internal(
                "network passphrase cannot be empty",
            ));
        }
        if options.base_url.trim().is_empty() {
            return Err(WebAuthError::internal("base URL cannot be empty"));
        }
        let contract_id = crypto::decode_contract_address(options.web_auth_contract_id.trim())
            .map_err(|e| WebAuthError::internal(format!("decoding contract ID: {e}")))?;

        Ok(Self {
            rpc: options.rpc_client,
            domain_keys: options.domain_key_fetcher,
            nonces: options.nonce_store,
            tokens: options.token_manager,
            network_id: network_id(&options.network_passphrase),
            network_passphrase: options.network_passphrase,
            contract_id,
            signing_keypair: options.signing_keypair,
            base_url: options.base_url,
            allow_http_retry: options.allow_http_retry,
            token_lifetime: Duration::seconds(DEFAULT_SESSION_TOKEN_LIFETIME_SECONDS),
        })
    }

    /// Issue a new challenge for the given contract account.
    pub async fn create_challenge(
        &self,
        request: &ContractChallengeRequest,
    ) -> WebAuthResult<ContractChallengeResponse> {
        request.validate()?;

        let web_auth_domain = web_auth_domain(&self.base_url)
            .ok_or_else(|| WebAuthError::internal("unable to determine web_auth_domain"))?;

        let account = request.account.trim().to_string();
        let home_domain = request.home_domain.trim().to_string();
        if !is_valid_home_domain(&self.base_url, &home_domain) {
            return Err(WebAuthError::validation(format!(
                "home_domain must match {}",
                base_domain(&self.base_url).unwrap_or_default()
            )));
        }

        let client_domain = request
            .client_domain
            .as_deref()
            .map(str::trim)
            .filter(|domain| !domain.is_empty())
            .map(str::to_string);

        let client_domain_account = match &client_domain {
            Some(domain) => Some(
                self.domain_keys
                    .fetch_signing_key(domain, self.allow_http_retry)
                    .await
                    .map_err(|e| {
                        WebAuthError::internal(format!(
                            "fetching signing key for client_domain {domain}: {e}"
                        ))
                    })?,
            ),
            None => None,
        };

        let nonce = nonce::generate_nonce();
        self.nonces
            .store(&nonce)
            .await
            .map_err(|e| WebAuthError::internal(format!("storing nonce: {e}")))?;

        let challenge_args = ChallengeArgs::new(
            &account,
            &home_domain,
            client_domain
                .as_deref()
                .zip(client_domain_account.as_deref()),
            &nonce,
            &web_auth_domain,
            self.signing_keypair.address(),
        );

        // The transaction source must differ from the server signing
        // account so the server gets its own authorization record.
        let ephemeral_source = Keypair::random();
        let transaction = xdr::invocation_transaction(
            self.contract_id,
            WEB_AUTH_FUNCTION_NAME,
            challenge_args.to_invocation_args()?,
            ephemeral_source.public_key_bytes(),
            None,
            vec![],
            CHALLENGE_TIMEOUT_SECONDS,
        )?;

        // Simulation yields a record for the server signing account, the
        // client contract account, and the client-domain account when one
        // was requested.
        let simulation = self
            .rpc
            .simulate_transaction(&transaction)
            .await
            .map_err(map_simulation_error)?;
        if simulation.auth_entries.is_empty() {
            return Err(WebAuthError::internal("missing simulation results"));
        }

        let latest_ledger = self
            .rpc
            .latest_ledger_sequence()
            .await
            .map_err(map_simulation_error)?;
        let valid_until = latest_ledger + SIGNATURE_EXPIRATION_LEDGERS;

        let mut signed_entries = Vec::with_capacity(simulation.auth_entries.len());
        for encoded in &simulation.auth_entries {
            let entry = xdr::decode_entry(encoded)?;
            signed_entries.push(xdr::sign_auth_entry(
                entry,
                valid_until,
                &self.signing_keypair,
                self.network_id,
            )?);
        }

        info!(
            account = %account,
            home_domain = %home_domain,
            entries = signed_entries.len(),
            "issued contract web-auth challenge"
        );

        Ok(ContractChallengeResponse {
            authorization_entries: xdr::encode_entries(&signed_entries)?,
            network_passphrase: self.network_passphrase.clone(),
        })
    }

    /// Validate counter-signed challenge records and mint a session token.
    pub async fn validate_challenge(
        &self,
        request: &ContractValidationRequest,
    ) -> WebAuthResult<ContractValidationResponse> {
        let web_auth_domain = web_auth_domain(&self.base_url)
            .ok_or_else(|| WebAuthError::internal("unable to determine web_auth_domain"))?;

        let encoded = request.authorization_entries.trim();
        if encoded.is_empty() {
            return Err(WebAuthError::validation(
                "authorization_entries is required",
            ));
        }

        let entries = xdr::decode_entries(encoded)?;
        if entries.is_empty() {
            return Err(WebAuthError::validation(
                "authorization entries cannot be empty",
            ));
        }

        let mut parsed: Option<ParsedChallengeArgs> = None;
        let mut tracker = AuthEntryTracker::default();

        for entry in &entries {
            let contract_fn = self.ensure_web_auth_invocation(entry)?;

            // The first record establishes the canonical arguments; every
            // later record must match it field for field.
            let current = self.validate_arguments(&contract_fn.args, parsed, &web_auth_domain)?;

            let ctx = TrackerContext {
                server: &self.signing_keypair,
                client_contract_id: current.client_contract_id,
                client_domain_account: current.client_domain_account.as_deref(),
                network_id: self.network_id,
            };
            tracker.process_entry(entry, &ctx)?;
            parsed = Some(current);
        }

        let parsed =
            parsed.ok_or_else(|| WebAuthError::validation("missing authorization arguments"))?;
        tracker.validate(parsed.client_domain_account.is_some())?;

        let nonce = parsed.raw.get(args::ARG_NONCE).unwrap_or_default();
        let nonce_valid = self
            .nonces
            .consume(nonce)
            .await
            .map_err(|e| WebAuthError::internal(format!("consuming nonce: {e}")))?;
        if !nonce_valid {
            return Err(WebAuthError::validation("nonce is invalid or expired"));
        }

        // Re-simulate the invocation with the caller-submitted records as
        // an independent confirmation that they are network-valid.
        let ephemeral_source = Keypair::random();
        let transaction = xdr::invocation_transaction(
            self.contract_id,
            WEB_AUTH_FUNCTION_NAME,
            parsed.invocation_args.clone(),
            ephemeral_source.public_key_bytes(),
            Some(self.signing_keypair.public_key_bytes()),
            entries.clone(),
            CHALLENGE_TIMEOUT_SECONDS,
        )?;
        self.rpc
            .simulate_transaction(&transaction)
            .await
            .map_err(map_simulation_error)?;

        let challenge_id = self.derive_challenge_id(&entries)?;

        let scheme = base_url_scheme(&self.base_url);
        let issuer = format!("{scheme}://{}/webauth/contract", parsed.home_domain);
        let iat = Utc::now();
        let exp = iat + self.token_lifetime;

        let token = self
            .tokens
            .generate_contract_session_token(
                &issuer,
                &parsed.client_account,
                &challenge_id,
                parsed.client_domain.as_deref().unwrap_or(""),
                &parsed.home_domain,
                iat,
                exp,
            )
            .map_err(|e| WebAuthError::internal(format!("generating session token: {e}")))?;

        info!(
            account = %parsed.client_account,
            home_domain = %parsed.home_domain,
            challenge_id = %challenge_id,
            "validated contract web-auth challenge"
        );

        Ok(ContractValidationResponse { token })
    }

    /// A record must invoke the expected contract function directly, with
    /// address credentials and no sub-invocations.
    fn ensure_web_auth_invocation<'a>(
        &self,
        entry: &'a SorobanAuthorizationEntry,
    ) -> WebAuthResult<&'a InvokeContractArgs> {
        if !matches!(entry.credentials, SorobanCredentials::Address(_)) {
            return Err(WebAuthError::validation(
                "authorization entry missing address credentials",
            ));
        }
        if !entry.root_invocation.sub_invocations.is_empty() {
            return Err(WebAuthError::validation(
                "authorization entries cannot contain sub-invocations",
            ));
        }
        let SorobanAuthorizedFunction::ContractFn(contract_fn) = &entry.root_invocation.function
        else {
            return Err(WebAuthError::validation(
                "authorization entry must invoke contract function",
            ));
        };
        let ScAddress::Contract(contract) = &contract_fn.contract_address else {
            return Err(WebAuthError::validation(
                "authorization entry missing contract address",
            ));
        };
        if contract.0 != self.contract_id {
            return Err(WebAuthError::validation(
                "authorization entry targets unexpected contract",
            ));
        }
        if contract_fn.function_name.0.to_utf8_string_lossy() != WEB_AUTH_FUNCTION_NAME {
            return Err(WebAuthError::validation(format!(
                "authorization entry must call {WEB_AUTH_FUNCTION_NAME}"
            )));
        }
        Ok(contract_fn)
    }

    /// Extract a record's argument map, establishing the canonical
    /// arguments from the first record and requiring every later record
    /// to match it exactly.
    fn validate_arguments(
        &self,
        invocation_args: &VecM<ScVal>,
        parsed: Option<ParsedChallengeArgs>,
        web_auth_domain: &str,
    ) -> WebAuthResult<ParsedChallengeArgs> {
        let current = ChallengeArgs::from_invocation_args(invocation_args).map_err(|e| {
            WebAuthError::validation(format!(
                "validating invocation arguments: {}",
                e.message()
            ))
        })?;
        match parsed {
            None => self.build_challenge_args(current, invocation_args.clone(), web_auth_domain),
            Some(expected) => {
                if !expected.raw.matches(&current) {
                    return Err(WebAuthError::validation(
                        "authorization entry arguments mismatch",
                    ));
                }
                Ok(expected)
            }
        }
    }

    /// Re-validate the canonical arguments exactly as issuance would have
    /// produced them.
    fn build_challenge_args(
        &self,
        raw: ChallengeArgs,
        invocation_args: VecM<ScVal>,
        web_auth_domain: &str,
    ) -> WebAuthResult<ParsedChallengeArgs> {
        let client_account = raw.get(args::ARG_ACCOUNT).unwrap_or_default().to_string();
        if client_account.is_empty() {
            return Err(WebAuthError::validation("account argument is required"));
        }
        let client_contract_id = crypto::decode_contract_address(&client_account).map_err(|e| {
            WebAuthError::validation(format!("account must be a valid contract address: {e}"))
        })?;

        let home_domain = raw
            .get(args::ARG_HOME_DOMAIN)
            .unwrap_or_default()
            .to_string();
        if home_domain.is_empty() {
            return Err(WebAuthError::validation("home_domain is required"));
        }
        if !is_valid_home_domain(&self.base_url, &home_domain) {
            return Err(WebAuthError::validation(format!(
                "home_domain must match {}",
                base_domain(&self.base_url).unwrap_or_default()
            )));
        }

        let challenge_web_auth_domain = raw.get(args::ARG_WEB_AUTH_DOMAIN).unwrap_or_default();
        if challenge_web_auth_domain.is_empty() {
            return Err(WebAuthError::validation("web_auth_domain is required"));
        }
        if !challenge_web_auth_domain.eq_ignore_ascii_case(web_auth_domain) {
            return Err(WebAuthError::validation(format!(
                "web_auth_domain must equal {web_auth_domain}"
            )));
        }

        let web_auth_domain_account = raw
            .get(args::ARG_WEB_AUTH_DOMAIN_ACCOUNT)
            .unwrap_or_default();
        if web_auth_domain_account.is_empty() {
            return Err(WebAuthError::validation(
                "web_auth_domain_account is required",
            ));
        }
        if !crypto::is_valid_ed25519_public_key(web_auth_domain_account) {
            return Err(WebAuthError::validation(
                "web_auth_domain_account must be a valid account address",
            ));
        }
        if web_auth_domain_account != self.signing_keypair.address() {
            return Err(WebAuthError::validation(
                "web_auth_domain_account must match server signing key",
            ));
        }

        let client_domain = raw
            .get(args::ARG_CLIENT_DOMAIN)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let client_domain_account = raw
            .get(args::ARG_CLIENT_DOMAIN_ACCOUNT)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        if client_domain_account.is_some() && client_domain.is_none() {
            return Err(WebAuthError::validation(
                "client_domain is required when client_domain_account is provided",
            ));
        }
        if client_domain.is_some() {
            match &client_domain_account {
                None => {
                    return Err(WebAuthError::validation(
                        "client_domain_account is required when client_domain is provided",
                    ));
                }
                Some(account) => {
                    if !crypto::is_valid_ed25519_public_key(account) {
                        return Err(WebAuthError::validation(
                            "client_domain_account must be a valid account address",
                        ));
                    }
                }
            }
        }

        if raw.get(args::ARG_NONCE).unwrap_or_default().is_empty() {
            return Err(WebAuthError::validation("nonce is required"));
        }

        Ok(ParsedChallengeArgs {
            raw,
            invocation_args,
            client_account,
            client_contract_id,
            home_domain,
            client_domain,
            client_domain_account,
        })
    }

    /// The challenge id: hex SHA-256 over {network id, first record's
    /// root invocation}. Deterministic, so repeat validations of the same
    /// challenge collide instead of minting distinct tokens.
    fn derive_challenge_id(
        &self,
        entries: &[SorobanAuthorizationEntry],
    ) -> WebAuthResult<String> {
        let first = entries.first().ok_or_else(|| {
            WebAuthError::internal("authorization entries cannot be empty")
        })?;
        let invocation = first
            .root_invocation
            .to_xdr(Limits::none())
            .map_err(|e| WebAuthError::internal(format!("marshalling root invocation: {e}")))?;

        let mut buffer = Vec::with_capacity(32 + invocation.len());
        buffer.extend_from_slice(&self.network_id);
        buffer.extend_from_slice(&invocation);
        Ok(hex::encode(Sha256::digest(&buffer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::crypto::encode_contract_address;

    #[test]
    fn test_challenge_request_validation() {
        let valid = ContractChallengeRequest {
            account: encode_contract_address(&[1u8; 32]),
            home_domain: "example.com".to_string(),
            client_domain: None,
        };
        valid.validate().unwrap();

        let missing_account = ContractChallengeRequest {
            account: " ".to_string(),
            home_domain: "example.com".to_string(),
            client_domain: None,
        };
        let err = missing_account.validate().unwrap_err();
        assert!(err.message().contains("account is required"));

        let classic_account = ContractChallengeRequest {
            account: Keypair::random().address().to_string(),
            home_domain: "example.com".to_string(),
            client_domain: None,
        };
        let err = classic_account.validate().unwrap_err();
        assert!(err.message().contains("valid contract address"));

        let missing_home_domain = ContractChallengeRequest {
            account: encode_contract_address(&[1u8; 32]),
            home_domain: String::new(),
            client_domain: None,
        };
        let err = missing_home_domain.validate().unwrap_err();
        assert!(err.message().contains("home_domain is required"));
    }
}
