//! Classic keypair-account challenge service
//!
//! The older of the two ownership-proof variants: a sequence-zero
//! transaction from the server account carrying manage-data operations
//! that bind the client account, the service's domains, and a single-use
//! nonce. The caller signs the transaction and returns it; validation
//! checks the structure, the signatures, and the nonce before minting a
//! classic session token.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use base64::{engine::general_purpose, Engine as _};
use stellar_xdr::next::{
    DataValue, ManageDataOp, Memo, MuxedAccount, Operation, OperationBody, Preconditions,
    SequenceNumber, String64, TimeBounds, TimePoint, Transaction, TransactionEnvelope,
    TransactionExt, TransactionV1Envelope, Uint256,
};
use tracing::info;

use crate::auth::crypto::{self, Keypair};
use crate::auth::jwt::TokenManager;
use crate::error::{WebAuthError, WebAuthResult};
use crate::nonce::NonceStore;
use crate::stellar_toml::DomainKeyFetcher;

use super::{
    base_domain, base_url_scheme, is_valid_home_domain, web_auth_domain, xdr,
    DEFAULT_SESSION_TOKEN_LIFETIME_SECONDS,
};

/// Challenge transactions stay valid for fifteen minutes.
const AUTH_TIMEOUT_SECONDS: i64 = 15 * 60;

/// Grace period applied to the lower timebound during validation.
const TIMEBOUNDS_GRACE_SECONDS: i64 = 5 * 60;

/// Raw nonce length; 48 bytes becomes 64 characters of base64.
const NONCE_BYTES: usize = 48;

/// Request for a new classic-account challenge.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassicChallengeRequest {
    pub account: String,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub home_domain: Option<String>,
    #[serde(default)]
    pub client_domain: Option<String>,
}

impl ClassicChallengeRequest {
    pub fn validate(&self) -> WebAuthResult<()> {
        if self.account.trim().is_empty() {
            return Err(WebAuthError::validation("account is required"));
        }
        if !crypto::is_valid_ed25519_public_key(self.account.trim()) {
            return Err(WebAuthError::validation(
                "account must be a valid account address",
            ));
        }
        if let Some(memo) = &self.memo {
            if !memo.trim().is_empty() && memo.trim().parse::<u64>().is_err() {
                return Err(WebAuthError::validation(
                    "invalid memo: expected unsigned integer id",
                ));
            }
        }
        Ok(())
    }

    fn memo_id(&self) -> Option<u64> {
        self.memo
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .and_then(|m| m.parse::<u64>().ok())
    }
}

/// A challenge: the server-signed transaction plus the network it is
/// valid on.
#[derive(Debug, Clone, Serialize)]
pub struct ClassicChallengeResponse {
    pub transaction: String,
    pub network_passphrase: String,
}

/// The caller's counter-signed challenge transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassicValidationRequest {
    pub transaction: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassicValidationResponse {
    pub token: String,
}

/// Construction options for [`ClassicAuthService`].
pub struct ClassicAuthServiceOptions {
    pub domain_key_fetcher: Arc<dyn DomainKeyFetcher>,
    pub nonce_store: Arc<dyn NonceStore>,
    pub token_manager: Arc<TokenManager>,
    pub network_passphrase: String,
    pub signing_keypair: Keypair,
    pub base_url: String,
    pub allow_http_retry: bool,
    /// Require a client_domain on every challenge request.
    pub client_attribution_required: bool,
}

/// The classic keypair-account web-auth service.
pub struct ClassicAuthService {
    domain_keys: Arc<dyn DomainKeyFetcher>,
    nonces: Arc<dyn NonceStore>,
    tokens: Arc<TokenManager>,
    network_passphrase: String,
    network_id: [u8; 32],
    signing_keypair: Keypair,
    base_url: String,
    allow_http_retry: bool,
    client_attribution_required: bool,
    token_lifetime: Duration,
}

/// What structural validation of a submitted challenge yields.
struct ChallengeValidationResult {
    transaction: Transaction,
    signatures: Vec<stellar_xdr::next::DecoratedSignature>,
    client_account: String,
    home_domain: String,
    memo: Option<u64>,
    client_domain: Option<String>,
    nonce: String,
}

impl ClassicAuthService {
    pub fn new(options: ClassicAuthServiceOptions) -> WebAuthResult<Self> {
        if options.network_passphrase.trim().is_empty() {
            return Err(WebAuthError::internal(
                "network passphrase cannot be empty",
            ));
        }
        if options.base_url.trim().is_empty() {
            return Err(WebAuthError::internal("base URL cannot be empty"));
        }
        Ok(Self {
            domain_keys: options.domain_key_fetcher,
            nonces: options.nonce_store,
            tokens: options.token_manager,
            network_id: super::network_id(&options.network_passphrase),
            network_passphrase: options.network_passphrase,
            signing_keypair: options.signing_keypair,
            base_url: options.base_url,
            allow_http_retry: options.allow_http_retry,
            client_attribution_required: options.client_attribution_required,
            token_lifetime: Duration::seconds(DEFAULT_SESSION_TOKEN_LIFETIME_SECONDS),
        })
    }

    /// Build and sign a new challenge transaction for the given account.
    pub async fn create_challenge(
        &self,
        request: &ClassicChallengeRequest,
    ) -> WebAuthResult<ClassicChallengeResponse> {
        request.validate()?;

        let web_auth_domain = web_auth_domain(&self.base_url)
            .ok_or_else(|| WebAuthError::internal("unable to determine web_auth_domain"))?;

        let client_domain = request
            .client_domain
            .as_deref()
            .map(str::trim)
            .filter(|domain| !domain.is_empty())
            .map(str::to_string);
        if self.client_attribution_required && client_domain.is_none() {
            return Err(WebAuthError::validation("client_domain is required"));
        }

        let home_domain = match request.home_domain.as_deref().map(str::trim) {
            Some(domain) if !domain.is_empty() => domain.to_string(),
            _ => base_domain(&self.base_url)
                .ok_or_else(|| WebAuthError::validation("home_domain is required"))?,
        };
        if !is_valid_home_domain(&self.base_url, &home_domain) {
            return Err(WebAuthError::validation(format!(
                "home_domain must match {}",
                base_domain(&self.base_url).unwrap_or_default()
            )));
        }

        let client_domain_account = match &client_domain {
            Some(domain) => Some(
                self.domain_keys
                    .fetch_signing_key(domain, self.allow_http_retry)
                    .await
                    .map_err(|e| {
                        WebAuthError::internal(format!(
                            "fetching client domain signing key: {e}"
                        ))
                    })?,
            ),
            None => None,
        };

        let mut nonce_raw = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce_raw);
        let nonce = general_purpose::STANDARD.encode(nonce_raw);

        self.nonces
            .store(&nonce)
            .await
            .map_err(|e| WebAuthError::internal(format!("storing nonce: {e}")))?;

        let client_account = request.account.trim().to_string();
        let client_public_key = crypto::decode_ed25519_public_key(&client_account)
            .map_err(|e| WebAuthError::validation(format!("decoding account: {e}")))?;

        let mut operations = vec![
            manage_data_op(
                Some(client_public_key),
                &format!("{home_domain} auth"),
                nonce.as_bytes(),
            )?,
            manage_data_op(
                Some(self.signing_keypair.public_key_bytes()),
                "web_auth_domain",
                web_auth_domain.as_bytes(),
            )?,
        ];
        if let (Some(domain), Some(account)) = (&client_domain, &client_domain_account) {
            let domain_public_key = crypto::decode_ed25519_public_key(account)
                .map_err(|e| WebAuthError::internal(format!("decoding client domain key: {e}")))?;
            operations.push(manage_data_op(
                Some(domain_public_key),
                "client_domain",
                domain.as_bytes(),
            )?);
        }

        let now = Utc::now().timestamp();
        let operation_count = operations.len() as u32;
        let tx = Transaction {
            source_account: xdr::muxed_ed25519(self.signing_keypair.public_key_bytes()),
            fee: xdr::MIN_BASE_FEE * operation_count,
            seq_num: SequenceNumber(0),
            cond: Preconditions::Time(TimeBounds {
                min_time: TimePoint(now as u64),
                max_time: TimePoint((now + AUTH_TIMEOUT_SECONDS) as u64),
            }),
            memo: match request.memo_id() {
                Some(id) => Memo::Id(id),
                None => Memo::None,
            },
            operations: operations
                .try_into()
                .map_err(|_| WebAuthError::internal("building challenge operations"))?,
            ext: TransactionExt::V0,
        };

        let hash = xdr::transaction_hash(&tx, self.network_id)?;
        let signature = xdr::decorated_signature(&self.signing_keypair, &hash)?;
        let envelope = TransactionEnvelope::Tx(TransactionV1Envelope {
            tx,
            signatures: vec![signature]
                .try_into()
                .map_err(|_| WebAuthError::internal("attaching challenge signature"))?,
        });

        info!(account = %client_account, home_domain = %home_domain, "issued classic web-auth challenge");

        Ok(ClassicChallengeResponse {
            transaction: xdr::encode_envelope(&envelope)?,
            network_passphrase: self.network_passphrase.clone(),
        })
    }

    /// Validate a counter-signed challenge and mint a classic session
    /// token.
    pub async fn validate_challenge(
        &self,
        request: &ClassicValidationRequest,
    ) -> WebAuthResult<ClassicValidationResponse> {
        if request.transaction.trim().is_empty() {
            return Err(WebAuthError::validation("transaction is required"));
        }

        let result = self.read_challenge(&request.transaction)?;

        // Client master-key signature.
        self.verify_transaction_signature(&result, &result.client_account, "client")?;

        // Client-domain signature when attribution was requested.
        if let Some(domain) = &result.client_domain {
            let domain_account = self
                .domain_keys
                .fetch_signing_key(domain, self.allow_http_retry)
                .await
                .map_err(|e| {
                    WebAuthError::internal(format!("fetching client domain signing key: {e}"))
                })?;
            self.verify_transaction_signature(&result, &domain_account, "client domain")?;
        }

        let nonce_valid = self
            .nonces
            .consume(&result.nonce)
            .await
            .map_err(|e| WebAuthError::internal(format!("consuming nonce: {e}")))?;
        if !nonce_valid {
            return Err(WebAuthError::validation("nonce is invalid or expired"));
        }

        let hash = xdr::transaction_hash(&result.transaction, self.network_id)?;
        let challenge_id = hex::encode(hash);

        let iat = match &result.transaction.cond {
            Preconditions::Time(bounds) => DateTime::<Utc>::from_timestamp(
                bounds.min_time.0 as i64,
                0,
            )
            .unwrap_or_else(Utc::now),
            _ => Utc::now(),
        };
        let exp = iat + self.token_lifetime;

        let scheme = base_url_scheme(&self.base_url);
        let issuer = format!("{scheme}://{}/webauth", result.home_domain);
        let memo = result.memo.map(|m| m.to_string()).unwrap_or_default();

        let token = self
            .tokens
            .generate_classic_session_token(
                &issuer,
                &result.client_account,
                &memo,
                &challenge_id,
                result.client_domain.as_deref().unwrap_or(""),
                &result.home_domain,
                iat,
                exp,
            )
            .map_err(|e| WebAuthError::internal(format!("generating session token: {e}")))?;

        info!(
            account = %result.client_account,
            home_domain = %result.home_domain,
            "validated classic web-auth challenge"
        );

        Ok(ClassicValidationResponse { token })
    }

    /// Structural validation of a submitted challenge transaction.
    fn read_challenge(&self, encoded: &str) -> WebAuthResult<ChallengeValidationResult> {
        let web_auth_domain = web_auth_domain(&self.base_url)
            .ok_or_else(|| WebAuthError::internal("unable to determine web_auth_domain"))?;

        let envelope = xdr::decode_envelope(encoded)?;
        let TransactionEnvelope::Tx(envelope) = envelope else {
            return Err(WebAuthError::validation(
                "challenge must be a simple v1 transaction",
            ));
        };
        let tx = envelope.tx;

        let MuxedAccount::Ed25519(Uint256(source)) = &tx.source_account else {
            return Err(WebAuthError::validation(
                "transaction source account is not equal to server's account",
            ));
        };
        if *source != self.signing_keypair.public_key_bytes() {
            return Err(WebAuthError::validation(
                "transaction source account is not equal to server's account",
            ));
        }

        if tx.seq_num != SequenceNumber(0) {
            return Err(WebAuthError::validation(
                "transaction sequence number must be 0",
            ));
        }

        let Preconditions::Time(bounds) = &tx.cond else {
            return Err(WebAuthError::validation(
                "transaction requires non-infinite timebounds",
            ));
        };
        if bounds.max_time.0 == 0 {
            return Err(WebAuthError::validation(
                "transaction requires non-infinite timebounds",
            ));
        }
        let now = Utc::now().timestamp();
        if now + TIMEBOUNDS_GRACE_SECONDS < bounds.min_time.0 as i64
            || now > bounds.max_time.0 as i64
        {
            return Err(WebAuthError::validation(
                "transaction is not within range of the specified timebounds",
            ));
        }

        let memo = match &tx.memo {
            Memo::None => None,
            Memo::Id(id) => Some(*id),
            _ => {
                return Err(WebAuthError::validation(
                    "invalid memo, only ID memos are permitted",
                ));
            }
        };

        let operations = tx.operations.to_vec();
        if operations.is_empty() {
            return Err(WebAuthError::validation(
                "transaction requires at least one manage_data operation",
            ));
        }

        // First operation binds the client account and the nonce.
        let (first_source, first_op) = manage_data_parts(&operations[0], 0)?;
        let first_source = first_source.ok_or_else(|| {
            WebAuthError::validation("operation should have a source account")
        })?;
        let client_account = crypto::encode_ed25519_public_key(&first_source);

        let home_domain = {
            let name = first_op.data_name.0.to_utf8_string_lossy();
            let domain = name.strip_suffix(" auth").ok_or_else(|| {
                WebAuthError::validation(format!(
                    "operation key does not match home domain (key={name:?})"
                ))
            })?;
            if !is_valid_home_domain(&self.base_url, domain) {
                return Err(WebAuthError::validation(format!(
                    "operation key does not match home domain (key={name:?})"
                )));
            }
            domain.to_string()
        };

        let nonce_value = first_op
            .data_value
            .as_ref()
            .ok_or_else(|| WebAuthError::validation("challenge is missing a nonce value"))?;
        let nonce = String::from_utf8(nonce_value.0.to_vec())
            .map_err(|_| WebAuthError::validation("challenge nonce is not valid utf-8"))?;
        if nonce.len() != 64 {
            return Err(WebAuthError::validation(
                "random nonce encoded as base64 should be 64 bytes long",
            ));
        }
        let nonce_raw = general_purpose::STANDARD
            .decode(&nonce)
            .map_err(|e| WebAuthError::validation(format!("decoding challenge nonce: {e}")))?;
        if nonce_raw.len() != NONCE_BYTES {
            return Err(WebAuthError::validation(
                "random nonce before encoding as base64 should be 48 bytes long",
            ));
        }

        // Remaining operations must be server-scoped metadata, except a
        // client_domain binding.
        let mut client_domain = None;
        for (index, operation) in operations.iter().enumerate().skip(1) {
            let (source, op) = manage_data_parts(operation, index)?;
            let source = source.ok_or_else(|| {
                WebAuthError::validation(format!(
                    "subsequent operation {index} should have a source account"
                ))
            })?;

            match op.data_name.0.to_utf8_string_lossy().as_str() {
                "web_auth_domain" => {
                    if source != self.signing_keypair.public_key_bytes() {
                        return Err(WebAuthError::validation(
                            "web auth domain operation must have server source account",
                        ));
                    }
                    let value = op
                        .data_value
                        .as_ref()
                        .map(|v| v.0.to_vec())
                        .unwrap_or_default();
                    if value != web_auth_domain.as_bytes() {
                        return Err(WebAuthError::validation(format!(
                            "web auth domain operation value must equal {web_auth_domain}"
                        )));
                    }
                }
                "client_domain" => {
                    let value = op
                        .data_value
                        .as_ref()
                        .map(|v| v.0.to_vec())
                        .unwrap_or_default();
                    let domain = String::from_utf8(value).map_err(|_| {
                        WebAuthError::validation("client_domain value is not valid utf-8")
                    })?;
                    client_domain = Some(domain);
                }
                name => {
                    if source != self.signing_keypair.public_key_bytes() {
                        return Err(WebAuthError::validation(format!(
                            "unknown subsequent operation {name:?} must have server account as source"
                        )));
                    }
                }
            }
        }

        if self.client_attribution_required && client_domain.is_none() {
            return Err(WebAuthError::validation(
                "client_domain manage_data operation is required",
            ));
        }

        let result = ChallengeValidationResult {
            transaction: tx,
            signatures: envelope.signatures.to_vec(),
            client_account,
            home_domain,
            memo,
            client_domain,
            nonce,
        };

        // The server must have signed what it issued.
        self.verify_transaction_signature(&result, self.signing_keypair.address(), "server")?;

        Ok(result)
    }

    /// Check that some envelope signature verifies for the given account.
    fn verify_transaction_signature(
        &self,
        result: &ChallengeValidationResult,
        account: &str,
        account_kind: &str,
    ) -> WebAuthResult<()> {
        if result.signatures.is_empty() {
            return Err(WebAuthError::validation("transaction has no signatures"));
        }
        let public_key = crypto::decode_ed25519_public_key(account).map_err(|e| {
            WebAuthError::validation(format!("parsing {account_kind} account: {e}"))
        })?;
        let hash = xdr::transaction_hash(&result.transaction, self.network_id)?;

        for signature in &result.signatures {
            if crypto::verify_signature(&public_key, &hash, signature.signature.0.as_slice())
                .is_ok()
            {
                return Ok(());
            }
        }

        Err(WebAuthError::validation(format!(
            "transaction is not signed by {account_kind} account {account}"
        )))
    }
}

fn manage_data_op(
    source: Option<[u8; 32]>,
    name: &str,
    value: &[u8],
) -> WebAuthResult<Operation> {
    Ok(Operation {
        source_account: source.map(xdr::muxed_ed25519),
        body: OperationBody::ManageData(ManageDataOp {
            data_name: String64(
                name.try_into()
                    .map_err(|_| WebAuthError::internal(format!("data name {name} too long")))?,
            ),
            data_value: Some(DataValue(value.to_vec().try_into().map_err(|_| {
                WebAuthError::internal(format!("data value for {name} too long"))
            })?)),
        }),
    })
}

fn manage_data_parts(
    operation: &Operation,
    index: usize,
) -> WebAuthResult<(Option<[u8; 32]>, &ManageDataOp)> {
    let OperationBody::ManageData(op) = &operation.body else {
        return Err(WebAuthError::validation(format!(
            "operation {index} type should be manage_data"
        )));
    };
    let source = match &operation.source_account {
        Some(MuxedAccount::Ed25519(Uint256(key))) => Some(*key),
        Some(_) => {
            return Err(WebAuthError::validation(format!(
                "operation {index} has an unsupported source account type"
            )));
        }
        None => None,
    };
    Ok((source, op))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_request_validation() {
        let valid = ClassicChallengeRequest {
            account: Keypair::random().address().to_string(),
            memo: Some("123456".to_string()),
            home_domain: None,
            client_domain: None,
        };
        valid.validate().unwrap();
        assert_eq!(valid.memo_id(), Some(123456));

        let bad_memo = ClassicChallengeRequest {
            memo: Some("not-a-number".to_string()),
            ..valid.clone()
        };
        assert!(bad_memo.validate().is_err());

        let bad_account = ClassicChallengeRequest {
            account: "GABC".to_string(),
            memo: None,
            home_domain: None,
            client_domain: None,
        };
        assert!(bad_account.validate().is_err());
    }

    #[test]
    fn test_manage_data_op_shape() {
        let key = [4u8; 32];
        let op = manage_data_op(Some(key), "web_auth_domain", b"example.com").unwrap();
        let (source, data) = manage_data_parts(&op, 0).unwrap();
        assert_eq!(source, Some(key));
        assert_eq!(data.data_name.0.to_utf8_string_lossy(), "web_auth_domain");
        assert_eq!(
            data.data_value.as_ref().unwrap().0.as_slice(),
            b"example.com"
        );
    }
}
