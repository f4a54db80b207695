//! Authorization-record tracking during challenge validation
//!
//! A small state machine driven once per submitted record. It classifies
//! each record by its credential address, verifies the server's embedded
//! signature on the spot, and reports which required record kinds are
//! still missing at the end.

use stellar_xdr::next::{ScAddress, SorobanAuthorizationEntry, SorobanCredentials};

use crate::auth::crypto::{encode_contract_address, Keypair};
use crate::error::{WebAuthError, WebAuthResult};

use super::xdr;

/// What the tracker needs to know about the challenge being validated.
pub(crate) struct TrackerContext<'a> {
    pub server: &'a Keypair,
    pub client_contract_id: [u8; 32],
    pub client_domain_account: Option<&'a str>,
    pub network_id: [u8; 32],
}

/// Tracks which required authorization records have been found.
#[derive(Debug, Default)]
pub(crate) struct AuthEntryTracker {
    server_verified: bool,
    client_found: bool,
    client_domain_found: bool,
}

impl AuthEntryTracker {
    /// Classify one record and update the tracker state.
    pub fn process_entry(
        &mut self,
        entry: &SorobanAuthorizationEntry,
        ctx: &TrackerContext<'_>,
    ) -> WebAuthResult<()> {
        let SorobanCredentials::Address(credentials) = &entry.credentials else {
            return Err(WebAuthError::validation(
                "authorization entry missing address credentials",
            ));
        };

        match &credentials.address {
            ScAddress::Account(account) => {
                let address = xdr::account_id_address(account);
                if address == ctx.server.address() {
                    self.verify_server_entry(entry, ctx)?;
                    self.server_verified = true;
                } else if ctx.client_domain_account == Some(address.as_str()) {
                    self.client_domain_found = true;
                } else {
                    return Err(WebAuthError::validation(format!(
                        "unexpected account authorization entry: {address}"
                    )));
                }
            }
            ScAddress::Contract(contract) => {
                if contract.0 == ctx.client_contract_id {
                    self.client_found = true;
                } else {
                    return Err(WebAuthError::validation(format!(
                        "unexpected contract authorization entry: {}",
                        encode_contract_address(&contract.0)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Ensure all required record kinds are present.
    pub fn validate(&self, require_client_domain: bool) -> WebAuthResult<()> {
        if !self.server_verified {
            return Err(WebAuthError::validation(
                "missing signed server authorization entry",
            ));
        }
        if !self.client_found {
            return Err(WebAuthError::validation(
                "missing client account authorization entry",
            ));
        }
        if require_client_domain && !self.client_domain_found {
            return Err(WebAuthError::validation(
                "missing client domain authorization entry",
            ));
        }
        Ok(())
    }

    /// Verify the server's own record: the embedded signature blob must
    /// carry the server's public key and a valid signature over the
    /// canonical authorization payload.
    fn verify_server_entry(
        &self,
        entry: &SorobanAuthorizationEntry,
        ctx: &TrackerContext<'_>,
    ) -> WebAuthResult<()> {
        let SorobanCredentials::Address(credentials) = &entry.credentials else {
            return Err(WebAuthError::validation(
                "server authorization entry missing address credentials",
            ));
        };
        if !matches!(credentials.signature, stellar_xdr::next::ScVal::Vec(_)) {
            return Err(WebAuthError::validation(
                "server authorization entry missing signature",
            ));
        }
        if credentials.signature_expiration_ledger == 0 {
            return Err(WebAuthError::validation(
                "server authorization entry missing expiration ledger",
            ));
        }

        let (public_key, signature) = xdr::extract_signature(&credentials.signature)?;
        if public_key != ctx.server.public_key_bytes() {
            return Err(WebAuthError::validation(
                "server authorization entry signed by unexpected key",
            ));
        }

        // The expiration ledger itself is checked again by the network
        // during simulation.
        let payload = xdr::authorization_payload(entry, ctx.network_id)?;
        ctx.server.verify(&payload, &signature).map_err(|e| {
            WebAuthError::validation(format!(
                "server authorization entry signature invalid: {e}"
            ))
        })
    }
}
