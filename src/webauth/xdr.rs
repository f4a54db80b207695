//! Authorization-record and transaction XDR helpers
//!
//! Everything that touches the ledger's binary encoding lives here: map
//! entry construction, the canonical authorization hash payload, signing
//! and signature extraction for authorization records, record-set
//! encoding, and unsigned invocation-transaction assembly.

use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use stellar_xdr::next::{
    AccountId, DecoratedSignature, Hash, HashIdPreimage, HashIdPreimageSorobanAuthorization,
    HostFunction, InvokeContractArgs, InvokeHostFunctionOp, Limits, Memo, MuxedAccount, Operation,
    OperationBody, Preconditions, PublicKey, ReadXdr, ScAddress, ScBytes, ScMap, ScMapEntry,
    ScString, ScSymbol, ScVal, ScVec, SequenceNumber, Signature, SignatureHint,
    SorobanAuthorizationEntry, SorobanCredentials, TimeBounds, TimePoint, Transaction,
    TransactionEnvelope, TransactionExt, TransactionSignaturePayload,
    TransactionSignaturePayloadTaggedTransaction, TransactionV1Envelope, Uint256, VecM, WriteXdr,
};

use crate::auth::crypto::{encode_ed25519_public_key, Keypair};
use crate::error::{WebAuthError, WebAuthResult};

/// Minimum per-operation base fee, in stroops.
pub const MIN_BASE_FEE: u32 = 100;

/// Cap applied when decoding untrusted XDR input.
fn read_limits() -> Limits {
    Limits::len(1_048_576)
}

/// Build a symbol-keyed, string-valued map entry.
pub fn symbol_string_entry(key: &str, value: &str) -> WebAuthResult<ScMapEntry> {
    Ok(ScMapEntry {
        key: ScVal::Symbol(symbol(key)?),
        val: ScVal::String(ScString(value.try_into().map_err(|_| {
            WebAuthError::internal(format!("argument value for {key} is too long"))
        })?)),
    })
}

fn symbol_bytes_entry(key: &str, value: Vec<u8>) -> WebAuthResult<ScMapEntry> {
    Ok(ScMapEntry {
        key: ScVal::Symbol(symbol(key)?),
        val: ScVal::Bytes(ScBytes(value.try_into().map_err(|_| {
            WebAuthError::internal(format!("byte value for {key} is too long"))
        })?)),
    })
}

pub fn symbol(name: &str) -> WebAuthResult<ScSymbol> {
    Ok(ScSymbol(name.try_into().map_err(|_| {
        WebAuthError::internal(format!("symbol {name} is too long"))
    })?))
}

/// Muxed source account from a raw ed25519 public key.
pub fn muxed_ed25519(public_key: [u8; 32]) -> MuxedAccount {
    MuxedAccount::Ed25519(Uint256(public_key))
}

/// Account id from a raw ed25519 public key.
pub fn account_id(public_key: [u8; 32]) -> AccountId {
    AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(public_key)))
}

/// The raw ed25519 key behind an account id.
pub fn account_id_bytes(account: &AccountId) -> [u8; 32] {
    let AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(bytes))) = account;
    *bytes
}

/// The G-address of an account id.
pub fn account_id_address(account: &AccountId) -> String {
    encode_ed25519_public_key(&account_id_bytes(account))
}

/// Decode a base64 length-prefixed set of authorization records.
pub fn decode_entries(encoded: &str) -> WebAuthResult<Vec<SorobanAuthorizationEntry>> {
    let raw = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| WebAuthError::validation(format!("decoding authorization entries: {e}")))?;
    let entries = VecM::<SorobanAuthorizationEntry>::from_xdr(raw, read_limits()).map_err(|e| {
        WebAuthError::validation(format!("unmarshalling authorization entries: {e}"))
    })?;
    Ok(entries.to_vec())
}

/// Encode a set of authorization records as base64 length-prefixed XDR.
pub fn encode_entries(entries: &[SorobanAuthorizationEntry]) -> WebAuthResult<String> {
    let entries: VecM<SorobanAuthorizationEntry> = entries
        .to_vec()
        .try_into()
        .map_err(|_| WebAuthError::internal("encoding authorization entries: too many entries"))?;
    let raw = entries
        .to_xdr(Limits::none())
        .map_err(|e| WebAuthError::internal(format!("encoding authorization entries: {e}")))?;
    Ok(general_purpose::STANDARD.encode(raw))
}

/// Decode one base64 authorization record, as returned by simulation.
pub fn decode_entry(encoded: &str) -> WebAuthResult<SorobanAuthorizationEntry> {
    let raw = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| WebAuthError::internal(format!("decoding authorization entry: {e}")))?;
    SorobanAuthorizationEntry::from_xdr(raw, read_limits())
        .map_err(|e| WebAuthError::internal(format!("unmarshalling authorization entry: {e}")))
}

/// The canonical hash payload a signer commits to for an authorization
/// record: {network id, nonce, signature expiration ledger, invocation}.
pub fn authorization_payload(
    entry: &SorobanAuthorizationEntry,
    network_id: [u8; 32],
) -> WebAuthResult<[u8; 32]> {
    let SorobanCredentials::Address(credentials) = &entry.credentials else {
        return Err(WebAuthError::internal(
            "authorization entry missing address credentials",
        ));
    };

    let preimage = HashIdPreimage::SorobanAuthorization(HashIdPreimageSorobanAuthorization {
        network_id: Hash(network_id),
        nonce: credentials.nonce,
        signature_expiration_ledger: credentials.signature_expiration_ledger,
        invocation: entry.root_invocation.clone(),
    });
    let raw = preimage
        .to_xdr(Limits::none())
        .map_err(|e| WebAuthError::internal(format!("marshalling authorization preimage: {e}")))?;
    Ok(Sha256::digest(raw).into())
}

/// Sign an authorization record if it belongs to the signing account.
///
/// Records for other credentials pass through untouched. The signature is
/// valid until `valid_until` and is attached as the `[{public_key,
/// signature}]` blob the ledger expects.
pub fn sign_auth_entry(
    entry: SorobanAuthorizationEntry,
    valid_until: u32,
    keypair: &Keypair,
    network_id: [u8; 32],
) -> WebAuthResult<SorobanAuthorizationEntry> {
    {
        let SorobanCredentials::Address(credentials) = &entry.credentials else {
            return Ok(entry);
        };
        let ScAddress::Account(account) = &credentials.address else {
            return Ok(entry);
        };
        if account_id_bytes(account) != keypair.public_key_bytes() {
            return Ok(entry);
        }
    }

    let mut signed = entry;
    let SorobanCredentials::Address(credentials) = &mut signed.credentials else {
        unreachable!("credentials checked above");
    };
    credentials.signature_expiration_ledger = valid_until;

    let payload = authorization_payload(&signed, network_id)?;
    let signature = keypair.sign(&payload);
    keypair
        .verify(&payload, &signature)
        .map_err(|e| WebAuthError::internal(format!("signature verification failed: {e}")))?;

    let signature_map = ScMap(
        vec![
            symbol_bytes_entry("public_key", keypair.public_key_bytes().to_vec())?,
            symbol_bytes_entry("signature", signature.to_vec())?,
        ]
        .try_into()
        .map_err(|_| WebAuthError::internal("building signature map"))?,
    );
    let signature_vec = ScVec(
        vec![ScVal::Map(Some(signature_map))]
            .try_into()
            .map_err(|_| WebAuthError::internal("building signature vector"))?,
    );

    let SorobanCredentials::Address(credentials) = &mut signed.credentials else {
        unreachable!("credentials checked above");
    };
    credentials.signature = ScVal::Vec(Some(signature_vec));
    Ok(signed)
}

/// Pull the `{public_key, signature}` blob out of a signed record's
/// signature value.
pub fn extract_signature(signature: &ScVal) -> WebAuthResult<(Vec<u8>, Vec<u8>)> {
    let ScVal::Vec(Some(vector)) = signature else {
        return Err(WebAuthError::validation("signature must be a vector"));
    };
    let Some(ScVal::Map(Some(entries))) = vector.0.as_slice().first() else {
        return Err(WebAuthError::validation("signature must be a map"));
    };

    let mut public_key: Vec<u8> = Vec::new();
    let mut signature_bytes: Vec<u8> = Vec::new();
    for entry in entries.0.iter() {
        let ScVal::Symbol(key) = &entry.key else {
            continue;
        };
        match key.0.to_utf8_string_lossy().as_str() {
            "public_key" => {
                let ScVal::Bytes(bytes) = &entry.val else {
                    return Err(WebAuthError::validation(
                        "signature public key must be bytes",
                    ));
                };
                public_key = bytes.0.to_vec();
            }
            "signature" => {
                let ScVal::Bytes(bytes) = &entry.val else {
                    return Err(WebAuthError::validation("signature bytes missing"));
                };
                signature_bytes = bytes.0.to_vec();
            }
            _ => {}
        }
    }

    if public_key.is_empty() {
        return Err(WebAuthError::validation("signature missing public key"));
    }
    if signature_bytes.is_empty() {
        return Err(WebAuthError::validation("signature missing value"));
    }
    Ok((public_key, signature_bytes))
}

/// Assemble an unsigned invocation transaction around a contract call.
///
/// The transaction source is an ephemeral account so the server's own
/// signing account surfaces as a separate authorization record instead of
/// being folded into the transaction source.
pub fn invocation_transaction(
    contract_id: [u8; 32],
    function_name: &str,
    args: VecM<ScVal>,
    source_public_key: [u8; 32],
    operation_source: Option<[u8; 32]>,
    auth: Vec<SorobanAuthorizationEntry>,
    timeout_seconds: u64,
) -> WebAuthResult<String> {
    let host_function = HostFunction::InvokeContract(InvokeContractArgs {
        contract_address: ScAddress::Contract(Hash(contract_id)),
        function_name: symbol(function_name)?,
        args,
    });

    let operation = Operation {
        source_account: operation_source.map(muxed_ed25519),
        body: OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
            host_function,
            auth: auth
                .try_into()
                .map_err(|_| WebAuthError::internal("too many authorization entries"))?,
        }),
    };

    let now = chrono::Utc::now().timestamp() as u64;
    let tx = Transaction {
        source_account: muxed_ed25519(source_public_key),
        fee: MIN_BASE_FEE,
        seq_num: SequenceNumber(0),
        cond: Preconditions::Time(TimeBounds {
            min_time: TimePoint(0),
            max_time: TimePoint(now + timeout_seconds),
        }),
        memo: Memo::None,
        operations: vec![operation]
            .try_into()
            .map_err(|_| WebAuthError::internal("building transaction operations"))?,
        ext: TransactionExt::V0,
    };

    encode_envelope(&TransactionEnvelope::Tx(TransactionV1Envelope {
        tx,
        signatures: VecM::default(),
    }))
}

/// Encode a transaction envelope as base64 XDR.
pub fn encode_envelope(envelope: &TransactionEnvelope) -> WebAuthResult<String> {
    let raw = envelope
        .to_xdr(Limits::none())
        .map_err(|e| WebAuthError::internal(format!("encoding transaction: {e}")))?;
    Ok(general_purpose::STANDARD.encode(raw))
}

/// Decode a base64 transaction envelope submitted by a caller.
pub fn decode_envelope(encoded: &str) -> WebAuthResult<TransactionEnvelope> {
    let raw = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| WebAuthError::validation(format!("decoding transaction: {e}")))?;
    TransactionEnvelope::from_xdr(raw, read_limits())
        .map_err(|e| WebAuthError::validation(format!("unmarshalling transaction: {e}")))
}

/// The hash a transaction's signers commit to on this network.
pub fn transaction_hash(tx: &Transaction, network_id: [u8; 32]) -> WebAuthResult<[u8; 32]> {
    let payload = TransactionSignaturePayload {
        network_id: Hash(network_id),
        tagged_transaction: TransactionSignaturePayloadTaggedTransaction::Tx(tx.clone()),
    };
    let raw = payload
        .to_xdr(Limits::none())
        .map_err(|e| WebAuthError::internal(format!("marshalling signature payload: {e}")))?;
    Ok(Sha256::digest(raw).into())
}

/// Sign a transaction hash, producing the hinted signature the envelope
/// carries.
pub fn decorated_signature(
    keypair: &Keypair,
    hash: &[u8; 32],
) -> WebAuthResult<DecoratedSignature> {
    let public_key = keypair.public_key_bytes();
    let mut hint = [0u8; 4];
    hint.copy_from_slice(&public_key[28..]);
    let signature = keypair.sign(hash);
    Ok(DecoratedSignature {
        hint: SignatureHint(hint),
        signature: Signature(
            signature
                .to_vec()
                .try_into()
                .map_err(|_| WebAuthError::internal("building decorated signature"))?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stellar_xdr::next::{
        ScAddress, SorobanAddressCredentials, SorobanAuthorizedFunction,
        SorobanAuthorizedInvocation,
    };

    use crate::webauth::{network_id, ChallengeArgs, WEB_AUTH_FUNCTION_NAME};

    fn sample_entry(address: ScAddress) -> SorobanAuthorizationEntry {
        let args = ChallengeArgs::new(
            &crate::auth::crypto::encode_contract_address(&[1u8; 32]),
            "example.com",
            None,
            "12345",
            "example.com",
            &Keypair::random().address().to_string(),
        );
        SorobanAuthorizationEntry {
            credentials: SorobanCredentials::Address(SorobanAddressCredentials {
                address,
                nonce: 42,
                signature_expiration_ledger: 0,
                signature: ScVal::Void,
            }),
            root_invocation: SorobanAuthorizedInvocation {
                function: SorobanAuthorizedFunction::ContractFn(InvokeContractArgs {
                    contract_address: ScAddress::Contract(Hash([9u8; 32])),
                    function_name: symbol(WEB_AUTH_FUNCTION_NAME).unwrap(),
                    args: args.to_invocation_args().unwrap(),
                }),
                sub_invocations: VecM::default(),
            },
        }
    }

    #[test]
    fn test_entry_set_round_trip() {
        let entry = sample_entry(ScAddress::Contract(Hash([3u8; 32])));
        let encoded = encode_entries(&[entry.clone(), entry.clone()]).unwrap();
        let decoded = decode_entries(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], entry);
    }

    #[test]
    fn test_decode_entries_rejects_garbage() {
        assert!(decode_entries("not base64!!!").is_err());
        let garbage = general_purpose::STANDARD.encode([0xffu8; 16]);
        assert!(decode_entries(&garbage).is_err());
    }

    #[test]
    fn test_sign_auth_entry_attaches_verifiable_signature() {
        let keypair = Keypair::random();
        let net_id = network_id("Test SDF Network ; September 2015");
        let entry = sample_entry(ScAddress::Account(account_id(keypair.public_key_bytes())));

        let signed = sign_auth_entry(entry, 1234, &keypair, net_id).unwrap();
        let SorobanCredentials::Address(credentials) = &signed.credentials else {
            panic!("expected address credentials");
        };
        assert_eq!(credentials.signature_expiration_ledger, 1234);

        let (public_key, signature) = extract_signature(&credentials.signature).unwrap();
        assert_eq!(public_key, keypair.public_key_bytes().to_vec());

        let payload = authorization_payload(&signed, net_id).unwrap();
        keypair.verify(&payload, &signature).unwrap();
    }

    #[test]
    fn test_sign_auth_entry_skips_other_accounts() {
        let keypair = Keypair::random();
        let other = Keypair::random();
        let net_id = network_id("Test SDF Network ; September 2015");
        let entry = sample_entry(ScAddress::Account(account_id(other.public_key_bytes())));

        let result = sign_auth_entry(entry.clone(), 1234, &keypair, net_id).unwrap();
        assert_eq!(result, entry);

        let contract_entry = sample_entry(ScAddress::Contract(Hash([3u8; 32])));
        let result = sign_auth_entry(contract_entry.clone(), 1234, &keypair, net_id).unwrap();
        assert_eq!(result, contract_entry);
    }

    #[test]
    fn test_extract_signature_rejects_malformed_blobs() {
        assert!(extract_signature(&ScVal::Void).is_err());

        let empty_vec = ScVal::Vec(Some(ScVec(VecM::default())));
        assert!(extract_signature(&empty_vec).is_err());
    }

    #[test]
    fn test_invocation_transaction_round_trip() {
        let args = ChallengeArgs::new(
            &crate::auth::crypto::encode_contract_address(&[1u8; 32]),
            "example.com",
            None,
            "12345",
            "example.com",
            &Keypair::random().address().to_string(),
        );
        let source = Keypair::random();
        let encoded = invocation_transaction(
            [9u8; 32],
            WEB_AUTH_FUNCTION_NAME,
            args.to_invocation_args().unwrap(),
            source.public_key_bytes(),
            None,
            vec![],
            300,
        )
        .unwrap();

        let TransactionEnvelope::Tx(envelope) = decode_envelope(&encoded).unwrap() else {
            panic!("expected v1 transaction envelope");
        };
        assert_eq!(envelope.tx.fee, MIN_BASE_FEE);
        assert_eq!(envelope.tx.seq_num, SequenceNumber(0));
        assert!(envelope.signatures.is_empty());
        assert_eq!(envelope.tx.operations.len(), 1);
    }

    #[test]
    fn test_transaction_hash_and_decorated_signature() {
        let keypair = Keypair::random();
        let net_id = network_id("Test SDF Network ; September 2015");
        let encoded = invocation_transaction(
            [9u8; 32],
            WEB_AUTH_FUNCTION_NAME,
            VecM::default(),
            keypair.public_key_bytes(),
            None,
            vec![],
            300,
        )
        .unwrap();
        let TransactionEnvelope::Tx(envelope) = decode_envelope(&encoded).unwrap() else {
            panic!("expected v1 transaction envelope");
        };

        let hash = transaction_hash(&envelope.tx, net_id).unwrap();
        let signature = decorated_signature(&keypair, &hash).unwrap();
        assert_eq!(&signature.hint.0[..], &keypair.public_key_bytes()[28..32]);
        keypair
            .verify(&hash, signature.signature.0.as_slice())
            .unwrap();
    }
}
