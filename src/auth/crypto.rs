//! Stellar key material and address codecs
//!
//! Handles strkey encoding/decoding for ed25519 public keys, secret seeds,
//! and contract addresses, plus the server's signing keypair.

use base32::Alphabet;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Version byte for ed25519 public keys ('G...').
const VERSION_ED25519_PUBLIC_KEY: u8 = 6 << 3;
/// Version byte for ed25519 secret seeds ('S...').
const VERSION_ED25519_SECRET_SEED: u8 = 18 << 3;
/// Version byte for contract addresses ('C...').
const VERSION_CONTRACT: u8 = 2 << 3;

/// Errors that can occur during key handling and signature verification
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid Stellar address format: {0}")]
    InvalidAddressFormat(String),

    #[error("Invalid address checksum")]
    InvalidChecksum,

    #[error("Invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid secret seed")]
    InvalidSecretSeed,
}

/// Decode a Stellar public key from G-address format
pub fn decode_ed25519_public_key(address: &str) -> Result<[u8; 32], CryptoError> {
    if !address.starts_with('G') {
        return Err(CryptoError::InvalidAddressFormat(
            "Stellar public keys must start with 'G'".to_string(),
        ));
    }
    decode_strkey(address, VERSION_ED25519_PUBLIC_KEY)
}

/// Encode a raw ed25519 public key as a G-address.
pub fn encode_ed25519_public_key(key: &[u8; 32]) -> String {
    encode_strkey(key, VERSION_ED25519_PUBLIC_KEY)
}

/// Decode a contract address from C-address format
pub fn decode_contract_address(address: &str) -> Result<[u8; 32], CryptoError> {
    if !address.starts_with('C') {
        return Err(CryptoError::InvalidAddressFormat(
            "contract addresses must start with 'C'".to_string(),
        ));
    }
    decode_strkey(address, VERSION_CONTRACT)
}

/// Encode a raw contract id as a C-address.
pub fn encode_contract_address(id: &[u8; 32]) -> String {
    encode_strkey(id, VERSION_CONTRACT)
}

/// Decode an ed25519 secret seed from S-address format
pub fn decode_ed25519_secret_seed(seed: &str) -> Result<[u8; 32], CryptoError> {
    if !seed.starts_with('S') {
        return Err(CryptoError::InvalidSecretSeed);
    }
    decode_strkey(seed, VERSION_ED25519_SECRET_SEED).map_err(|_| CryptoError::InvalidSecretSeed)
}

/// Check whether a string is a syntactically valid ed25519 public key address.
pub fn is_valid_ed25519_public_key(address: &str) -> bool {
    decode_ed25519_public_key(address).is_ok()
}

/// Check whether a string is a syntactically valid contract address.
pub fn is_valid_contract_address(address: &str) -> bool {
    decode_contract_address(address).is_ok()
}

/// Decode a strkey of the expected version.
///
/// Strkeys are base32-encoded with a version byte prefix and a 2-byte
/// CRC16-XModem checksum at the end.
fn decode_strkey(input: &str, version: u8) -> Result<[u8; 32], CryptoError> {
    // Decode base32 (Stellar uses RFC 4648 without padding)
    let decoded = base32::decode(Alphabet::Rfc4648 { padding: false }, input)
        .ok_or_else(|| CryptoError::InvalidAddressFormat("Invalid base32 encoding".to_string()))?;

    // Should be 35 bytes: 1 version byte + 32 payload bytes + 2 checksum bytes
    if decoded.len() != 35 {
        return Err(CryptoError::InvalidAddressFormat(format!(
            "Expected 35 bytes, got {}",
            decoded.len()
        )));
    }

    if decoded[0] != version {
        return Err(CryptoError::InvalidAddressFormat(format!(
            "unexpected version byte {:#04x}",
            decoded[0]
        )));
    }

    // Verify checksum (CRC16-XModem)
    let payload = &decoded[..33];
    let checksum = &decoded[33..35];
    let calculated_checksum = crc16_xmodem(payload);

    if checksum != calculated_checksum {
        return Err(CryptoError::InvalidChecksum);
    }

    // Extract the 32-byte payload (skip version byte)
    let mut out = [0u8; 32];
    out.copy_from_slice(&decoded[1..33]);

    Ok(out)
}

fn encode_strkey(payload: &[u8; 32], version: u8) -> String {
    let mut data = Vec::with_capacity(35);
    data.push(version);
    data.extend_from_slice(payload);
    let checksum = crc16_xmodem(&data);
    data.extend_from_slice(&checksum);
    base32::encode(Alphabet::Rfc4648 { padding: false }, &data)
}

/// Calculate CRC16-XModem checksum (used by Stellar)
fn crc16_xmodem(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0;

    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }

    // Little-endian byte order
    [(crc & 0xff) as u8, (crc >> 8) as u8]
}

/// An ed25519 signing keypair identified by its G-address.
///
/// The secret seed is construction-injected and is deliberately excluded
/// from the Debug representation so it cannot leak into logs.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    address: String,
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Keypair {
    /// Build a keypair from an S-address secret seed.
    pub fn from_secret_seed(seed: &str) -> Result<Self, CryptoError> {
        let raw = decode_ed25519_secret_seed(seed)?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&raw)))
    }

    /// Generate a fresh random keypair.
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = encode_ed25519_public_key(&signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            address,
        }
    }

    /// The G-address of this keypair.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Raw 32-byte public key.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify a signature made by this keypair.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        verify_signature(&self.public_key_bytes(), message, signature)
    }
}

/// Verify an ed25519 signature against a raw public key.
pub fn verify_signature(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let signature = Signature::from_slice(signature)
        .map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_round_trip() {
        let key = [42u8; 32];
        let address = encode_ed25519_public_key(&key);
        assert!(address.starts_with('G'));
        assert_eq!(address.len(), 56);
        assert_eq!(decode_ed25519_public_key(&address).unwrap(), key);
    }

    #[test]
    fn test_contract_address_round_trip() {
        let id = [7u8; 32];
        let address = encode_contract_address(&id);
        assert!(address.starts_with('C'));
        assert_eq!(decode_contract_address(&address).unwrap(), id);
    }

    #[test]
    fn test_invalid_prefix() {
        let address = encode_contract_address(&[1u8; 32]);
        let result = decode_ed25519_public_key(&address);
        assert!(matches!(result, Err(CryptoError::InvalidAddressFormat(_))));
    }

    #[test]
    fn test_corrupted_checksum() {
        let mut address = encode_ed25519_public_key(&[9u8; 32]);
        // Flip a character in the payload section
        let replacement = if address.ends_with('A') { "B" } else { "A" };
        address.replace_range(address.len() - 1.., replacement);
        assert!(decode_ed25519_public_key(&address).is_err());
    }

    #[test]
    fn test_crc16_xmodem() {
        let data = [0x00, 0x01, 0x02];
        let checksum = crc16_xmodem(&data);
        assert_eq!(checksum.len(), 2);
    }

    #[test]
    fn test_keypair_sign_and_verify() {
        let keypair = Keypair::random();
        assert!(is_valid_ed25519_public_key(keypair.address()));

        let message = b"challenge payload";
        let signature = keypair.sign(message);
        keypair.verify(message, &signature).unwrap();

        let other = Keypair::random();
        assert!(matches!(
            other.verify(message, &signature),
            Err(CryptoError::VerificationFailed)
        ));
    }

    #[test]
    fn test_invalid_secret_seed() {
        assert!(Keypair::from_secret_seed("not-a-seed").is_err());
        let address = encode_ed25519_public_key(&[3u8; 32]);
        assert!(matches!(
            Keypair::from_secret_seed(&address),
            Err(CryptoError::InvalidSecretSeed)
        ));
    }

    #[test]
    fn test_keypair_from_seed_is_deterministic() {
        let raw = [5u8; 32];
        let seed = encode_strkey(&raw, VERSION_ED25519_SECRET_SEED);
        let a = Keypair::from_secret_seed(&seed).unwrap();
        let b = Keypair::from_secret_seed(&seed).unwrap();
        assert_eq!(a.address(), b.address());
    }
}
