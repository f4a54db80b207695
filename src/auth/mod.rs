//! Key material and session tokens
//!
//! - Strkey codecs and the server signing keypair
//! - Session token issuance and parsing for all four token variants

pub mod crypto;
pub mod jwt;

pub use crypto::Keypair;
pub use jwt::{
    ClassicSessionClaims, ContractSessionClaims, DepositSessionClaims, ServiceClaims,
    TokenManager,
};
