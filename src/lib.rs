//! LumenPay Web-Authentication Library
//!
//! Challenge/response proof of account control for the LumenPay payment
//! platform, plus the manager that issues and parses every session token
//! the platform uses. Two protocol variants are provided: a classic
//! keypair-based challenge transaction and a smart-contract-account
//! challenge built from simulated contract invocations.
//!
//! The HTTP layer, nonce persistence, and ledger RPC node are external
//! collaborators; this crate models them as traits (`NonceStore`,
//! `LedgerRpcClient`, `DomainKeyFetcher`) with in-crate reference
//! implementations.

pub mod auth;
pub mod config;
pub mod error;
pub mod nonce;
pub mod rpc;
pub mod stellar_toml;
pub mod webauth;

pub use error::{WebAuthError, WebAuthResult};

/// Initialize tracing for binaries and tests embedding this crate.
///
/// Honors `RUST_LOG` when set, falling back to the provided level.
pub fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(true)
        .init();
}
