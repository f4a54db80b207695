//! Ledger RPC client
//!
//! Simulates unsigned transactions against a Soroban RPC node and reports
//! the latest ledger height. Simulation failures are categorized so the
//! web-auth services can tell caller-caused failures (bad authorization,
//! contract rejection, unparsable transaction) from infrastructure ones.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// The category of a simulation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationErrorKind {
    /// Network/transport errors
    Network,
    /// Transaction parsing errors
    TransactionInvalid,
    /// Authorization errors
    Auth,
    /// Contract execution errors
    ContractExecution,
    /// Resource errors
    Resource,
    /// Unknown simulation errors
    Unknown,
}

impl SimulationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationErrorKind::Network => "network",
            SimulationErrorKind::TransactionInvalid => "transaction_invalid",
            SimulationErrorKind::Auth => "auth",
            SimulationErrorKind::ContractExecution => "contract_execution",
            SimulationErrorKind::Resource => "resource",
            SimulationErrorKind::Unknown => "unknown",
        }
    }
}

/// A structured error from RPC simulation.
#[derive(Error, Debug)]
#[error("simulation {} error: {message}", .kind.as_str())]
pub struct SimulationError {
    pub kind: SimulationErrorKind,
    pub message: String,
}

impl SimulationError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: SimulationErrorKind::Network,
            message: message.into(),
        }
    }

    /// Categorize an error string reported inside a simulation response.
    pub fn from_response_error(message: &str) -> Self {
        Self {
            kind: categorize(message),
            message: message.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            SimulationErrorKind::Network | SimulationErrorKind::Resource
        )
    }
}

fn categorize(message: &str) -> SimulationErrorKind {
    if message.is_empty() {
        return SimulationErrorKind::Unknown;
    }

    let msg = message.to_lowercase();

    if is_contract_execution_error(&msg) {
        return SimulationErrorKind::ContractExecution;
    }
    if is_resource_error(&msg) {
        return SimulationErrorKind::Resource;
    }
    if is_transaction_invalid_error(&msg) {
        return SimulationErrorKind::TransactionInvalid;
    }
    if is_auth_error(&msg) {
        return SimulationErrorKind::Auth;
    }

    SimulationErrorKind::Unknown
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn is_transaction_invalid_error(msg: &str) -> bool {
    contains_any(msg, &["unmarshal", "parse", "decode", "invalid transaction"])
}

fn is_auth_error(msg: &str) -> bool {
    contains_any(msg, &["authorization", "signature", "unauthorized"])
}

fn is_contract_execution_error(msg: &str) -> bool {
    contains_any(
        msg,
        &[
            "contract execution failed",
            "contract error",
            "contract panic",
            "hosterror: error(storage,",
            "contract already exists",
            "wasm does not exist",
            "existingvalue)",
            "missingvalue)",
        ],
    )
}

fn is_resource_error(msg: &str) -> bool {
    contains_any(
        msg,
        &[
            "resource",
            "cpu limit",
            "memory limit",
            "instructions limit",
            "limit exceeded",
        ],
    )
}

/// Successful simulation output: the authorization records the invocation
/// requires (base64 XDR, one per required signer) and the node's latest
/// ledger height.
#[derive(Debug, Clone)]
pub struct SimulationResponse {
    pub auth_entries: Vec<String>,
    pub latest_ledger: u32,
}

/// Interface to the ledger RPC node.
#[async_trait]
pub trait LedgerRpcClient: Send + Sync {
    /// Simulate an unsigned transaction, returning the authorization
    /// records it requires.
    async fn simulate_transaction(
        &self,
        transaction_base64: &str,
    ) -> Result<SimulationResponse, SimulationError>;

    /// The latest ledger sequence known to the node.
    async fn latest_ledger_sequence(&self) -> Result<u32, SimulationError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulateTransactionResult {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: Vec<SimulateHostFunctionResult>,
    #[serde(default)]
    latest_ledger: u32,
}

#[derive(Debug, Deserialize)]
struct SimulateHostFunctionResult {
    #[serde(default)]
    auth: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LatestLedgerResult {
    sequence: u32,
}

/// JSON-RPC client for a Soroban RPC node.
pub struct SorobanRpcClient {
    http: Client,
    rpc_url: String,
    auth_header: Option<(String, String)>,
}

impl SorobanRpcClient {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            rpc_url: rpc_url.into(),
            auth_header: None,
        }
    }

    /// Attach a request header used for authentication with the RPC node.
    pub fn with_auth_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_header = Some((key.into(), value.into()));
        self
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, SimulationError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut request = self.http.post(&self.rpc_url).json(&payload);
        if let Some((key, value)) = &self.auth_header {
            request = request.header(key.as_str(), value.as_str());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| SimulationError::network(format!("calling {method}: {e}")))?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| SimulationError::network(format!("reading {method} response: {e}")))?;

        if let Some(err) = resp.get("error") {
            return Err(SimulationError::network(format!("RPC error: {err}")));
        }

        resp.get("result")
            .cloned()
            .ok_or_else(|| SimulationError::network(format!("no result in {method} response")))
    }
}

#[async_trait]
impl LedgerRpcClient for SorobanRpcClient {
    async fn simulate_transaction(
        &self,
        transaction_base64: &str,
    ) -> Result<SimulationResponse, SimulationError> {
        let result = self
            .call(
                "simulateTransaction",
                json!({ "transaction": transaction_base64 }),
            )
            .await?;

        let result: SimulateTransactionResult = serde_json::from_value(result)
            .map_err(|e| SimulationError::network(format!("decoding simulation result: {e}")))?;

        if let Some(error) = result.error.as_deref() {
            if !error.is_empty() {
                return Err(SimulationError::from_response_error(error));
            }
        }

        let auth_entries = result
            .results
            .into_iter()
            .next()
            .map(|r| r.auth)
            .unwrap_or_default();

        Ok(SimulationResponse {
            auth_entries,
            latest_ledger: result.latest_ledger,
        })
    }

    async fn latest_ledger_sequence(&self) -> Result<u32, SimulationError> {
        let result = self.call("getLatestLedger", json!({})).await?;
        let result: LatestLedgerResult = serde_json::from_value(result)
            .map_err(|e| SimulationError::network(format!("decoding latest ledger: {e}")))?;
        Ok(result.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_auth_errors() {
        let err = SimulationError::from_response_error("recording authorization only mode");
        assert_eq!(err.kind, SimulationErrorKind::Auth);

        let err = SimulationError::from_response_error("bad signature weight");
        assert_eq!(err.kind, SimulationErrorKind::Auth);
    }

    #[test]
    fn test_categorize_contract_errors() {
        let err = SimulationError::from_response_error("HostError: Error(Storage, MissingValue)");
        assert_eq!(err.kind, SimulationErrorKind::ContractExecution);

        let err = SimulationError::from_response_error("contract execution failed: panicked");
        assert_eq!(err.kind, SimulationErrorKind::ContractExecution);
    }

    #[test]
    fn test_categorize_transaction_invalid_errors() {
        let err = SimulationError::from_response_error("cannot unmarshal envelope");
        assert_eq!(err.kind, SimulationErrorKind::TransactionInvalid);
    }

    #[test]
    fn test_categorize_resource_errors() {
        let err = SimulationError::from_response_error("cpu limit exceeded");
        assert_eq!(err.kind, SimulationErrorKind::Resource);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_categorize_unknown() {
        let err = SimulationError::from_response_error("something odd happened");
        assert_eq!(err.kind, SimulationErrorKind::Unknown);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SimulationError::network("connection refused");
        assert_eq!(
            err.to_string(),
            "simulation network error: connection refused"
        );
        assert!(err.is_retryable());
    }
}
