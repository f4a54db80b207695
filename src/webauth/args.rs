//! Canonical challenge arguments
//!
//! The challenge invocation takes a single map argument whose field order
//! is significant: it feeds a deterministic binary encoder whose output
//! must be byte-identical between challenge issuance and later
//! validation. The arguments are therefore kept as an explicit ordered
//! list of pairs, never a native unordered map.

use stellar_xdr::next::{ScMap, ScVal, VecM};

use crate::error::{WebAuthError, WebAuthResult};

use super::xdr;

pub const ARG_ACCOUNT: &str = "account";
pub const ARG_CLIENT_DOMAIN: &str = "client_domain";
pub const ARG_CLIENT_DOMAIN_ACCOUNT: &str = "client_domain_account";
pub const ARG_HOME_DOMAIN: &str = "home_domain";
pub const ARG_NONCE: &str = "nonce";
pub const ARG_WEB_AUTH_DOMAIN: &str = "web_auth_domain";
pub const ARG_WEB_AUTH_DOMAIN_ACCOUNT: &str = "web_auth_domain_account";

/// The ordered key/value pairs of a challenge invocation.
///
/// Construction fixes the lexicographical field order:
/// {account, [client_domain, client_domain_account], home_domain, nonce,
/// web_auth_domain, web_auth_domain_account}.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeArgs {
    entries: Vec<(String, String)>,
}

impl ChallengeArgs {
    pub fn new(
        account: &str,
        home_domain: &str,
        client_domain: Option<(&str, &str)>,
        nonce: &str,
        web_auth_domain: &str,
        web_auth_domain_account: &str,
    ) -> Self {
        let mut entries = vec![(ARG_ACCOUNT.to_string(), account.to_string())];
        if let Some((domain, domain_account)) = client_domain {
            entries.push((ARG_CLIENT_DOMAIN.to_string(), domain.to_string()));
            entries.push((
                ARG_CLIENT_DOMAIN_ACCOUNT.to_string(),
                domain_account.to_string(),
            ));
        }
        entries.push((ARG_HOME_DOMAIN.to_string(), home_domain.to_string()));
        entries.push((ARG_NONCE.to_string(), nonce.to_string()));
        entries.push((ARG_WEB_AUTH_DOMAIN.to_string(), web_auth_domain.to_string()));
        entries.push((
            ARG_WEB_AUTH_DOMAIN_ACCOUNT.to_string(),
            web_auth_domain_account.to_string(),
        ));
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Field-for-field equality, independent of pair order.
    pub fn matches(&self, other: &ChallengeArgs) -> bool {
        self.len() == other.len()
            && other
                .entries
                .iter()
                .all(|(key, value)| self.get(key) == Some(value.as_str()))
    }

    /// Encode into the invocation argument list: a single value holding a
    /// symbol-to-string map in this instance's pair order.
    pub fn to_invocation_args(&self) -> WebAuthResult<VecM<ScVal>> {
        let mut map_entries = Vec::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            map_entries.push(xdr::symbol_string_entry(key, value)?);
        }
        let map = ScMap(map_entries.try_into().map_err(|_| {
            WebAuthError::internal("building invocation arguments: map too large")
        })?);
        vec![ScVal::Map(Some(map))].try_into().map_err(|_| {
            WebAuthError::internal("building invocation arguments: argument list too large")
        })
    }

    /// Decode from a submitted invocation argument list. The list must
    /// contain exactly one map whose keys are symbols and whose values are
    /// strings; values are trimmed of surrounding whitespace.
    pub fn from_invocation_args(args: &VecM<ScVal>) -> WebAuthResult<Self> {
        if args.len() != 1 {
            return Err(WebAuthError::validation(
                "authorization entry must contain a single argument map",
            ));
        }
        let ScVal::Map(Some(map)) = &args.as_slice()[0] else {
            return Err(WebAuthError::validation(
                "authorization entry arguments must be a map",
            ));
        };

        let mut entries = Vec::with_capacity(map.0.len());
        for entry in map.0.iter() {
            let ScVal::Symbol(symbol) = &entry.key else {
                return Err(WebAuthError::validation(
                    "authorization argument key must be a symbol",
                ));
            };
            let key = symbol.0.to_utf8_string_lossy();
            let ScVal::String(value) = &entry.val else {
                return Err(WebAuthError::validation(format!(
                    "authorization argument {key} must be a string"
                )));
            };
            entries.push((key, value.0.to_utf8_string_lossy().trim().to_string()));
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChallengeArgs {
        ChallengeArgs::new(
            "CCONTRACT",
            "example.com",
            Some(("wallet.example.com", "GCLIENTDOMAIN")),
            "12345",
            "example.com",
            "GSERVER",
        )
    }

    #[test]
    fn test_field_order_is_fixed() {
        let args = sample();
        let keys: Vec<&str> = args.entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "account",
                "client_domain",
                "client_domain_account",
                "home_domain",
                "nonce",
                "web_auth_domain",
                "web_auth_domain_account",
            ]
        );
    }

    #[test]
    fn test_omits_client_domain_when_absent() {
        let args = ChallengeArgs::new(
            "CCONTRACT",
            "example.com",
            None,
            "12345",
            "example.com",
            "GSERVER",
        );
        assert_eq!(args.len(), 5);
        assert_eq!(args.get(ARG_CLIENT_DOMAIN), None);
    }

    #[test]
    fn test_round_trip_through_invocation_args() {
        let args = sample();
        let encoded = args.to_invocation_args().unwrap();
        let decoded = ChallengeArgs::from_invocation_args(&encoded).unwrap();
        assert_eq!(args, decoded);
        assert!(args.matches(&decoded));
    }

    #[test]
    fn test_matches_detects_divergence() {
        let args = sample();
        let mut other = sample();
        other.entries[4].1 = "99999".to_string();
        assert!(!args.matches(&other));

        let shorter = ChallengeArgs::new(
            "CCONTRACT",
            "example.com",
            None,
            "12345",
            "example.com",
            "GSERVER",
        );
        assert!(!args.matches(&shorter));
    }

    #[test]
    fn test_from_invocation_args_rejects_non_map() {
        let args: VecM<ScVal> = vec![ScVal::U32(7)].try_into().unwrap();
        let result = ChallengeArgs::from_invocation_args(&args);
        assert!(result.is_err());

        let empty: VecM<ScVal> = VecM::default();
        assert!(ChallengeArgs::from_invocation_args(&empty).is_err());
    }
}
