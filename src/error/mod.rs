//! Centralized error handling for the web-authentication subsystem
//!
//! Every failure in this crate resolves into one of two sentinel kinds:
//! validation errors (caller-caused, 4xx-equivalent) and internal errors
//! (server/infra-caused, 5xx-equivalent). The kind at the top determines
//! the caller-visible status; the message carries the chained context.

use thiserror::Error;

/// Subsystem error partitioned into the two caller-visible kinds.
#[derive(Error, Debug)]
pub enum WebAuthError {
    /// The caller submitted something malformed, replayed, or inconsistent.
    #[error("validation error: {0}")]
    Validation(String),

    /// The service or one of its collaborators failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WebAuthError {
    /// Wrap a caller-caused failure.
    pub fn validation(message: impl Into<String>) -> Self {
        WebAuthError::Validation(message.into())
    }

    /// Wrap a server/infra-caused failure.
    pub fn internal(message: impl Into<String>) -> Self {
        WebAuthError::Internal(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, WebAuthError::Validation(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, WebAuthError::Internal(_))
    }

    /// The wrapped message, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            WebAuthError::Validation(m) | WebAuthError::Internal(m) => m,
        }
    }
}

/// Result type alias using WebAuthError
pub type WebAuthResult<T> = Result<T, WebAuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = WebAuthError::validation("nonce is invalid or expired");
        assert!(err.is_validation());
        assert!(!err.is_internal());
        assert_eq!(err.message(), "nonce is invalid or expired");
        assert_eq!(
            err.to_string(),
            "validation error: nonce is invalid or expired"
        );

        let err = WebAuthError::internal("simulating transaction: timeout");
        assert!(err.is_internal());
        assert!(err.to_string().starts_with("internal error:"));
    }
}
