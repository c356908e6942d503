use thiserror::Error;

use crate::signer::Algorithm;

pub type AuthResult<T> = Result<T, AuthError>;

/// Failure taxonomy for token issuance and verification.
///
/// The variant is meant for logs and metrics. Network-facing callers should
/// collapse every verification failure into a single "unauthorized" answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("token signature rejected: {0}")]
    InvalidSignature(String),
    #[error("token declares alg '{found}' but the verifying key expects {expected}")]
    AlgorithmMismatch { expected: Algorithm, found: String },
    #[error("malformed claims: {0}")]
    MalformedClaims(String),
    #[error("token is not valid yet")]
    TokenNotYetValid,
    #[error("token has expired")]
    TokenExpired,
    #[error("token has been revoked")]
    TokenRevoked,
    #[error("revocation check unavailable: {0}")]
    RevocationCheckUnavailable(String),
    #[error("invalid token lifetime: {0}")]
    InvalidTtl(String),
    #[error("failed to encode token: {0}")]
    EncodingError(String),
    #[error("failed to parse key material: {0}")]
    KeyParse(String),
}

impl AuthError {
    /// Stable code for logs and metric labels.
    ///
    /// `AlgorithmMismatch` reports as `invalid_signature`, it is a sub-case of
    /// a rejected signature.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::InvalidSignature(_) | AuthError::AlgorithmMismatch { .. } => {
                "invalid_signature"
            }
            AuthError::MalformedClaims(_) => "malformed_claims",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenRevoked => "token_revoked",
            AuthError::RevocationCheckUnavailable(_) => "revocation_check_unavailable",
            AuthError::InvalidTtl(_) => "invalid_ttl",
            AuthError::EncodingError(_) => "encoding_error",
            AuthError::KeyParse(_) => "key_parse",
        }
    }

    /// Only an unreachable revocation backend is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::RevocationCheckUnavailable(_))
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(value: serde_json::Error) -> Self {
        Self::EncodingError(value.to_string())
    }
}
