//! Authentication error types.

use thiserror::Error;

/// Errors that can occur when verifying a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("missing token")]
    MissingToken,

    /// The token is not `payload.signature` or the payload does not decode.
    #[error("malformed token")]
    Malformed,

    /// The signature does not match the payload.
    #[error("invalid token signature")]
    BadSignature,

    /// The token is past its expiry.
    #[error("token expired")]
    Expired,

    /// The signing key was rejected by HMAC.
    #[error("invalid signing key")]
    InvalidKey,
}
