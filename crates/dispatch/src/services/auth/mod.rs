//! Signed bearer tokens.
//!
//! A token is `base64url(payload) "." hex(hmac_sha256(secret, base64url(payload)))`
//! where the payload is `{"role": "...", "id": 42, "exp": 1767225600}`.
//! Tokens are issued out of band (see `tiffin-cli token`); the service only
//! verifies them.

mod error;

pub use error::AuthError;

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::models::{Principal, Role};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    role: Role,
    id: i32,
    exp: i64,
}

/// Issues and verifies bearer tokens with a shared secret.
#[derive(Clone)]
pub struct TokenSigner {
    secret: SecretString,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl TokenSigner {
    /// Create a signer.
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Issue a token for `principal` valid for `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidKey` if HMAC rejects the secret.
    pub fn issue(&self, principal: Principal, ttl: Duration) -> Result<String, AuthError> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let exp = Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.issue_until(principal, exp)
    }

    /// Issue a token for `principal` that expires at `exp`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidKey` if HMAC rejects the secret.
    pub fn issue_until(&self, principal: Principal, exp: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            role: principal.role,
            id: principal.id,
            exp: exp.timestamp(),
        };
        let json = serde_json::to_vec(&claims).map_err(|_| AuthError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = hex::encode(self.mac(&payload)?.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    /// Verify a token against the current time.
    ///
    /// # Errors
    ///
    /// Returns `Malformed`, `BadSignature` or `Expired`.
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify a token as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `Malformed`, `BadSignature` or `Expired`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, AuthError> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| AuthError::Malformed)?;

        // Constant-time comparison
        self.mac(payload)?
            .verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| AuthError::Malformed)?;
        if claims.exp <= now.timestamp() {
            return Err(AuthError::Expired);
        }

        Ok(Principal {
            role: claims.role,
            id: claims.id,
        })
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| AuthError::InvalidKey)?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tiffin_core::{CaptainId, UserId};

    use super::*;

    fn signer(secret: &str) -> TokenSigner {
        TokenSigner::new(SecretString::from(secret.to_owned()))
    }

    #[test]
    fn test_issue_and_verify() {
        let signer = signer("k3Jd9vQ2mX8pL5wR7tY1zA4bC6eF0gH2");
        let who = Principal::captain(CaptainId::new(12));
        let token = signer.issue(who, Duration::from_secs(60)).unwrap();
        assert_eq!(signer.verify(&token).unwrap(), who);
    }

    #[test]
    fn test_expired_token() {
        let signer = signer("k3Jd9vQ2mX8pL5wR7tY1zA4bC6eF0gH2");
        let now = Utc::now();
        let token = signer
            .issue_until(Principal::user(UserId::new(1)), now)
            .unwrap();
        assert_eq!(signer.verify_at(&token, now), Err(AuthError::Expired));
        assert!(
            signer
                .verify_at(&token, now - chrono::Duration::seconds(5))
                .is_ok()
        );
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let signer = signer("k3Jd9vQ2mX8pL5wR7tY1zA4bC6eF0gH2");
        let token = signer
            .issue(Principal::user(UserId::new(1)), Duration::from_secs(60))
            .unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let forged_claims = URL_SAFE_NO_PAD.encode(br#"{"role":"user","id":2,"exp":9999999999}"#);
        let forged = format!("{forged_claims}.{signature}");
        assert_eq!(signer.verify(&forged), Err(AuthError::BadSignature));
    }

    #[test]
    fn test_other_secret_is_rejected() {
        let token = signer("k3Jd9vQ2mX8pL5wR7tY1zA4bC6eF0gH2")
            .issue(Principal::user(UserId::new(1)), Duration::from_secs(60))
            .unwrap();
        let other = signer("Zq8Wn3Lk5Pj7Hx2Cv4Bm6Nd9Fs1Gt0Ry");
        assert_eq!(other.verify(&token), Err(AuthError::BadSignature));
    }

    #[test]
    fn test_malformed_tokens() {
        let signer = signer("k3Jd9vQ2mX8pL5wR7tY1zA4bC6eF0gH2");
        assert_eq!(signer.verify("no-dot"), Err(AuthError::Malformed));
        assert_eq!(signer.verify("abc.not-hex"), Err(AuthError::Malformed));
    }
}
