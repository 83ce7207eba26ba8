//! Ride-start one-time passcodes.

use core::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an [`Otp`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OtpError {
    /// Not exactly six characters.
    #[error("otp must be exactly {expected} digits")]
    Length {
        /// Required length.
        expected: usize,
    },
    /// Contains a non-digit character.
    #[error("otp must contain only digits")]
    NonDigit,
}

/// A six-digit passcode the user reads out to the captain at pickup.
///
/// `Debug` is redacted so codes never reach logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Otp(String);

impl Otp {
    /// Number of digits.
    pub const LENGTH: usize = 6;

    /// Draw a fresh code uniformly from `000000..=999999`.
    #[must_use]
    pub fn generate() -> Self {
        let code: u32 = rand::rng().random_range(0..1_000_000);
        Self(format!("{code:06}"))
    }

    /// Parse a code.
    ///
    /// # Errors
    ///
    /// Returns an error unless the input is exactly six ASCII digits.
    pub fn parse(s: &str) -> Result<Self, OtpError> {
        if s.len() != Self::LENGTH {
            return Err(OtpError::Length {
                expected: Self::LENGTH,
            });
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OtpError::NonDigit);
        }
        Ok(Self(s.to_owned()))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented code.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let expected = self.0.as_bytes();
        let presented = candidate.as_bytes();
        if expected.len() != presented.len() {
            return false;
        }
        expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Debug for Otp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Otp(******)")
    }
}

impl TryFrom<String> for Otp {
    type Error = OtpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Otp> for String {
    fn from(otp: Otp) -> Self {
        otp.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_format() {
        for _ in 0..200 {
            let otp = Otp::generate();
            assert_eq!(otp.as_str().len(), Otp::LENGTH);
            assert!(otp.as_str().chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(Otp::parse("12345"), Err(OtpError::Length { .. })));
        assert!(matches!(Otp::parse("1234567"), Err(OtpError::Length { .. })));
        assert!(matches!(Otp::parse("12a456"), Err(OtpError::NonDigit)));
        assert!(Otp::parse("004213").is_ok());
    }

    #[test]
    fn test_matches() {
        let otp = Otp::parse("004213").unwrap();
        assert!(otp.matches("004213"));
        assert!(!otp.matches("004214"));
        assert!(!otp.matches("04213"));
        assert!(!otp.matches(""));
    }

    #[test]
    fn test_debug_is_redacted() {
        let otp = Otp::parse("987654").unwrap();
        assert!(!format!("{otp:?}").contains("987654"));
    }
}
