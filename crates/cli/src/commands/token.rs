//! Bearer token issuance.
//!
//! The dispatch service only verifies tokens; operators mint them here with
//! the same `DISPATCH_TOKEN_SECRET` the service runs with.

use std::time::Duration;

use secrecy::SecretString;
use tiffin_dispatch::models::{Principal, Role};
use tiffin_dispatch::services::auth::TokenSigner;

use super::CommandError;

/// Print a token for `role`/`id` valid for `ttl_hours`.
///
/// # Errors
///
/// Returns an error if the secret is missing or rejected.
pub fn issue(role: Role, id: i32, ttl_hours: u64) -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let secret = std::env::var("DISPATCH_TOKEN_SECRET")
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("DISPATCH_TOKEN_SECRET"))?;

    let signer = TokenSigner::new(secret);
    let ttl = Duration::from_secs(ttl_hours.saturating_mul(3600));
    let token = signer.issue(Principal { role, id }, ttl)?;

    #[allow(clippy::print_stdout)]
    {
        println!("{token}");
    }
    Ok(())
}
