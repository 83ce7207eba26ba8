//! Authentication extractors.
//!
//! Bearer tokens are read from, in order:
//! 1. `Authorization: Bearer <token>`
//! 2. a `token` cookie
//! 3. a `token` query parameter, on the WebSocket upgrade route only
//!    (browsers cannot set headers on `new WebSocket(...)`)

use axum::{
    extract::FromRequestParts,
    http::{
        HeaderMap,
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
};
use tiffin_core::{CaptainId, ShopId, UserId};

use crate::error::{AppError, set_sentry_principal};
use crate::models::Principal;
use crate::services::auth::AuthError;
use crate::state::AppState;
use crate::store::DispatchStore;

/// Name of the token cookie and query parameter.
pub const TOKEN_PARAM: &str = "token";

/// Path on which the query parameter is honoured.
pub const WS_PATH: &str = "/ws";

/// Extractor that requires a valid bearer token.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(Authenticated(principal): Authenticated) -> String {
///     format!("Hello, {principal}!")
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Authenticated(pub Principal);

impl<S: DispatchStore> FromRequestParts<AppState<S>> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| cookie_token(&parts.headers))
            .or_else(|| {
                (parts.uri.path() == WS_PATH)
                    .then(|| query_token(parts.uri.query()))
                    .flatten()
            })
            .ok_or(AuthError::MissingToken)?;

        let principal = state.signer().verify(&token)?;
        tracing::Span::current().record("principal", tracing::field::display(principal));
        set_sentry_principal(principal);
        Ok(Self(principal))
    }
}

macro_rules! role_extractor {
    ($name:ident, $id:ty, $accessor:ident, $label:literal) => {
        #[doc = concat!("Extractor that requires a ", $label, " token.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name(pub $id);

        impl<S: DispatchStore> FromRequestParts<AppState<S>> for $name {
            type Rejection = AppError;

            async fn from_request_parts(
                parts: &mut Parts,
                state: &AppState<S>,
            ) -> Result<Self, Self::Rejection> {
                let Authenticated(principal) =
                    Authenticated::from_request_parts(parts, state).await?;
                principal
                    .$accessor()
                    .map(Self)
                    .ok_or_else(|| AppError::Forbidden(concat!($label, "s only").to_string()))
            }
        }
    };
}

role_extractor!(RequireUser, UserId, as_user, "user");
role_extractor!(RequireShop, ShopId, as_shop, "shop");
role_extractor!(RequireCaptain, CaptainId, as_captain, "captain");

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_owned())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_PARAM && !value.is_empty())
        .map(|(_, value)| value.to_owned())
}

fn query_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, value)| *name == TOKEN_PARAM && !value.is_empty())
        .map(|(_, value)| value.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_cookie_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; token=abc.def; lang=en"),
        );
        assert_eq!(cookie_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(COOKIE, HeaderValue::from_static("tokens=nope"));
        assert_eq!(cookie_token(&headers), None);
    }

    #[test]
    fn test_query_token() {
        assert_eq!(
            query_token(Some("role=captain&token=abc.def")).as_deref(),
            Some("abc.def")
        );
        assert_eq!(query_token(Some("token=")), None);
        assert_eq!(query_token(None), None);
    }
}
