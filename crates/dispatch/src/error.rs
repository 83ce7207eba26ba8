//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//! Error bodies are always `{"error": "..."}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::models::Principal;
use crate::services::auth::AuthError;
use crate::services::dispatch::DispatchError;
use crate::store::StoreError;

/// Application-level error type for the dispatch API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Dispatch operation failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Store operation outside the dispatch service failed.
    #[error("Database error: {0}")]
    Store(#[from] StoreError),

    /// Bearer token was rejected.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Authenticated, but the wrong kind of party for this endpoint.
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Dispatch(err) => match err {
                DispatchError::Store(_) | DispatchError::Pricing(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
                DispatchError::Forbidden | DispatchError::NotOffered => StatusCode::FORBIDDEN,
                DispatchError::Validation(_) | DispatchError::InvalidOtp { .. } => {
                    StatusCode::BAD_REQUEST
                }
                DispatchError::RideAlreadyTaken
                | DispatchError::CaptainUnavailable
                | DispatchError::CaptainOnRide
                | DispatchError::InvalidRideState { .. }
                | DispatchError::InvalidOrderState { .. }
                | DispatchError::InsufficientBalance { .. } => StatusCode::CONFLICT,
                DispatchError::OtpLocked => StatusCode::LOCKED,
                DispatchError::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            },
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(err) => match err {
                AuthError::InvalidKey => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::UNAUTHORIZED,
            },
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match &self {
            _ if status.is_server_error() => "Internal server error".to_string(),
            Self::Dispatch(err) => err.to_string(),
            Self::Auth(err) => err.to_string(),
            Self::Forbidden(msg) => msg.clone(),
            Self::Store(_) => "Internal server error".to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from an authenticated principal.
///
/// Call this after successful authentication to associate errors with parties.
pub fn set_sentry_principal(principal: Principal) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(principal.to_string()),
            ..Default::default()
        }));
        scope.set_tag("role", principal.role.as_str());
    });
}

/// Add a breadcrumb for party actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("ws", "Socket connected", Some(&[("principal", "captain:7")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tiffin_core::RideStatus;

    use super::*;

    fn get_status(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::Forbidden("shops only".to_string());
        assert_eq!(err.to_string(), "Forbidden: shops only");

        let err = AppError::from(DispatchError::RideAlreadyTaken);
        assert_eq!(err.to_string(), "ride already taken");
    }

    #[test]
    fn test_dispatch_error_status_codes() {
        assert_eq!(get_status(DispatchError::RideAlreadyTaken), StatusCode::CONFLICT);
        assert_eq!(
            get_status(DispatchError::InvalidRideState {
                actual: RideStatus::Started
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(DispatchError::InvalidOtp { remaining: 2 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(get_status(DispatchError::OtpLocked), StatusCode::LOCKED);
        assert_eq!(
            get_status(DispatchError::PaymentRequired),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(get_status(DispatchError::NotOffered), StatusCode::FORBIDDEN);
        assert_eq!(
            get_status(DispatchError::NotFound("ride")),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_auth_and_internal_status_codes() {
        assert_eq!(get_status(AuthError::Expired), StatusCode::UNAUTHORIZED);
        assert_eq!(get_status(AuthError::MissingToken), StatusCode::UNAUTHORIZED);
        assert_eq!(
            get_status(AppError::Forbidden("captains only".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(StoreError::DataCorruption("bad row".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let response =
            AppError::from(StoreError::DataCorruption("rides.otp null".to_string())).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, json!({"error": "Internal server error"}));
    }
}
