//! Reports gateway error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic to avoid
//! leaking internal details. Actual errors are logged server-side.

use crate::auth::AuthError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// `WWW-Authenticate` challenge attached to every 401 response.
const BEARER_CHALLENGE: &str = "Bearer realm=\"reports\", error=\"invalid_token\"";

/// Request-level error type.
///
/// Maps to HTTP status codes:
/// - Unauthenticated, MissingClaim: 401 Unauthorized (empty body)
/// - StoreUnavailable: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Token is missing the identity claim")]
    MissingClaim,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl GatewayError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Unauthenticated(_) | GatewayError::MissingClaim => 401,
            GatewayError::StoreUnavailable(_) => 503,
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated(reason) => GatewayError::Unauthenticated(reason),
            AuthError::MissingClaim => GatewayError::MissingClaim,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::Unauthenticated(reason) => {
                tracing::debug!(target: "rg.errors", reason = %reason, "Rejecting unauthenticated request");
                return unauthorized();
            }
            GatewayError::MissingClaim => {
                tracing::warn!(target: "rg.errors", "Verified token carried no identity claim");
                return unauthorized();
            }
            GatewayError::StoreUnavailable(reason) => {
                // Log actual reason server-side
                tracing::warn!(target: "rg.availability", reason = %reason, "Report store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    "Report store temporarily unavailable".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// 401 with no body and a bearer challenge.
fn unauthorized() -> Response {
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static(BEARER_CHALLENGE),
    );
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_bytes(body: Body) -> Vec<u8> {
        body.collect().await.unwrap().to_bytes().to_vec()
    }

    #[test]
    fn test_display_unauthenticated() {
        let error = GatewayError::Unauthenticated("expired".to_string());
        assert_eq!(format!("{}", error), "Unauthenticated: expired");
    }

    #[test]
    fn test_display_store_unavailable() {
        let error = GatewayError::StoreUnavailable("connection refused".to_string());
        assert_eq!(format!("{}", error), "Store unavailable: connection refused");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::Unauthenticated("test".to_string()).status_code(),
            401
        );
        assert_eq!(GatewayError::MissingClaim.status_code(), 401);
        assert_eq!(
            GatewayError::StoreUnavailable("test".to_string()).status_code(),
            503
        );
    }

    #[test]
    fn test_from_auth_error() {
        let err: GatewayError = AuthError::MissingClaim.into();
        assert!(matches!(err, GatewayError::MissingClaim));

        let err: GatewayError = AuthError::Unauthenticated("bad signature".to_string()).into();
        assert!(matches!(err, GatewayError::Unauthenticated(reason) if reason == "bad signature"));
    }

    #[tokio::test]
    async fn test_into_response_unauthenticated_has_empty_body() {
        let response = GatewayError::Unauthenticated("token expired".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let www_auth = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www_auth.starts_with("Bearer"));

        let body = read_body_bytes(response.into_body()).await;
        assert!(body.is_empty(), "401 responses must not carry a body");
    }

    #[tokio::test]
    async fn test_into_response_missing_claim_is_401() {
        let response = GatewayError::MissingClaim.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = read_body_bytes(response.into_body()).await;
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_into_response_store_unavailable() {
        let response =
            GatewayError::StoreUnavailable("clickhouse: connection refused".to_string())
                .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = read_body_bytes(response.into_body()).await;
        let body_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body_json["error"]["code"], "STORE_UNAVAILABLE");
        // Generic message returned to client
        assert_eq!(
            body_json["error"]["message"],
            "Report store temporarily unavailable"
        );
    }
}
