//! CORS middleware.
//!
//! Adds a fixed set of CORS headers to every response and answers every
//! `OPTIONS` request with `204 No Content` before routing or authentication.
//!
//! Browsers ignore `Allow-Credentials: true` alongside a wildcard origin;
//! the dashboard sends its token in the Authorization header, not a cookie.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

const ALLOW_ORIGIN: &str = "*";
const ALLOW_CREDENTIALS: &str = "true";
const ALLOW_HEADERS: &str = "Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, Authorization, accept, origin, Cache-Control, X-Requested-With";
const ALLOW_METHODS: &str = "POST, GET, OPTIONS, PUT, DELETE";

/// Apply the CORS headers, short-circuiting preflight requests.
pub async fn cors(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        tracing::debug!(target: "rg.middleware.cors", path = %req.uri().path(), "Answering preflight");
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static(ALLOW_CREDENTIALS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn handler() -> &'static str {
        "OK"
    }

    fn test_app() -> Router {
        Router::new()
            .route("/reports", get(handler))
            .layer(middleware::from_fn(cors))
    }

    fn assert_cors_headers(headers: &HeaderMap) {
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(headers.get("access-control-allow-credentials").unwrap(), "true");
        assert_eq!(
            headers.get("access-control-allow-headers").unwrap(),
            ALLOW_HEADERS
        );
        assert_eq!(
            headers.get("access-control-allow-methods").unwrap(),
            "POST, GET, OPTIONS, PUT, DELETE"
        );
    }

    #[tokio::test]
    async fn test_get_carries_cors_headers() {
        let response = test_app()
            .oneshot(
                axum::http::Request::get("/reports")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_cors_headers(response.headers());
    }

    #[tokio::test]
    async fn test_options_is_no_content_for_any_path() {
        for uri in ["/reports", "/not-routed"] {
            let response = test_app()
                .oneshot(
                    axum::http::Request::builder()
                        .method(Method::OPTIONS)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::NO_CONTENT);
            assert_cors_headers(response.headers());

            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert!(body.is_empty());
        }
    }

    #[tokio::test]
    async fn test_unrouted_get_still_has_cors_headers() {
        let response = test_app()
            .oneshot(
                axum::http::Request::get("/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_cors_headers(response.headers());
    }
}
