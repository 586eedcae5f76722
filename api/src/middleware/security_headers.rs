use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use crate::config::Environment;

const HSTS: &str = "max-age=31536000; includeSubDomains; preload";

/// Apply the security-header baseline to all responses. HSTS is only sent in
/// production, where the service sits behind TLS.
///
/// Keep the CSP narrow (`frame-ancestors`) so the Swagger UI keeps working.
pub async fn apply(State(environment): State<Environment>, req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("frame-ancestors 'none'"),
    );
    if environment.is_production() {
        headers.insert("strict-transport-security", HeaderValue::from_static(HSTS));
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::{Router, middleware};
    use tower::ServiceExt;

    use super::*;

    async fn ok() -> StatusCode {
        StatusCode::OK
    }

    async fn headers_for(environment: Environment) -> axum::http::HeaderMap {
        let app = Router::new()
            .route("/health", get(ok))
            .layer(middleware::from_fn_with_state(environment, apply));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        response.headers().clone()
    }

    #[tokio::test]
    async fn apply_adds_security_headers() {
        let headers = headers_for(Environment::Development).await;
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["x-xss-protection"], "1; mode=block");
        assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
        assert_eq!(
            headers["permissions-policy"],
            "camera=(), microphone=(), geolocation=()"
        );
        assert!(headers.get("strict-transport-security").is_none());
    }

    #[tokio::test]
    async fn production_adds_hsts() {
        let headers = headers_for(Environment::Production).await;
        assert_eq!(headers["strict-transport-security"], HSTS);
    }
}
