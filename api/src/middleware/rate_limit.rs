use axum::Json;
use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use deskgate_core::error::{ApiError, codes};
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

use super::request_id;

type FloodGuardLayer =
    GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, Body>;

/// Coarse per-IP guard for /v1/tools and /v1/policy: 120 requests/minute,
/// bursts of 30. Per-role tool budgets are enforced separately by the
/// dispatcher.
pub fn tools_layer() -> FloodGuardLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_millisecond(500) // 120 per minute = 2 per second replenish
            .burst_size(30)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("invalid governor config for tools"),
    )
    .error_handler(json_error_handler)
}

/// Returns governor rejections in the `ApiError` shape with Retry-After.
fn json_error_handler(err: GovernorError) -> Response<Body> {
    let (status, retry_after, code, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(wait_time),
            codes::RATE_LIMITED,
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            codes::INTERNAL_ERROR,
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => (
            code,
            None,
            codes::INTERNAL_ERROR,
            msg.unwrap_or_default(),
        ),
    };

    let mut body = ApiError::new(code, message, request_id::current());
    body.retry_after = retry_after;
    let mut response = (status, Json(body)).into_response();
    if let Some(seconds) = retry_after {
        response
            .headers_mut()
            .insert("retry-after", HeaderValue::from(seconds));
    }
    response
}
