//! Allowlisted proxy to the upstream ticketing API.
//!
//! Per request: rate check, path allowlist, method check, query and body
//! sanitizing, bounded forward, filtered relay. Any failed step answers
//! immediately with a structured error.

use std::time::Instant;

use axum::body::{Body, to_bytes};
use axum::extract::{Path, Request, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW, CONTENT_TYPE, ORIGIN, VARY};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use chrono::Utc;
use deskgate_core::error::codes;
use deskgate_core::routes::{RateClass, RouteMatch};
use deskgate_core::sanitizer::{self, MAX_BODY_BYTES, UPSTREAM_AUTH_HEADER};
use url::Url;

use crate::client::client_identifier;
use crate::error::{AppError, rate_limit_headers};
use crate::state::AppState;

pub const GATEWAY_PREFIX: &str = "/api/desk";

const ALL_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS";

const RELAYED_RESPONSE_HEADERS: &[HeaderName] = &[
    CONTENT_TYPE,
    axum::http::header::CACHE_CONTROL,
    axum::http::header::ETAG,
    axum::http::header::LAST_MODIFIED,
];

pub fn router() -> Router<AppState> {
    Router::new()
        .route(GATEWAY_PREFIX, any(proxy_root))
        .route(&format!("{GATEWAY_PREFIX}/{{*path}}"), any(proxy_path))
}

async fn proxy_root(State(state): State<AppState>, req: Request) -> Response {
    proxy(state, Vec::new(), req).await
}

async fn proxy_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    req: Request,
) -> Response {
    let segments = path.split('/').map(str::to_string).collect();
    proxy(state, segments, req).await
}

async fn proxy(state: AppState, segments: Vec<String>, req: Request) -> Response {
    let route = state.routes.authorize(&segments);
    let origin = allowed_origin(&state, req.headers());

    if req.method() == Method::OPTIONS {
        let mut response = preflight(route.as_ref().ok());
        apply_origin(&mut response, origin);
        return response;
    }

    let identifier = client_identifier(req.headers(), req.extensions());
    let class = route
        .as_ref()
        .map(|matched| matched.rate_class)
        .unwrap_or(RateClass::Standard);
    let now = Utc::now();
    let decision = state.limiter.check_at(
        &format!("proxy:{}", class.as_str()),
        &identifier,
        state.class_limit(class),
        now,
    );
    if !decision.allowed {
        return AppError::RateLimited { decision, now }.into_response();
    }

    let result = match route {
        Ok(matched) => forward(&state, matched, req).await,
        Err(rejection) => {
            tracing::warn!(
                reason = rejection.reason(),
                path = %segments.join("/"),
                client = %identifier,
                "proxy route rejected"
            );
            Err(AppError::RouteNotAllowed {
                reason: rejection.reason().to_string(),
                allowed_endpoints: state.routes.templates(),
            })
        }
    };

    let mut response = match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        response.headers_mut().extend(rate_limit_headers(&decision));
    }
    apply_origin(&mut response, origin);
    response
}

/// The request's `Origin` when it is one of `DESKGATE_CORS_ORIGINS`.
fn allowed_origin(state: &AppState, headers: &HeaderMap) -> Option<HeaderValue> {
    let origin = headers.get(ORIGIN)?;
    let value = origin.to_str().ok()?;
    state
        .config
        .cors_origins
        .iter()
        .any(|allowed| allowed == value)
        .then(|| origin.clone())
}

fn apply_origin(response: &mut Response, origin: Option<HeaderValue>) {
    let headers = response.headers_mut();
    headers.insert(VARY, HeaderValue::from_static("origin"));
    if let Some(origin) = origin {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            "access-control-allow-credentials",
            HeaderValue::from_static("true"),
        );
    }
}

fn preflight(route: Option<&RouteMatch>) -> Response {
    let allow = match route {
        Some(matched) => {
            let mut methods = matched.allowed_methods.clone();
            methods.push("OPTIONS".to_string());
            methods.join(", ")
        }
        None => ALL_METHODS.to_string(),
    };
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&allow) {
        headers.insert(ALLOW, value.clone());
        headers.insert("access-control-allow-methods", value);
    }
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("authorization, content-type"),
    );
    headers.insert("access-control-max-age", HeaderValue::from_static("3600"));
    (StatusCode::NO_CONTENT, headers).into_response()
}

async fn forward(state: &AppState, matched: RouteMatch, req: Request) -> Result<Response, AppError> {
    let method = req.method().clone();
    if !state
        .routes
        .check_method(&matched.normalized_path, method.as_str())
    {
        return Err(AppError::MethodNotAllowed {
            method: method.to_string(),
            allowed_methods: matched.allowed_methods,
        });
    }

    let url = upstream_url(state, &matched.normalized_path, req.uri().query())?;

    let mut outbound_headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    outbound_headers.push((
        UPSTREAM_AUTH_HEADER.to_string(),
        state.config.upstream_token.clone(),
    ));
    let outbound_headers =
        sanitizer::clean_headers(outbound_headers.iter().map(|(n, v)| (n.as_str(), v.as_str())));

    let body = if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
        let declared = req
            .headers()
            .get(axum::http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > MAX_BODY_BYTES) {
            return Err(AppError::PayloadTooLarge {
                limit: MAX_BODY_BYTES,
            });
        }
        let raw = to_bytes(req.into_body(), MAX_BODY_BYTES + 1)
            .await
            .map_err(|_| AppError::PayloadTooLarge {
                limit: MAX_BODY_BYTES,
            })?;
        Some(sanitizer::clean_body(&raw)?)
    } else {
        None
    };

    let mut request = state.upstream.request(method.clone(), url);
    for (name, value) in &outbound_headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = body {
        request = request.body(body);
    }

    let started = Instant::now();
    let timeout = state.config.upstream_timeout;
    let exchange = async {
        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;
        Ok::<_, reqwest::Error>((status, headers, bytes))
    };
    let (status, upstream_headers, bytes) = match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(parts)) => parts,
        Ok(Err(err)) => {
            tracing::warn!(
                path = %matched.template,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %err,
                "upstream transport failure"
            );
            return Err(AppError::BadGateway(err.to_string()));
        }
        Err(_) => {
            tracing::warn!(
                path = %matched.template,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "upstream timed out"
            );
            return Err(AppError::UpstreamTimeout {
                message: format!("The upstream service did not respond within {timeout:?}"),
            });
        }
    };

    tracing::info!(
        method = %method,
        path = %matched.template,
        status = status.as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "proxied request"
    );

    if status.is_server_error() {
        tracing::warn!(status = status.as_u16(), "upstream server error, body withheld");
        let body = Json(serde_json::json!({
            "error": codes::BAD_GATEWAY,
            "message": "The upstream service returned an error",
        }));
        return Ok((status, body).into_response());
    }

    let mut headers = HeaderMap::new();
    for name in RELAYED_RESPONSE_HEADERS {
        if let Some(value) = upstream_headers.get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
    Ok((status, headers, Body::from(bytes)).into_response())
}

/// `{base}/api/v1/accounts/{account}/{path}?{sanitized query}`. Only
/// validated path segments and allowlisted parameters reach the URL.
fn upstream_url(state: &AppState, normalized_path: &str, query: Option<&str>) -> Result<Url, AppError> {
    let mut url = state.config.upstream_url.clone();
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| AppError::Internal("upstream URL cannot be a base".to_string()))?;
        path.pop_if_empty()
            .extend(["api", "v1", "accounts", state.config.upstream_account_id.as_str()])
            .extend(normalized_path.split('/'));
    }

    let params: Vec<(String, String)> = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let cleaned = sanitizer::clean_query(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    if !cleaned.is_empty() {
        url.query_pairs_mut().extend_pairs(cleaned.iter());
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Bytes;
    use axum::http::{Method, Uri};
    use axum::routing::get;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::test_support::{app, body_json, request, state, state_with_config, test_config};

    async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
        let mut reply = HeaderMap::new();
        reply.insert("etag", HeaderValue::from_static("\"v1\""));
        reply.insert("set-cookie", HeaderValue::from_static("session=upstream"));
        reply.insert("x-upstream-node", HeaderValue::from_static("desk-3"));
        let body = Json(json!({
            "method": method.as_str(),
            "path": uri.path(),
            "query": uri.query(),
            "token": headers.get(UPSTREAM_AUTH_HEADER).and_then(|v| v.to_str().ok()),
            "cookie": headers.contains_key("cookie"),
            "authorization": headers.contains_key("authorization"),
            "body": String::from_utf8_lossy(&body),
        }));
        (StatusCode::OK, reply, body).into_response()
    }

    async fn spawn_upstream() -> String {
        let upstream = Router::new()
            .route(
                "/api/v1/accounts/42/reports/summary",
                get(|| async {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "stack trace: db password hunter2",
                    )
                }),
            )
            .route(
                "/api/v1/accounts/42/teams",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    StatusCode::OK
                }),
            )
            .fallback(echo);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, upstream).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn gateway() -> Router {
        app(state_with_config(test_config(&spawn_upstream().await)))
    }

    #[tokio::test]
    async fn allowlisted_request_is_forwarded_with_upstream_credentials_only() {
        let mut req = request(
            Method::GET,
            "/api/desk/conversations/7/messages?status=open&inbox_id=3&debug=1",
            None,
        );
        req.headers_mut()
            .insert("cookie", HeaderValue::from_static("sid=abc"));
        req.headers_mut()
            .insert("authorization", HeaderValue::from_static("Bearer client"));

        let response = gateway().await.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers().clone();
        assert_eq!(headers["etag"], "\"v1\"");
        assert!(headers.get("set-cookie").is_none());
        assert!(headers.get("x-upstream-node").is_none());
        assert_eq!(headers["x-ratelimit-limit"], "30");
        assert_eq!(headers["x-ratelimit-remaining"], "29");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert!(headers.contains_key("x-request-id"));

        let body = body_json(response).await;
        assert_eq!(body["path"], "/api/v1/accounts/42/conversations/7/messages");
        assert_eq!(body["query"], "inbox_id=3&status=open");
        assert_eq!(body["token"], "upstream-secret");
        assert_eq!(body["cookie"], false);
        assert_eq!(body["authorization"], false);
    }

    #[tokio::test]
    async fn traversal_is_rejected_with_the_allowlist() {
        let response = app(state())
            .oneshot(request(Method::GET, "/api/desk/%2e%2e/secret", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().contains_key("x-ratelimit-limit"));
        let body = body_json(response).await;
        assert_eq!(body["error"], "Endpoint not allowed");
        assert_eq!(body["message"], "Dangerous pattern detected");
        let endpoints = body["allowed_endpoints"].as_array().unwrap();
        assert!(endpoints.contains(&json!("conversations/:id/messages")));
    }

    #[tokio::test]
    async fn unknown_path_is_not_allowlisted() {
        let response = app(state())
            .oneshot(request(Method::GET, "/api/desk/admin/users", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["message"], "Path not in allowlist");
    }

    #[tokio::test]
    async fn sixty_first_request_in_a_window_is_rate_limited() {
        let router = app(state());
        for _ in 0..60 {
            let response = router
                .clone()
                .oneshot(request(Method::GET, "/api/desk/admin", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
        let response = router
            .oneshot(request(Method::GET, "/api/desk/inboxes", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()["retry-after"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(body_json(response).await["error"], "Rate limit exceeded");
    }

    #[tokio::test]
    async fn messages_class_has_its_own_budget() {
        let mut config = test_config("http://127.0.0.1:9");
        config.messages_rate_limit_per_minute = 1;
        let router = app(state_with_config(config));

        let first = router
            .clone()
            .oneshot(request(Method::OPTIONS, "/api/desk/conversations/messages", None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::NO_CONTENT);

        for expected in [StatusCode::BAD_GATEWAY, StatusCode::TOO_MANY_REQUESTS] {
            let response = router
                .clone()
                .oneshot(request(Method::GET, "/api/desk/conversations/messages", None))
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
        }
        let standard = router
            .oneshot(request(Method::GET, "/api/desk/labels", None))
            .await
            .unwrap();
        assert_eq!(standard.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn wrong_method_lists_allowed_methods() {
        let response = app(state())
            .oneshot(request(Method::DELETE, "/api/desk/conversations", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["allow"], "GET, POST");
        let body = body_json(response).await;
        assert_eq!(body["allowed_methods"], json!(["GET", "POST"]));
    }

    #[tokio::test]
    async fn options_answers_locally() {
        let response = app(state())
            .oneshot(request(Method::OPTIONS, "/api/desk/conversations", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["allow"], "GET, POST, OPTIONS");
    }

    #[tokio::test]
    async fn browser_preflight_is_answered_by_the_gateway() {
        let router = app(state());
        let preflight = |origin: &'static str| {
            let mut req = request(Method::OPTIONS, "/api/desk/conversations", None);
            let headers = req.headers_mut();
            headers.insert("origin", HeaderValue::from_static(origin));
            headers.insert(
                "access-control-request-method",
                HeaderValue::from_static("POST"),
            );
            req
        };

        let response = router
            .clone()
            .oneshot(preflight("https://desk.example.com"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers["allow"], "GET, POST, OPTIONS");
        assert_eq!(headers["access-control-allow-methods"], "GET, POST, OPTIONS");
        assert_eq!(headers["access-control-allow-origin"], "https://desk.example.com");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["x-xss-protection"], "1; mode=block");

        let response = router
            .oneshot(preflight("https://evil.example.com"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn tool_route_preflight_keeps_security_headers() {
        let mut req = request(Method::OPTIONS, "/v1/tools", None);
        req.headers_mut()
            .insert("origin", HeaderValue::from_static("https://desk.example.com"));
        req.headers_mut().insert(
            "access-control-request-method",
            HeaderValue::from_static("GET"),
        );
        let response = app(state()).oneshot(req).await.unwrap();
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "https://desk.example.com");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused() {
        let router = app(state());
        let oversized = vec![b'a'; MAX_BODY_BYTES + 1];

        let mut declared = request(Method::POST, "/api/desk/conversations", None);
        *declared.body_mut() = Body::from(oversized.clone());
        declared.headers_mut().insert(
            axum::http::header::CONTENT_LENGTH,
            HeaderValue::from(oversized.len()),
        );
        let response = router.clone().oneshot(declared).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let mut streamed = request(Method::POST, "/api/desk/conversations", None);
        *streamed.body_mut() = Body::from(oversized);
        let response = router.oneshot(streamed).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_json(response).await["error"], "Payload too large");
    }

    #[tokio::test]
    async fn post_body_is_sanitized_before_forwarding() {
        let response = gateway()
            .await
            .oneshot(request(
                Method::POST,
                "/api/desk/conversations/7/messages",
                Some(json!({"content": "hi <b>there</b>\r\n"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["method"], "POST");
        let forwarded = body["body"].as_str().unwrap();
        assert!(!forwarded.contains('<'));
        assert!(forwarded.contains("hi bthere/b"));
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let mut config = test_config(&spawn_upstream().await);
        config.upstream_timeout = Duration::from_millis(200);
        let response = app(state_with_config(config))
            .oneshot(request(Method::GET, "/api/desk/teams", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_json(response).await["error"], "Gateway timeout");
    }

    #[tokio::test]
    async fn upstream_server_error_body_is_withheld() {
        let response = gateway()
            .await
            .oneshot(request(Method::GET, "/api/desk/reports/summary", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Bad gateway");
        assert!(!body.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let response = app(state())
            .oneshot(request(Method::GET, "/api/desk/inboxes", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"], "Bad gateway");
    }
}
