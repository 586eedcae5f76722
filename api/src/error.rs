use axum::Json;
use axum::http::header::{ALLOW, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use deskgate_core::error::{self, ApiError};
use deskgate_core::leads::LeadValidationError;
use deskgate_core::policy::{PolicyError, PolicyKind, SpecLoadError};
use deskgate_core::rate_limit::RateDecision;
use deskgate_core::sanitizer::SanitizeError;

use crate::middleware::request_id;
use crate::store::StoreError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing or invalid bearer credential (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Caller lacks permission (403)
    Forbidden {
        message: String,
        docs_hint: Option<String>,
    },
    /// Proxy path not in the allowlist (403)
    RouteNotAllowed {
        reason: String,
        allowed_endpoints: Vec<String>,
    },
    /// Proxy path allowed but method is not (405)
    MethodNotAllowed {
        method: String,
        allowed_methods: Vec<String>,
    },
    /// Fixed-window budget exhausted (429)
    RateLimited {
        decision: RateDecision,
        now: DateTime<Utc>,
    },
    /// Body over the forwarding limit (413)
    PayloadTooLarge { limit: usize },
    /// Upstream or handler did not answer in time (504)
    UpstreamTimeout { message: String },
    /// Upstream transport failure (502)
    BadGateway(String),
    /// Duplicate domain entity (409)
    Conflict {
        message: String,
        field: Option<String>,
    },
    /// Unknown tool, role or document (404)
    NotFound { message: String },
    /// Tool registered in policy but no handler deployed (501)
    NotImplemented { message: String },
    /// Policy document missing or malformed (500)
    SpecLoad(SpecLoadError),
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

/// Status, body and extra headers of a rendered error.
#[derive(Debug)]
pub struct ErrorParts {
    pub status: StatusCode,
    pub body: ApiError,
    pub headers: HeaderMap,
}

impl AppError {
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: field.map(str::to_string),
            received: None,
            docs_hint: None,
        }
    }

    /// Stable snake_case code for the failure class. HTTP error bodies on the
    /// proxy path keep their readable `error` strings; tool envelopes use this.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => error::codes::VALIDATION_FAILED,
            AppError::Unauthorized { .. } => error::codes::UNAUTHORIZED,
            AppError::Forbidden { .. } => error::codes::FORBIDDEN,
            AppError::RouteNotAllowed { .. } => "route_not_allowed",
            AppError::MethodNotAllowed { .. } => "method_not_allowed",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::PayloadTooLarge { .. } => "payload_too_large",
            AppError::UpstreamTimeout { .. } => "gateway_timeout",
            AppError::BadGateway(_) => "bad_gateway",
            AppError::Conflict { .. } => error::codes::CONFLICT,
            AppError::NotFound { .. } => error::codes::NOT_FOUND,
            AppError::NotImplemented { .. } => error::codes::NOT_IMPLEMENTED,
            AppError::SpecLoad(_) => error::codes::SPEC_LOAD_FAILED,
            AppError::Database(_) | AppError::Internal(_) => error::codes::INTERNAL_ERROR,
        }
    }

    pub fn into_parts(self) -> ErrorParts {
        let request_id = request_id::current();
        let mut headers = HeaderMap::new();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    field,
                    received,
                    docs_hint,
                    ..ApiError::new(error::codes::VALIDATION_FAILED, message, request_id)
                },
            ),
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    docs_hint,
                    ..ApiError::new(error::codes::UNAUTHORIZED, message, request_id)
                },
            ),
            AppError::Forbidden { message, docs_hint } => (
                StatusCode::FORBIDDEN,
                ApiError {
                    docs_hint,
                    ..ApiError::new(error::codes::FORBIDDEN, message, request_id)
                },
            ),
            AppError::RouteNotAllowed {
                reason,
                allowed_endpoints,
            } => (
                StatusCode::FORBIDDEN,
                ApiError {
                    allowed_endpoints: Some(allowed_endpoints),
                    ..ApiError::new(error::codes::ENDPOINT_NOT_ALLOWED, reason, request_id)
                },
            ),
            AppError::MethodNotAllowed {
                method,
                allowed_methods,
            } => {
                if let Ok(value) = HeaderValue::from_str(&allowed_methods.join(", ")) {
                    headers.insert(ALLOW, value);
                }
                (
                    StatusCode::METHOD_NOT_ALLOWED,
                    ApiError {
                        allowed_methods: Some(allowed_methods),
                        ..ApiError::new(
                            error::codes::METHOD_NOT_ALLOWED,
                            format!("Method {method} is not allowed for this endpoint"),
                            request_id,
                        )
                    },
                )
            }
            AppError::RateLimited { decision, now } => {
                let retry_after = decision.retry_after_secs(now);
                headers.extend(rate_limit_headers(&decision));
                headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    ApiError {
                        retry_after: Some(retry_after),
                        ..ApiError::new(
                            error::codes::RATE_LIMITED,
                            format!("Too many requests. Retry after {retry_after} seconds."),
                            request_id,
                        )
                    },
                )
            }
            AppError::PayloadTooLarge { limit } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ApiError::new(
                    error::codes::PAYLOAD_TOO_LARGE,
                    format!("Request body exceeds the {limit} byte limit"),
                    request_id,
                ),
            ),
            AppError::UpstreamTimeout { message } => (
                StatusCode::GATEWAY_TIMEOUT,
                ApiError::new(error::codes::GATEWAY_TIMEOUT, message, request_id),
            ),
            AppError::BadGateway(detail) => {
                tracing::error!(error = %detail, "upstream request failed");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError::new(
                        error::codes::BAD_GATEWAY,
                        "The upstream service could not be reached",
                        request_id,
                    ),
                )
            }
            AppError::Conflict { message, field } => (
                StatusCode::CONFLICT,
                ApiError {
                    field,
                    ..ApiError::new(error::codes::CONFLICT, message, request_id)
                },
            ),
            AppError::NotFound { message } => (
                StatusCode::NOT_FOUND,
                ApiError::new(error::codes::NOT_FOUND, message, request_id),
            ),
            AppError::NotImplemented { message } => (
                StatusCode::NOT_IMPLEMENTED,
                ApiError::new(error::codes::NOT_IMPLEMENTED, message, request_id),
            ),
            AppError::SpecLoad(err) => {
                tracing::error!(source = %err.location(), error = %err, "policy documents unavailable");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new(
                        error::codes::SPEC_LOAD_FAILED,
                        "Policy documents could not be loaded",
                        request_id,
                    ),
                )
            }
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);

                if let sqlx::Error::Database(ref db_err) = err {
                    if db_err.code().as_deref() == Some("23505") {
                        return AppError::Conflict {
                            message: "Resource already exists".to_string(),
                            field: None,
                        }
                        .into_parts();
                    }
                }

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred",
                        request_id,
                    ),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred",
                        request_id,
                    ),
                )
            }
        };

        ErrorParts {
            status,
            body: api_error,
            headers,
        }
    }
}

/// `X-RateLimit-*` headers for a decision. Reset is a unix timestamp.
pub fn rate_limit_headers(decision: &RateDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(decision.reset_at.timestamp()),
    );
    headers
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let parts = self.into_parts();
        (parts.status, parts.headers, Json(parts.body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<SpecLoadError> for AppError {
    fn from(err: SpecLoadError) -> Self {
        AppError::SpecLoad(err)
    }
}

impl From<PolicyError> for AppError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::NotFound { .. } => AppError::NotFound {
                message: err.to_string(),
            },
            PolicyError::InvalidName { kind, .. } => AppError::validation(
                err.to_string(),
                Some(match kind {
                    PolicyKind::Tenant => "tenant_id",
                    PolicyKind::Role => "role",
                    PolicyKind::Tool => "tool",
                    PolicyKind::Resource => "resource",
                }),
            ),
            PolicyError::SpecLoad(err) => AppError::SpecLoad(err),
        }
    }
}

impl From<SanitizeError> for AppError {
    fn from(err: SanitizeError) -> Self {
        match err {
            SanitizeError::PayloadTooLarge { limit, .. } => AppError::PayloadTooLarge { limit },
        }
    }
}

impl From<LeadValidationError> for AppError {
    fn from(err: LeadValidationError) -> Self {
        AppError::Validation {
            message: err.to_string(),
            field: Some(err.field),
            received: None,
            docs_hint: Some(
                "crm.create_lead requires name and email; source is one of web, whatsapp, manual, api."
                    .to_string(),
            ),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => AppError::Conflict {
                message: "lead already exists".to_string(),
                field: Some("email".to_string()),
            },
            StoreError::Database(err) => AppError::Database(err),
            StoreError::InvalidRow(detail) => AppError::Internal(detail),
        }
    }
}
