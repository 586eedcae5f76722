use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response returned by every deskgate surface.
/// Carries enough detail for the caller to correct the request without
/// echoing upstream or storage internals.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Error identifier (e.g. "validation_failed", or "Rate limit exceeded" on the proxy path)
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
    /// Route templates the gateway accepts (403 on the proxy path)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_endpoints: Option<Vec<String>>,
    /// Methods the matched route accepts (405 on the proxy path)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_methods: Option<Vec<String>>,
    /// Seconds until the rate window resets (429)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(error: impl Into<String>, message: impl Into<String>, request_id: String) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            field: None,
            received: None,
            request_id,
            docs_hint: None,
            allowed_endpoints: None,
            allowed_methods: None,
            retry_after: None,
        }
    }
}

/// Error codes used across the API.
///
/// The gateway-facing codes are human-readable strings because the dashboard
/// renders them directly.
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_IMPLEMENTED: &str = "not_implemented";
    pub const SPEC_LOAD_FAILED: &str = "spec_load_failed";

    pub const ENDPOINT_NOT_ALLOWED: &str = "Endpoint not allowed";
    pub const METHOD_NOT_ALLOWED: &str = "Method not allowed";
    pub const RATE_LIMITED: &str = "Rate limit exceeded";
    pub const PAYLOAD_TOO_LARGE: &str = "Payload too large";
    pub const GATEWAY_TIMEOUT: &str = "Gateway timeout";
    pub const BAD_GATEWAY: &str = "Bad gateway";
}
