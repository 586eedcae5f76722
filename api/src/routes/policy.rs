use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use deskgate_core::authz::AuthzDecision;
use deskgate_core::error::ApiError;
use deskgate_core::policy::rate_limit_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::InternalCaller;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/policy/check", post(check_policy))
        .route("/v1/policy/tenants/{tenant_id}", get(get_tenant_config))
        .route("/v1/policy/cache", delete(clear_policy_cache))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct PolicyCheckRequest {
    pub role: String,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PolicyCheckResponse {
    pub role: String,
    /// Budget applied to this role's tool calls
    pub rate_limit_per_minute: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<AuthzDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<AuthzDecision>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TenantConfigResponse {
    pub tenant_id: String,
    #[schema(value_type = Object)]
    pub config: Value,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CacheClearedResponse {
    /// Documents dropped from the cache
    pub cleared: usize,
}

/// Explain what a role may do
///
/// Evaluates the tool and/or resource against the role's policy without
/// calling anything.
#[utoipa::path(
    post,
    path = "/v1/policy/check",
    request_body = PolicyCheckRequest,
    responses(
        (status = 200, description = "Decisions", body = PolicyCheckResponse),
        (status = 400, description = "Neither tool nor resource given", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 500, description = "Policy documents unreadable", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "policy"
)]
pub async fn check_policy(
    State(state): State<AppState>,
    _caller: InternalCaller,
    AppJson(req): AppJson<PolicyCheckRequest>,
) -> Result<Json<PolicyCheckResponse>, AppError> {
    if req.tool.is_none() && req.resource.is_none() {
        return Err(AppError::Validation {
            message: "Provide a tool, a resource, or both".to_string(),
            field: Some("tool".to_string()),
            received: None,
            docs_hint: Some(r#"Example: {"role": "sales_assistant", "tool": "crm.create_lead"}"#.to_string()),
        });
    }

    let tool = match req.tool.as_deref() {
        Some(tool) => Some(state.authz.authorize(tool, &req.role).await?),
        None => None,
    };
    let resource = match req.resource.as_deref() {
        Some(resource) => Some(state.authz.authorize_resource(resource, &req.role).await?),
        None => None,
    };
    let rate_limit_per_minute = rate_limit_for(state.authz.loader().as_ref(), &req.role).await;

    Ok(Json(PolicyCheckResponse {
        role: req.role,
        rate_limit_per_minute,
        tool,
        resource,
    }))
}

/// Tenant configuration document
#[utoipa::path(
    get,
    path = "/v1/policy/tenants/{tenant_id}",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Tenant configuration", body = TenantConfigResponse),
        (status = 400, description = "Malformed tenant id", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 500, description = "Tenant configuration unreadable", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "policy"
)]
pub async fn get_tenant_config(
    State(state): State<AppState>,
    _caller: InternalCaller,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantConfigResponse>, AppError> {
    let config = state.authz.loader().load_tenant_config(&tenant_id).await?;
    Ok(Json(TenantConfigResponse { tenant_id, config }))
}

/// Drop every cached policy document
///
/// The next lookup reads the documents from their source again.
#[utoipa::path(
    delete,
    path = "/v1/policy/cache",
    responses(
        (status = 200, description = "Cache cleared", body = CacheClearedResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "policy"
)]
pub async fn clear_policy_cache(
    State(state): State<AppState>,
    caller: InternalCaller,
) -> Json<CacheClearedResponse> {
    let cleared = state.policy.cached_documents();
    state.policy.clear();
    tracing::info!(cleared, caller = ?caller, "policy cache invalidated");
    Json(CacheClearedResponse { cleared })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::test_support::{
        app, body_json, internal_request, policy_source, request, state_with_source, test_config,
    };

    #[tokio::test]
    async fn check_reports_tool_and_resource_decisions() {
        let state = state_with_source(test_config("http://127.0.0.1:9"), Arc::new(policy_source()));
        let response = app(state)
            .oneshot(internal_request(
                Method::POST,
                "/v1/policy/check",
                Some(json!({
                    "role": "sales_assistant",
                    "tool": "crm.create_lead",
                    "resource": "payments::invoices"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["rate_limit_per_minute"], 30);
        assert_eq!(body["tool"]["allowed"], true);
        assert_eq!(body["resource"]["allowed"], false);
        assert_eq!(body["resource"]["denial"], "resource_restricted");
    }

    #[tokio::test]
    async fn check_of_unknown_role_denies_with_default_budget() {
        let state = state_with_source(test_config("http://127.0.0.1:9"), Arc::new(policy_source()));
        let response = app(state)
            .oneshot(internal_request(
                Method::POST,
                "/v1/policy/check",
                Some(json!({"role": "ghost", "tool": "crm.create_lead"})),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["tool"]["allowed"], false);
        assert_eq!(body["tool"]["reason"], "Role 'ghost' is not defined");
        assert_eq!(body["rate_limit_per_minute"], 10);
    }

    #[tokio::test]
    async fn check_requires_tool_or_resource() {
        let state = state_with_source(test_config("http://127.0.0.1:9"), Arc::new(policy_source()));
        let response = app(state)
            .oneshot(internal_request(
                Method::POST,
                "/v1/policy/check",
                Some(json!({"role": "sales_assistant"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tenant_config_is_returned_and_bad_ids_rejected() {
        let state = state_with_source(test_config("http://127.0.0.1:9"), Arc::new(policy_source()));
        let router = app(state);

        let response = router
            .clone()
            .oneshot(internal_request(Method::GET, "/v1/policy/tenants/default", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["tenant_id"], "default");
        assert_eq!(body["config"]["locale"], "es-CL");

        let response = router
            .clone()
            .oneshot(internal_request(Method::GET, "/v1/policy/tenants/bad%20id", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(internal_request(Method::GET, "/v1/policy/tenants/nobody", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "spec_load_failed");
    }

    #[tokio::test]
    async fn cache_clear_forces_refetch() {
        let source = Arc::new(policy_source());
        let state = state_with_source(test_config("http://127.0.0.1:9"), source.clone());
        let router = app(state);

        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(internal_request(Method::GET, "/v1/tools", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(source.fetches(), 1);

        let response = router
            .clone()
            .oneshot(internal_request(Method::DELETE, "/v1/policy/cache", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["cleared"], 1);

        router
            .oneshot(internal_request(Method::GET, "/v1/tools", None))
            .await
            .unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn policy_routes_require_internal_token() {
        let state = state_with_source(test_config("http://127.0.0.1:9"), Arc::new(policy_source()));
        let response = app(state)
            .oneshot(request(Method::DELETE, "/v1/policy/cache", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
