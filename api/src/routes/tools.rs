use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use deskgate_core::error::ApiError;
use deskgate_core::validate::is_identifier;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::InternalCaller;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::tools::{ToolCallRequest, ToolEnvelope};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/tools", get(list_tools))
        .route("/v1/tools/call", post(call_tool))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ToolListQuery {
    /// Only list tools this role may call
    pub role: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub input_schema: Value,
    /// False when no handler is deployed for the tool
    pub callable: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ToolListResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub tools: Vec<ToolSummary>,
}

/// List tool definitions
///
/// With `role`, only the tools that role is allowed to call.
#[utoipa::path(
    get,
    path = "/v1/tools",
    params(ToolListQuery),
    responses(
        (status = 200, description = "Tool definitions", body = ToolListResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown role", body = ApiError),
        (status = 500, description = "Policy documents unreadable", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "tools"
)]
pub async fn list_tools(
    State(state): State<AppState>,
    _caller: InternalCaller,
    Query(query): Query<ToolListQuery>,
) -> Result<Json<ToolListResponse>, AppError> {
    let loader = state.authz.loader();
    let role = match query.role.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => {
            if !is_identifier(name) {
                return Err(AppError::validation(
                    format!("'{name}' is not a valid role name"),
                    Some("role"),
                ));
            }
            Some(loader.load_role(name).await?)
        }
        _ => None,
    };

    let tools = loader
        .load_tools()
        .await?
        .into_iter()
        .filter(|tool| role.as_ref().is_none_or(|r| r.permits_tool(&tool.name)))
        .map(|tool| ToolSummary {
            name: tool.name,
            description: tool.description,
            callable: state.dispatcher.has_handler(&tool.handler_ref),
            input_schema: tool.parameter_schema,
        })
        .collect();

    Ok(Json(ToolListResponse {
        role: role.map(|r| r.name),
        tools,
    }))
}

/// Call a tool on behalf of an agent role
///
/// The response is always a tool envelope. Its HTTP status follows the
/// failure class (403 not permitted, 404 unknown tool, 429 role budget,
/// 501 handler missing, 504 handler timeout).
#[utoipa::path(
    post,
    path = "/v1/tools/call",
    request_body = ToolCallRequest,
    responses(
        (status = 200, description = "Tool succeeded", body = ToolEnvelope),
        (status = 400, description = "Invalid arguments", body = ToolEnvelope),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Tool not permitted for role", body = ToolEnvelope),
        (status = 404, description = "Unknown tool", body = ToolEnvelope),
        (status = 409, description = "Duplicate record", body = ToolEnvelope),
        (status = 429, description = "Role budget exhausted", body = ToolEnvelope),
        (status = 501, description = "No handler deployed", body = ToolEnvelope),
        (status = 504, description = "Handler timed out", body = ToolEnvelope)
    ),
    security(("bearer_auth" = [])),
    tag = "tools"
)]
pub async fn call_tool(
    State(state): State<AppState>,
    _caller: InternalCaller,
    AppJson(req): AppJson<ToolCallRequest>,
) -> Result<(StatusCode, HeaderMap, Json<ToolEnvelope>), AppError> {
    if req.context.role.trim().is_empty() {
        return Err(AppError::validation("context.role is required", Some("context.role")));
    }
    let (status, headers, envelope) = state
        .dispatcher
        .dispatch(&req.tool_name, req.arguments, req.context)
        .await;
    Ok((status, headers, Json(envelope)))
}
