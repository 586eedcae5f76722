//! Tool dispatch: policy lookup, authorization, per-role budget, argument
//! schema check, then the registered handler on its own task.

pub mod lead_intake;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use deskgate_core::authz::{AuthorizationEngine, Denial};
use deskgate_core::policy::{SpecLoadError, ToolDefinition};
use deskgate_core::rate_limit::RateLimiter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::AppError;

/// Who is calling a tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolContext {
    pub role: String,
    #[serde(default, alias = "tenant_id")]
    pub tenant_id: Option<String>,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    #[serde(alias = "tool_name")]
    pub tool_name: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub arguments: Value,
    pub context: ToolContext,
}

/// Result of a tool call, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error code (`forbidden`, `validation_failed`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub tool: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, context: ToolContext) -> Result<Value, AppError>;
}

pub struct ToolDispatcher {
    authz: AuthorizationEngine,
    limiter: RateLimiter,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(authz: AuthorizationEngine, limiter: RateLimiter, timeout: Duration) -> Self {
        Self {
            authz,
            limiter,
            handlers: HashMap::new(),
            timeout,
        }
    }

    /// Register `handler` under a `handler_ref` name used by tool definitions.
    pub fn register(mut self, handler_ref: &str, handler: Arc<dyn ToolHandler>) -> Self {
        self.handlers.insert(handler_ref.to_string(), handler);
        self
    }

    pub fn has_handler(&self, handler_ref: &str) -> bool {
        self.handlers.contains_key(handler_ref)
    }

    /// Run a tool call and wrap the outcome. Never fails: every error becomes
    /// an unsuccessful envelope with the status and headers it maps to.
    pub async fn dispatch(
        &self,
        tool_name: &str,
        arguments: Value,
        context: ToolContext,
    ) -> (StatusCode, HeaderMap, ToolEnvelope) {
        let role = context.role.clone();
        let tenant = context.tenant_id.clone();
        let user = context.user_id.clone();

        let (outcome, audit) = self.run(tool_name, arguments, context).await;
        let timestamp = Utc::now();

        let (status, headers, envelope) = match outcome {
            Ok(data) => (
                StatusCode::OK,
                HeaderMap::new(),
                ToolEnvelope {
                    success: true,
                    data: Some(data),
                    error: None,
                    code: None,
                    tool: tool_name.to_string(),
                    timestamp,
                },
            ),
            Err(err) => {
                let code = err.code();
                let parts = err.into_parts();
                (
                    parts.status,
                    parts.headers,
                    ToolEnvelope {
                        success: false,
                        data: None,
                        error: Some(parts.body.message),
                        code: Some(code.to_string()),
                        tool: tool_name.to_string(),
                        timestamp,
                    },
                )
            }
        };

        if audit {
            tracing::info!(
                target: "audit",
                tool = tool_name,
                role = %role,
                tenant_id = tenant.as_deref().unwrap_or("-"),
                user_id = user.as_deref().unwrap_or("-"),
                success = envelope.success,
                status = status.as_u16(),
                "tool dispatch"
            );
        }
        (status, headers, envelope)
    }

    /// Returns the outcome and whether the caller's role requires auditing.
    async fn run(
        &self,
        tool_name: &str,
        arguments: Value,
        context: ToolContext,
    ) -> (Result<Value, AppError>, bool) {
        let authorization = match self.authz.authorize_tool(tool_name, &context.role).await {
            Ok(authorization) => authorization,
            Err(err) => return (Err(AppError::SpecLoad(err)), false),
        };
        let audit = authorization
            .role
            .as_ref()
            .is_some_and(|role| role.audit_required);
        let decision = authorization.decision;
        let reason = decision.reason.clone().unwrap_or_default();

        let tool = match (decision.allowed, decision.denial, authorization.tool) {
            (true, _, Some(tool)) => tool,
            (_, Some(Denial::UnknownTool), _) | (_, _, None) => {
                return (Err(AppError::NotFound { message: reason }), audit);
            }
            _ => {
                return (
                    Err(AppError::Forbidden {
                        message: reason,
                        docs_hint: Some(
                            "List the tools this role may call with GET /v1/tools?role=<role>."
                                .to_string(),
                        ),
                    }),
                    audit,
                );
            }
        };

        let now = Utc::now();
        let budget = self.limiter.check_at(
            &format!("tool:{}", context.role),
            &format!(
                "{}:{}",
                context.tenant_id.as_deref().unwrap_or("-"),
                context.user_id.as_deref().unwrap_or("-")
            ),
            decision.rate_limit_per_minute,
            now,
        );
        if !budget.allowed {
            return (
                Err(AppError::RateLimited {
                    decision: budget,
                    now,
                }),
                audit,
            );
        }

        let Some(handler) = self.handlers.get(&tool.handler_ref).cloned() else {
            tracing::error!(
                tool = tool_name,
                handler = %tool.handler_ref,
                "tool has no registered handler"
            );
            return (
                Err(AppError::NotImplemented {
                    message: format!(
                        "Tool '{tool_name}' has no handler deployed (handler '{}')",
                        tool.handler_ref
                    ),
                }),
                audit,
            );
        };

        if let Err(err) = validate_arguments(&tool, &arguments) {
            return (Err(err), audit);
        }

        (self.invoke(tool_name, handler, arguments, context).await, audit)
    }

    async fn invoke(
        &self,
        tool_name: &str,
        handler: Arc<dyn ToolHandler>,
        arguments: Value,
        context: ToolContext,
    ) -> Result<Value, AppError> {
        let mut task = tokio::spawn(async move { handler.call(arguments, context).await });
        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                let kind = if join_err.is_panic() { "panicked" } else { "was cancelled" };
                Err(AppError::Internal(format!("handler for tool '{tool_name}' {kind}")))
            }
            Err(_) => {
                task.abort();
                Err(AppError::UpstreamTimeout {
                    message: format!(
                        "Tool '{tool_name}' did not finish within {:?}",
                        self.timeout
                    ),
                })
            }
        }
    }
}

/// Check `arguments` against the tool's JSON Schema when it declares one.
fn validate_arguments(tool: &ToolDefinition, arguments: &Value) -> Result<(), AppError> {
    if !tool.parameter_schema.is_object() {
        return Ok(());
    }
    let validator = jsonschema::validator_for(&tool.parameter_schema).map_err(|err| {
        AppError::SpecLoad(SpecLoadError::Shape {
            location: format!("tool '{}' parameters", tool.name),
            message: err.to_string(),
        })
    })?;
    if let Some(err) = validator.iter_errors(arguments).next() {
        return Err(AppError::Validation {
            message: format!("Invalid arguments for tool '{}': {err}", tool.name),
            field: Some("arguments".to_string()),
            received: None,
            docs_hint: Some(format!(
                "GET /v1/tools lists the input schema of '{}'.",
                tool.name
            )),
        });
    }
    Ok(())
}
