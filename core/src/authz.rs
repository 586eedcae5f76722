//! Allow/deny decisions for tool calls and resource access.

use std::sync::Arc;

use serde::Serialize;

use crate::policy::{
    DEFAULT_ROLE_RATE_LIMIT, PolicyError, PolicyLoader, RoleDefinition, SpecLoadError,
    ToolDefinition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    UnknownTool,
    UnknownRole,
    ToolNotPermitted,
    ResourceRestricted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct AuthzDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
    pub rate_limit_per_minute: u32,
}

impl AuthzDecision {
    fn allow(rate_limit_per_minute: u32) -> Self {
        Self {
            allowed: true,
            reason: None,
            denial: None,
            rate_limit_per_minute,
        }
    }

    fn deny(denial: Denial, reason: String, rate_limit_per_minute: u32) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            denial: Some(denial),
            rate_limit_per_minute,
        }
    }
}

/// A tool decision with the definitions it was made from, so callers do not
/// have to load them again.
#[derive(Debug, Clone)]
pub struct ToolAuthorization {
    pub decision: AuthzDecision,
    pub tool: Option<ToolDefinition>,
    pub role: Option<RoleDefinition>,
}

#[derive(Clone)]
pub struct AuthorizationEngine {
    loader: Arc<dyn PolicyLoader>,
}

impl AuthorizationEngine {
    pub fn new(loader: Arc<dyn PolicyLoader>) -> Self {
        Self { loader }
    }

    pub fn loader(&self) -> &Arc<dyn PolicyLoader> {
        &self.loader
    }

    pub async fn authorize(&self, tool: &str, role: &str) -> Result<AuthzDecision, SpecLoadError> {
        Ok(self.authorize_tool(tool, role).await?.decision)
    }

    /// Checks run in order: tool registered, role defined, role permits tool.
    /// The first failure decides. Unreadable policy is an error, never a deny.
    pub async fn authorize_tool(
        &self,
        tool: &str,
        role: &str,
    ) -> Result<ToolAuthorization, SpecLoadError> {
        let definition = match self.loader.load_tool(tool).await {
            Ok(definition) => definition,
            Err(PolicyError::NotFound { .. }) => {
                let decision = AuthzDecision::deny(
                    Denial::UnknownTool,
                    format!("Tool '{tool}' is not registered"),
                    DEFAULT_ROLE_RATE_LIMIT,
                );
                log_decision(tool, role, &decision);
                return Ok(ToolAuthorization {
                    decision,
                    tool: None,
                    role: None,
                });
            }
            Err(err) => return Err(into_spec_error(err)),
        };

        let role_definition = match self.load_role(role).await? {
            Some(role_definition) => role_definition,
            None => {
                let decision = unknown_role(role);
                log_decision(tool, role, &decision);
                return Ok(ToolAuthorization {
                    decision,
                    tool: Some(definition),
                    role: None,
                });
            }
        };

        let budget = role_definition.rate_limit_per_minute;
        let decision = if role_definition.permits_tool(tool) {
            AuthzDecision::allow(budget)
        } else {
            AuthzDecision::deny(
                Denial::ToolNotPermitted,
                format!("Tool '{tool}' is not permitted for role '{role}'"),
                budget,
            )
        };
        log_decision(tool, role, &decision);
        Ok(ToolAuthorization {
            decision,
            tool: Some(definition),
            role: Some(role_definition),
        })
    }

    pub async fn authorize_resource(
        &self,
        resource: &str,
        role: &str,
    ) -> Result<AuthzDecision, SpecLoadError> {
        let Some(role_definition) = self.load_role(role).await? else {
            return Ok(unknown_role(role));
        };
        let budget = role_definition.rate_limit_per_minute;
        let decision = if role_definition.permits_resource(resource) {
            AuthzDecision::allow(budget)
        } else {
            AuthzDecision::deny(
                Denial::ResourceRestricted,
                format!("Resource '{resource}' is restricted for role '{role}'"),
                budget,
            )
        };
        tracing::info!(
            resource = resource,
            role = role,
            decision = if decision.allowed { "allow" } else { "deny" },
            "resource authorization"
        );
        Ok(decision)
    }

    async fn load_role(&self, role: &str) -> Result<Option<RoleDefinition>, SpecLoadError> {
        match self.loader.load_role(role).await {
            Ok(definition) => Ok(Some(definition)),
            Err(PolicyError::NotFound { .. } | PolicyError::InvalidName { .. }) => Ok(None),
            Err(PolicyError::SpecLoad(err)) => Err(err),
        }
    }
}

fn unknown_role(role: &str) -> AuthzDecision {
    AuthzDecision::deny(
        Denial::UnknownRole,
        format!("Role '{role}' is not defined"),
        DEFAULT_ROLE_RATE_LIMIT,
    )
}

fn into_spec_error(err: PolicyError) -> SpecLoadError {
    match err {
        PolicyError::SpecLoad(err) => err,
        other => SpecLoadError::Shape {
            location: "policy".to_string(),
            message: other.to_string(),
        },
    }
}

fn log_decision(tool: &str, role: &str, decision: &AuthzDecision) {
    if decision.allowed {
        tracing::info!(tool = tool, role = role, decision = "allow", "tool authorization");
    } else {
        tracing::warn!(
            tool = tool,
            role = role,
            decision = "deny",
            reason = decision.reason.as_deref().unwrap_or_default(),
            "tool authorization"
        );
    }
}
