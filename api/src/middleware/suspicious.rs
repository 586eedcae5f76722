use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::client::client_identifier;
use crate::error::AppError;
use crate::routes::gateway::GATEWAY_PREFIX;

const URL_PATTERNS: &[&str] = &["..", "<script", "javascript:", "data:", "file:"];

const AUTOMATION_AGENTS: &[&str] = &[
    "bot",
    "crawler",
    "scraper",
    "spider",
    "curl",
    "wget",
    "python",
    "java",
    "go-http-client",
    "node-fetch",
];

const AGENT_GUARDED_PREFIXES: &[&str] = &["/api/", "/v1/"];

#[derive(Debug, Clone, Copy, Default)]
pub struct SuspiciousFilter {
    pub block_automation_agents: bool,
}

impl SuspiciousFilter {
    /// Why `path_and_query` with `user_agent` should be refused, if at all.
    pub fn verdict(&self, path_and_query: &str, user_agent: &str) -> Option<&'static str> {
        let url = path_and_query.to_ascii_lowercase();

        // The gateway validates its own paths and answers with the allowlist.
        if !url.starts_with(GATEWAY_PREFIX) {
            if let Some(pattern) = URL_PATTERNS.iter().find(|p| url.contains(*p)) {
                return Some(pattern);
            }
        }

        if self.block_automation_agents
            && AGENT_GUARDED_PREFIXES.iter().any(|p| url.starts_with(p))
        {
            let agent = user_agent.to_ascii_lowercase();
            if AUTOMATION_AGENTS.iter().any(|a| agent.contains(a)) {
                return Some("automation user agent");
            }
        }
        None
    }
}

/// Refuse obviously hostile requests before routing.
pub async fn filter(State(config): State<SuspiciousFilter>, req: Request, next: Next) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| req.uri().path());
    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if let Some(matched) = config.verdict(path_and_query, user_agent) {
        tracing::warn!(
            url = %path_and_query,
            user_agent = %user_agent,
            client = %client_identifier(req.headers(), req.extensions()),
            matched,
            timestamp = %Utc::now().to_rfc3339(),
            "suspicious request blocked"
        );
        return AppError::Forbidden {
            message: "Forbidden".to_string(),
            docs_hint: None,
        }
        .into_response();
    }
    next.run(req).await
}
