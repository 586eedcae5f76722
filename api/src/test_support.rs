//! Shared fixtures for router-level tests.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use deskgate_core::policy::{
    MemorySpecSource, RESOURCES_PATH, ROLES_PATH, SpecSource, TOOLS_PATH,
};
use serde_json::Value;

use crate::config::Config;
use crate::state::AppState;
use crate::store::MemoryLeadStore;

pub const INTERNAL_TOKEN: &str = "dg_test_internal";
pub const CLIENT_IP: &str = "203.0.113.9";

fn document(raw: &str) -> Value {
    serde_json::from_str(raw).expect("bundled policy document should be valid JSON")
}

pub fn tools_document() -> Value {
    document(include_str!("../../policy/core/tools.json"))
}

pub fn roles_document() -> Value {
    document(include_str!("../../policy/core/prompts.json"))
}

pub fn resources_document() -> Value {
    document(include_str!("../../policy/core/resources.json"))
}

pub fn tenant_document() -> Value {
    document(include_str!("../../policy/tenants/default/config.json"))
}

/// The bundled policy documents, served from memory.
pub fn policy_source() -> MemorySpecSource {
    MemorySpecSource::new()
        .with_document(TOOLS_PATH, tools_document())
        .with_document(ROLES_PATH, roles_document())
        .with_document(RESOURCES_PATH, resources_document())
        .with_document("tenants/default/config.json", tenant_document())
}

pub fn test_config(upstream_url: &str) -> Config {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("DESKGATE_ENV", "test"),
        ("DESKGATE_UPSTREAM_URL", upstream_url),
        ("DESKGATE_UPSTREAM_ACCOUNT_ID", "42"),
        ("DESKGATE_UPSTREAM_TOKEN", "upstream-secret"),
        ("DESKGATE_INTERNAL_TOKEN", INTERNAL_TOKEN),
        ("DESKGATE_CORS_ORIGINS", "https://desk.example.com"),
    ]);
    Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
        .expect("test configuration should be valid")
}

pub fn state_with_source(config: Config, source: Arc<dyn SpecSource>) -> AppState {
    AppState::new(config, source, Arc::new(MemoryLeadStore::new()))
        .expect("test state should build")
}

pub fn state_with_config(config: Config) -> AppState {
    state_with_source(config, Arc::new(policy_source()))
}

/// State whose upstream points at a closed port.
pub fn state() -> AppState {
    state_with_config(test_config("http://127.0.0.1:9"))
}

pub fn app(state: AppState) -> Router {
    crate::build_router(state)
}

/// Request from a fixed client address, JSON body when given.
pub fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", CLIENT_IP)
        .header("user-agent", "deskgate-tests");
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build")
}

/// Same as [`request`], carrying the internal bearer token.
pub fn internal_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let mut req = request(method, uri, body);
    req.headers_mut().insert(
        "authorization",
        format!("Bearer {INTERNAL_TOKEN}")
            .parse()
            .expect("header should parse"),
    );
    req
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}
