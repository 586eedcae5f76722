//! Policy documents: tools, resources, roles and per-tenant configuration.
//!
//! Documents come from a [`SpecSource`] (local directory, remote document
//! store, or memory in tests). [`SpecPolicyLoader`] fetches and validates
//! them on every call; [`CachedPolicyLoader`] wraps any [`PolicyLoader`] and
//! serves repeated reads from a [`SpecCache`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::SpecCache;
use crate::validate::is_identifier;

pub const TOOLS_PATH: &str = "core/tools.json";
pub const RESOURCES_PATH: &str = "core/resources.json";
pub const ROLES_PATH: &str = "core/prompts.json";

pub const DEFAULT_TENANT: &str = "default";

/// Budget used when a role's own limit cannot be read.
pub const DEFAULT_ROLE_RATE_LIMIT: u32 = 10;

pub const WILDCARD_TOOL: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecLoadError {
    #[error("failed to fetch policy document {location}: {message}")]
    Fetch { location: String, message: String },
    #[error("policy document {location} is malformed: {message}")]
    Shape { location: String, message: String },
}

impl SpecLoadError {
    pub fn location(&self) -> &str {
        match self {
            SpecLoadError::Fetch { location, .. } | SpecLoadError::Shape { location, .. } => {
                location
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Tool,
    Resource,
    Role,
    Tenant,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PolicyKind::Tool => "tool",
            PolicyKind::Resource => "resource",
            PolicyKind::Role => "role",
            PolicyKind::Tenant => "tenant",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("{kind} '{name}' is not defined")]
    NotFound { kind: PolicyKind, name: String },
    #[error("invalid {kind} identifier '{name}'")]
    InvalidName { kind: PolicyKind, name: String },
    #[error(transparent)]
    SpecLoad(#[from] SpecLoadError),
}

// ──────────────────────────────────────────────
// Document shapes
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments. `null` when the document omits it.
    #[schema(value_type = Object)]
    pub parameter_schema: Value,
    /// Name of the registered handler; the tool name when unset.
    pub handler_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ResourceDefinition {
    pub name: String,
    pub description: String,
    pub content_type: String,
    pub handler_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RoleDefinition {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    /// Tool names, possibly including `"*"`.
    pub allowed_tools: BTreeSet<String>,
    /// Glob patterns (`*` matches any run of characters) the role may not touch.
    pub restricted_resource_patterns: Vec<String>,
    pub rate_limit_per_minute: u32,
    pub audit_required: bool,
}

impl RoleDefinition {
    pub fn permits_tool(&self, tool: &str) -> bool {
        validate_tool_for_role(tool, self)
    }

    pub fn permits_resource(&self, resource: &str) -> bool {
        validate_resource_access(resource, self)
    }
}

#[derive(Debug, Deserialize)]
struct ToolDoc {
    description: String,
    #[serde(default)]
    handler: Option<String>,
    #[serde(default)]
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ResourceDoc {
    description: String,
    content_type: String,
    #[serde(default)]
    handler: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoleRateLimitDoc {
    requests_per_minute: u32,
}

#[derive(Debug, Deserialize)]
struct RoleDoc {
    description: String,
    system_prompt: String,
    allowed_tools: Vec<String>,
    restricted_resources: Vec<String>,
    rate_limit: RoleRateLimitDoc,
    #[serde(default)]
    audit_required: Option<bool>,
}

fn handler_or_name(handler: Option<String>, name: &str) -> String {
    handler
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| name.to_string())
}

fn parse_document<T: DeserializeOwned>(
    location: &str,
    value: Value,
) -> Result<BTreeMap<String, T>, SpecLoadError> {
    let parsed: BTreeMap<String, T> =
        serde_json::from_value(value).map_err(|err| SpecLoadError::Shape {
            location: location.to_string(),
            message: err.to_string(),
        })?;
    if let Some(blank) = parsed.keys().find(|name| name.trim().is_empty()) {
        return Err(SpecLoadError::Shape {
            location: location.to_string(),
            message: format!("entry name '{blank}' must not be blank"),
        });
    }
    Ok(parsed)
}

fn tools_from_document(location: &str, value: Value) -> Result<Vec<ToolDefinition>, SpecLoadError> {
    let docs: BTreeMap<String, ToolDoc> = parse_document(location, value)?;
    docs.into_iter()
        .map(|(name, doc)| {
            if !(doc.parameters.is_null() || doc.parameters.is_object() || doc.parameters.is_boolean()) {
                return Err(SpecLoadError::Shape {
                    location: location.to_string(),
                    message: format!("tool '{name}': parameters must be a JSON Schema object"),
                });
            }
            Ok(ToolDefinition {
                handler_ref: handler_or_name(doc.handler, &name),
                description: doc.description,
                parameter_schema: doc.parameters,
                name,
            })
        })
        .collect()
}

fn resources_from_document(
    location: &str,
    value: Value,
) -> Result<Vec<ResourceDefinition>, SpecLoadError> {
    let docs: BTreeMap<String, ResourceDoc> = parse_document(location, value)?;
    Ok(docs
        .into_iter()
        .map(|(name, doc)| ResourceDefinition {
            handler_ref: handler_or_name(doc.handler, &name),
            description: doc.description,
            content_type: doc.content_type,
            name,
        })
        .collect())
}

fn roles_from_document(
    location: &str,
    value: Value,
) -> Result<BTreeMap<String, RoleDefinition>, SpecLoadError> {
    let docs: BTreeMap<String, RoleDoc> = parse_document(location, value)?;
    Ok(docs
        .into_iter()
        .map(|(name, doc)| {
            let role = RoleDefinition {
                name: name.clone(),
                description: doc.description,
                system_prompt: doc.system_prompt,
                allowed_tools: doc.allowed_tools.into_iter().collect(),
                restricted_resource_patterns: doc.restricted_resources,
                rate_limit_per_minute: doc.rate_limit.requests_per_minute,
                audit_required: doc.audit_required.unwrap_or(false),
            };
            (name, role)
        })
        .collect())
}

// ──────────────────────────────────────────────
// Decisions over a loaded role
// ──────────────────────────────────────────────

pub fn validate_tool_for_role(tool: &str, role: &RoleDefinition) -> bool {
    role.allowed_tools.contains(WILDCARD_TOOL) || role.allowed_tools.contains(tool)
}

pub fn validate_resource_access(resource: &str, role: &RoleDefinition) -> bool {
    !role
        .restricted_resource_patterns
        .iter()
        .any(|pattern| glob_matches(pattern, resource))
}

/// Whole-string glob match where every `*` matches any run of characters
/// (including `/` and the empty run). No other metacharacters.
///
/// A pattern that cannot be compiled counts as a match, so a broken
/// restriction denies rather than allows.
pub fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    match Regex::new(&format!("(?s)^{body}$")) {
        Ok(compiled) => compiled.is_match(candidate),
        Err(err) => {
            tracing::warn!(pattern, error = %err, "resource pattern does not compile");
            true
        }
    }
}

// ──────────────────────────────────────────────
// Sources
// ──────────────────────────────────────────────

#[async_trait]
pub trait SpecSource: Send + Sync {
    /// Where `path` would be read from, for error messages and logs.
    fn locate(&self, path: &str) -> String;

    async fn fetch(&self, path: &str) -> Result<Value, SpecLoadError>;
}

/// Reads documents from a directory tree.
#[derive(Debug, Clone)]
pub struct FileSpecSource {
    root: PathBuf,
}

impl FileSpecSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SpecSource for FileSpecSource {
    fn locate(&self, path: &str) -> String {
        self.root.join(path).display().to_string()
    }

    async fn fetch(&self, path: &str) -> Result<Value, SpecLoadError> {
        let location = self.locate(path);
        let raw = tokio::fs::read_to_string(self.root.join(path))
            .await
            .map_err(|err| SpecLoadError::Fetch {
                location: location.clone(),
                message: err.to_string(),
            })?;
        serde_json::from_str(&raw).map_err(|err| SpecLoadError::Shape {
            location,
            message: err.to_string(),
        })
    }
}

/// Reads documents from a remote document store over HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpSpecSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSpecSource {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl SpecSource for HttpSpecSource {
    fn locate(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn fetch(&self, path: &str) -> Result<Value, SpecLoadError> {
        let location = self.locate(path);
        let fetch_err = |message: String| SpecLoadError::Fetch {
            location: location.clone(),
            message,
        };
        let response = self
            .client
            .get(&location)
            .send()
            .await
            .map_err(|err| fetch_err(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_err(format!("upstream returned {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|err| fetch_err(err.to_string()))?;
        serde_json::from_str(&body).map_err(|err| SpecLoadError::Shape {
            location: location.clone(),
            message: err.to_string(),
        })
    }
}

/// In-process documents keyed by path. Counts fetches so callers can
/// observe caching.
#[derive(Debug, Default)]
pub struct MemorySpecSource {
    documents: DashMap<String, Value>,
    fetches: AtomicUsize,
}

impl MemorySpecSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, path: &str, document: Value) -> Self {
        self.insert(path, document);
        self
    }

    pub fn insert(&self, path: &str, document: Value) {
        self.documents.insert(path.to_string(), document);
    }

    pub fn remove(&self, path: &str) {
        self.documents.remove(path);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpecSource for MemorySpecSource {
    fn locate(&self, path: &str) -> String {
        format!("memory://{path}")
    }

    async fn fetch(&self, path: &str) -> Result<Value, SpecLoadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.documents
            .get(path)
            .map(|doc| doc.value().clone())
            .ok_or_else(|| SpecLoadError::Fetch {
                location: self.locate(path),
                message: "document not found".to_string(),
            })
    }
}

// ──────────────────────────────────────────────
// Loaders
// ──────────────────────────────────────────────

#[async_trait]
pub trait PolicyLoader: Send + Sync {
    async fn load_tools(&self) -> Result<Vec<ToolDefinition>, PolicyError>;

    async fn load_tool(&self, name: &str) -> Result<ToolDefinition, PolicyError> {
        self.load_tools()
            .await?
            .into_iter()
            .find(|tool| tool.name == name)
            .ok_or_else(|| PolicyError::NotFound {
                kind: PolicyKind::Tool,
                name: name.to_string(),
            })
    }

    async fn load_resources(&self) -> Result<Vec<ResourceDefinition>, PolicyError>;

    async fn load_role(&self, name: &str) -> Result<RoleDefinition, PolicyError>;

    async fn load_tenant_config(&self, tenant_id: &str) -> Result<Value, PolicyError>;

    /// Drop any cached documents. Loaders without a cache have nothing to do.
    fn invalidate(&self) {}
}

/// Role budget with the conservative fallback when the role cannot be read.
pub async fn rate_limit_for(loader: &dyn PolicyLoader, role: &str) -> u32 {
    match loader.load_role(role).await {
        Ok(definition) => definition.rate_limit_per_minute,
        Err(err) => {
            tracing::warn!(role = role, error = %err, "falling back to default role rate limit");
            DEFAULT_ROLE_RATE_LIMIT
        }
    }
}

/// Fetches and validates documents on every call.
#[derive(Clone)]
pub struct SpecPolicyLoader {
    source: Arc<dyn SpecSource>,
}

impl SpecPolicyLoader {
    pub fn new(source: Arc<dyn SpecSource>) -> Self {
        Self { source }
    }

    async fn fetch(&self, path: &str) -> Result<(String, Value), SpecLoadError> {
        let location = self.source.locate(path);
        tracing::debug!(source = %location, "loading policy document");
        match self.source.fetch(path).await {
            Ok(value) => Ok((location, value)),
            Err(err) => {
                tracing::error!(source = %location, error = %err, "policy document load failed");
                Err(err)
            }
        }
    }
}

#[async_trait]
impl PolicyLoader for SpecPolicyLoader {
    async fn load_tools(&self) -> Result<Vec<ToolDefinition>, PolicyError> {
        let (location, value) = self.fetch(TOOLS_PATH).await?;
        Ok(tools_from_document(&location, value)?)
    }

    async fn load_resources(&self) -> Result<Vec<ResourceDefinition>, PolicyError> {
        let (location, value) = self.fetch(RESOURCES_PATH).await?;
        Ok(resources_from_document(&location, value)?)
    }

    async fn load_role(&self, name: &str) -> Result<RoleDefinition, PolicyError> {
        let (location, value) = self.fetch(ROLES_PATH).await?;
        roles_from_document(&location, value)?
            .remove(name)
            .ok_or_else(|| PolicyError::NotFound {
                kind: PolicyKind::Role,
                name: name.to_string(),
            })
    }

    async fn load_tenant_config(&self, tenant_id: &str) -> Result<Value, PolicyError> {
        if !is_identifier(tenant_id) {
            return Err(PolicyError::InvalidName {
                kind: PolicyKind::Tenant,
                name: tenant_id.to_string(),
            });
        }
        let (_, value) = self.fetch(&format!("tenants/{tenant_id}/config.json")).await?;
        Ok(value)
    }
}

/// Cache-fronted loader built around any other loader.
pub struct CachedPolicyLoader {
    inner: Arc<dyn PolicyLoader>,
    tools: SpecCache<Vec<ToolDefinition>>,
    resources: SpecCache<Vec<ResourceDefinition>>,
    roles: SpecCache<RoleDefinition>,
    tenants: SpecCache<Value>,
}

impl CachedPolicyLoader {
    pub fn new(inner: Arc<dyn PolicyLoader>, ttl: Duration) -> Self {
        Self {
            inner,
            tools: SpecCache::new(ttl),
            resources: SpecCache::new(ttl),
            roles: SpecCache::new(ttl),
            tenants: SpecCache::new(ttl),
        }
    }

    pub fn clear(&self) {
        self.tools.clear();
        self.resources.clear();
        self.roles.clear();
        self.tenants.clear();
        tracing::info!("policy cache cleared");
    }

    /// Evict expired documents. Returns how many went.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.tools.sweep(now) + self.resources.sweep(now) + self.roles.sweep(now) + self.tenants.sweep(now)
    }

    pub fn cached_documents(&self) -> usize {
        self.tools.len() + self.resources.len() + self.roles.len() + self.tenants.len()
    }
}

#[async_trait]
impl PolicyLoader for CachedPolicyLoader {
    async fn load_tools(&self) -> Result<Vec<ToolDefinition>, PolicyError> {
        self.tools
            .get_or_try_load("tools", || self.inner.load_tools())
            .await
    }

    async fn load_resources(&self) -> Result<Vec<ResourceDefinition>, PolicyError> {
        self.resources
            .get_or_try_load("resources", || self.inner.load_resources())
            .await
    }

    async fn load_role(&self, name: &str) -> Result<RoleDefinition, PolicyError> {
        self.roles
            .get_or_try_load(&format!("role:{name}"), || self.inner.load_role(name))
            .await
    }

    async fn load_tenant_config(&self, tenant_id: &str) -> Result<Value, PolicyError> {
        self.tenants
            .get_or_try_load(&format!("tenant:{tenant_id}"), || {
                self.inner.load_tenant_config(tenant_id)
            })
            .await
    }

    fn invalidate(&self) {
        self.clear();
    }
}
