use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use deskgate_core::authz::AuthorizationEngine;
use deskgate_core::policy::{FileSpecSource, SpecLoadError, SpecPolicyLoader, rate_limit_for};
use serde_json::{Value, json};

use crate::util::{api_request, emit};

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Explain what a role may do with a tool and/or resource
    Check {
        /// Agent role name
        #[arg(long)]
        role: String,
        /// Tool name (e.g. "crm.create_lead")
        #[arg(long)]
        tool: Option<String>,
        /// Resource name or path
        #[arg(long)]
        resource: Option<String>,
        /// Evaluate local policy documents instead of asking the server
        #[arg(long, env = "DESKGATE_SPEC_PATH")]
        spec_path: Option<PathBuf>,
    },
}

pub async fn run(api_url: &str, token: Option<&str>, command: PolicyCommands) -> i32 {
    match command {
        PolicyCommands::Check {
            role,
            tool,
            resource,
            spec_path,
        } => {
            if tool.is_none() && resource.is_none() {
                return emit(
                    &json!({
                        "error": "cli_error",
                        "message": "Provide --tool, --resource, or both"
                    }),
                    4,
                );
            }
            match spec_path {
                Some(root) => match check_local(root, &role, tool.as_deref(), resource.as_deref()).await {
                    Ok(report) => emit(&report, 0),
                    Err(err) => emit(
                        &json!({
                            "error": "spec_load_failed",
                            "message": err.to_string(),
                            "source": err.location(),
                        }),
                        2,
                    ),
                },
                None => {
                    let mut body = json!({ "role": role });
                    if let Some(tool) = tool {
                        body["tool"] = json!(tool);
                    }
                    if let Some(resource) = resource {
                        body["resource"] = json!(resource);
                    }
                    api_request(
                        api_url,
                        reqwest::Method::POST,
                        "/v1/policy/check",
                        token,
                        Some(body),
                        &[],
                    )
                    .await
                }
            }
        }
    }
}

/// Same decision shape as `POST /v1/policy/check`, computed from files.
async fn check_local(
    root: PathBuf,
    role: &str,
    tool: Option<&str>,
    resource: Option<&str>,
) -> Result<Value, SpecLoadError> {
    let loader = Arc::new(SpecPolicyLoader::new(Arc::new(FileSpecSource::new(root))));
    let engine = AuthorizationEngine::new(loader.clone());

    let mut report = json!({
        "role": role,
        "rate_limit_per_minute": rate_limit_for(loader.as_ref(), role).await,
    });
    if let Some(tool) = tool {
        report["tool"] = json!(engine.authorize(tool, role).await?);
    }
    if let Some(resource) = resource {
        report["resource"] = json!(engine.authorize_resource(resource, role).await?);
    }
    Ok(report)
}
