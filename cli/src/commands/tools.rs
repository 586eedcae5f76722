use clap::Subcommand;
use serde_json::{Value, json};

use crate::util::{api_request, emit};

#[derive(Subcommand)]
pub enum ToolsCommands {
    /// List tool definitions, optionally only those a role may call
    List {
        #[arg(long)]
        role: Option<String>,
    },
    /// Call a tool through the dispatcher
    Call {
        /// Tool name (e.g. "crm.create_lead")
        name: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        /// Agent role the call is made as
        #[arg(long)]
        role: String,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        user: Option<String>,
    },
}

pub async fn run(api_url: &str, token: Option<&str>, command: ToolsCommands) -> i32 {
    match command {
        ToolsCommands::List { role } => {
            let query: Vec<(String, String)> =
                role.into_iter().map(|r| ("role".to_string(), r)).collect();
            api_request(api_url, reqwest::Method::GET, "/v1/tools", token, None, &query).await
        }
        ToolsCommands::Call {
            name,
            args,
            role,
            tenant,
            user,
        } => match call_body(&name, &args, &role, tenant, user) {
            Ok(body) => {
                api_request(
                    api_url,
                    reqwest::Method::POST,
                    "/v1/tools/call",
                    token,
                    Some(body),
                    &[],
                )
                .await
            }
            Err(message) => emit(&json!({"error": "cli_error", "message": message}), 4),
        },
    }
}

fn call_body(
    name: &str,
    args: &str,
    role: &str,
    tenant: Option<String>,
    user: Option<String>,
) -> Result<Value, String> {
    let arguments: Value =
        serde_json::from_str(args).map_err(|e| format!("Invalid JSON in --args: {e}"))?;
    if !arguments.is_object() {
        return Err("--args must be a JSON object".to_string());
    }
    Ok(json!({
        "toolName": name,
        "arguments": arguments,
        "context": {
            "role": role,
            "tenantId": tenant,
            "userId": user,
        }
    }))
}
