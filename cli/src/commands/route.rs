use clap::Subcommand;
use deskgate_core::routes::RouteAuthorizer;
use serde_json::{Value, json};

use crate::util::emit;

#[derive(Subcommand)]
pub enum RouteCommands {
    /// Check a path against the gateway allowlist, without a server
    Check {
        /// Path below the gateway prefix (e.g. "conversations/7/messages")
        path: String,
        /// HTTP method to check
        #[arg(long, default_value = "GET")]
        method: String,
    },
}

pub fn run(command: RouteCommands) -> i32 {
    match command {
        RouteCommands::Check { path, method } => {
            let (allowed, report) = check(&RouteAuthorizer::ticketing(), &path, &method);
            emit(&report, if allowed { 0 } else { 1 })
        }
    }
}

fn check(authorizer: &RouteAuthorizer, path: &str, method: &str) -> (bool, Value) {
    let path = path
        .trim()
        .trim_start_matches("/api/desk")
        .trim_start_matches('/');
    let segments: Vec<&str> = path.split('/').collect();
    let method = method.trim().to_ascii_uppercase();

    match authorizer.authorize(&segments) {
        Err(rejection) => (
            false,
            json!({
                "allowed": false,
                "path": path,
                "reason": rejection.reason(),
            }),
        ),
        Ok(matched) => {
            let method_allowed = authorizer.check_method(&matched.normalized_path, &method);
            let mut report = json!({
                "allowed": method_allowed,
                "path": matched.normalized_path,
                "template": matched.template,
                "method": method,
                "allowed_methods": matched.allowed_methods,
                "rate_class": matched.rate_class.as_str(),
            });
            if !method_allowed {
                report["reason"] = json!("Method not allowed");
            }
            (method_allowed, report)
        }
    }
}
