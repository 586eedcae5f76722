use clap::Subcommand;

use crate::util::api_request;

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Drop every cached policy document on the server
    Clear,
}

pub async fn run(api_url: &str, token: Option<&str>, command: CacheCommands) -> i32 {
    match command {
        CacheCommands::Clear => {
            api_request(
                api_url,
                reqwest::Method::DELETE,
                "/v1/policy/cache",
                token,
                None,
                &[],
            )
            .await
        }
    }
}
