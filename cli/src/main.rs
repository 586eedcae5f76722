use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::cache::CacheCommands;
use commands::policy::PolicyCommands;
use commands::route::RouteCommands;
use commands::tools::ToolsCommands;

#[derive(Parser)]
#[command(
    name = "deskgate",
    version,
    about = "deskgate CLI: check gateway routes and agent policy, call tools"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "DESKGATE_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Internal service token for the tool and policy routes
    #[arg(long, env = "DESKGATE_INTERNAL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Gateway allowlist checks (offline)
    Route {
        #[command(subcommand)]
        command: RouteCommands,
    },
    /// Agent policy decisions
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
    /// List and call tools
    Tools {
        #[command(subcommand)]
        command: ToolsCommands,
    },
    /// Policy cache administration
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // Diagnostics go to stderr so stdout stays machine-readable JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deskgate_core=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let token = cli.token.as_deref();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Route { command } => commands::route::run(command),
        Commands::Policy { command } => commands::policy::run(&cli.api_url, token, command).await,
        Commands::Tools { command } => commands::tools::run(&cli.api_url, token, command).await,
        Commands::Cache { command } => commands::cache::run(&cli.api_url, token, command).await,
    };

    if code != 0 {
        tracing::debug!(code, "command failed");
    }
    std::process::exit(code);
}
