use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod client;
mod config;
mod error;
mod extract;
mod middleware;
mod routes;
mod state;
mod store;
mod sweeper;
mod tools;

#[cfg(test)]
mod test_support;

use crate::config::{Config, ConfigError};
use crate::middleware::request_id::{self, MakeUuidV7, REQUEST_ID_HEADER};
use crate::middleware::suspicious::SuspiciousFilter;
use crate::state::AppState;
use crate::store::{LeadStore, MemoryLeadStore, PgLeadStore};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "deskgate",
        version = "0.1.0",
        description = "Trust boundary between AI agents, the ticketing API and internal tools."
    ),
    paths(
        routes::health::health_check,
        routes::tools::list_tools,
        routes::tools::call_tool,
        routes::policy::check_policy,
        routes::policy::get_tenant_config,
        routes::policy::clear_policy_cache,
    ),
    components(schemas(
        HealthResponse,
        deskgate_core::error::ApiError,
        deskgate_core::authz::AuthzDecision,
        deskgate_core::authz::Denial,
        tools::ToolContext,
        tools::ToolCallRequest,
        tools::ToolEnvelope,
        routes::tools::ToolSummary,
        routes::tools::ToolListResponse,
        routes::policy::PolicyCheckRequest,
        routes::policy::PolicyCheckResponse,
        routes::policy::TenantConfigResponse,
        routes::policy::CacheClearedResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Full application router: gateway, tool and policy routes, health and docs,
/// wrapped in the shared middleware stack (outermost first: request id,
/// tracing, security headers, suspicious-request filter). CORS wraps every
/// router except the gateway, which answers its own preflights with `Allow`.
pub(crate) fn build_router(state: AppState) -> Router {
    let cors_layer = middleware::cors::build_cors_layer(&state.config.cors_origins);
    let environment = state.config.environment;
    let filter = SuspiciousFilter {
        block_automation_agents: state.config.block_automation_agents,
    };

    let service_routes = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(
            routes::tools::router()
                .merge(routes::policy::router())
                .layer(middleware::rate_limit::tools_layer()),
        )
        .layer(cors_layer);

    Router::new()
        .merge(service_routes)
        .merge(routes::gateway::router())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER.clone(), MakeUuidV7))
                .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER.clone()))
                .layer(axum::middleware::from_fn(request_id::scope))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    environment,
                    middleware::security_headers::apply,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    filter,
                    middleware::suspicious::filter,
                )),
        )
        .with_state(state)
}

async fn lead_store(config: &Config) -> Result<Arc<dyn LeadStore>, StartupError> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, leads are kept in memory and lost on restart");
        return Ok(Arc::new(MemoryLeadStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    sqlx::migrate!("../migrations").run(&pool).await?;

    Ok(Arc::new(PgLeadStore::new(pool)))
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;
    tracing::info!(
        environment = ?config.environment,
        upstream = %config.upstream_url,
        spec = %config.spec.describe(),
        "configuration loaded"
    );
    if config.internal_token.is_none() {
        tracing::warn!("DESKGATE_INTERNAL_TOKEN not set, tool and policy routes are unauthenticated");
    }

    let leads = lead_store(&config).await?;
    let spec_source = state::spec_source(&config)?;
    let app_state = AppState::new(config, spec_source, leads)?;

    sweeper::spawn_sweeper(app_state.clone());

    let addr = app_state.config.bind_addr;
    let app = build_router(app_state);

    tracing::info!("deskgate listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deskgate_api=info,deskgate_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "deskgate failed to start");
        std::process::exit(1);
    }
}
