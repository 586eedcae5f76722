use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};

use crate::HealthResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check endpoint. Checks the lead store; the gateway itself has no
/// other stateful dependency.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Lead store unreachable", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = match state.leads.ping().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "lead store health check failed");
            false
        }
    };

    let status = if store_ok { "ok" } else { "degraded" };
    let http_status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};
    use deskgate_core::leads::Lead;
    use tower::ServiceExt;

    use crate::store::{LeadStore, StoreError};
    use crate::test_support::{app, body_json, policy_source, request, state, test_config};

    struct DownStore;

    #[async_trait]
    impl LeadStore for DownStore {
        async fn find_new_by_email(&self, _: &str, _: &str) -> Result<Option<Lead>, StoreError> {
            Err(StoreError::InvalidRow("down".into()))
        }

        async fn insert(&self, _: Lead) -> Result<Lead, StoreError> {
            Err(StoreError::InvalidRow("down".into()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::InvalidRow("down".into()))
        }
    }

    #[tokio::test]
    async fn healthy_store_reports_ok_with_version() {
        let response = app(state())
            .oneshot(request(Method::GET, "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn unreachable_store_reports_degraded() {
        let state = crate::state::AppState::new(
            test_config("http://127.0.0.1:9"),
            Arc::new(policy_source()),
            Arc::new(DownStore),
        )
        .unwrap();
        let response = app(state)
            .oneshot(request(Method::GET, "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "degraded");
    }
}
