use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use deskgate_core::auth::{parse_bearer, token_matches};

use crate::error::AppError;
use crate::state::AppState;

/// Caller authenticated with the internal service token
/// (`Authorization: Bearer <DESKGATE_INTERNAL_TOKEN>`).
///
/// Guards the tool and policy routes. When no token is configured, which
/// config only permits in development, every caller is let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalCaller {
    Token,
    Unguarded,
}

impl FromRequestParts<AppState> for InternalCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.internal_token.as_deref() else {
            tracing::debug!("internal token not configured, allowing unauthenticated caller");
            return Ok(InternalCaller::Unguarded);
        };

        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
                docs_hint: Some(
                    "Include 'Authorization: Bearer <token>' with the internal service token."
                        .to_string(),
                ),
            })?;

        let token = parse_bearer(header).ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header must use Bearer scheme".to_string(),
            docs_hint: Some("Format: 'Authorization: Bearer <token>'".to_string()),
        })?;

        if !token_matches(token, expected) {
            tracing::warn!(path = %parts.uri.path(), "rejected internal token");
            return Err(AppError::Unauthorized {
                message: "Invalid internal token".to_string(),
                docs_hint: None,
            });
        }
        Ok(InternalCaller::Token)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;
    use crate::test_support::{INTERNAL_TOKEN, state, state_with_config, test_config};

    async fn extract(state: &AppState, header: Option<&str>) -> Result<InternalCaller, AppError> {
        let mut builder = Request::builder().uri("/v1/tools");
        if let Some(value) = header {
            builder = builder.header("authorization", value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        InternalCaller::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn valid_token_is_accepted() {
        let state = state();
        let caller = extract(&state, Some(&format!("Bearer {INTERNAL_TOKEN}")))
            .await
            .unwrap();
        assert_eq!(caller, InternalCaller::Token);
    }

    #[tokio::test]
    async fn missing_wrong_or_malformed_tokens_are_unauthorized() {
        let state = state();
        for header in [None, Some("Bearer nope"), Some(INTERNAL_TOKEN), Some("Basic abc")] {
            let err = extract(&state, header).await.unwrap_err();
            assert!(matches!(err, AppError::Unauthorized { .. }), "{header:?}");
        }
    }

    #[tokio::test]
    async fn unconfigured_token_lets_callers_through() {
        let mut config = test_config("http://127.0.0.1:9");
        config.internal_token = None;
        let state = state_with_config(config);
        assert_eq!(extract(&state, None).await.unwrap(), InternalCaller::Unguarded);
    }
}
