//! `AppJson<T>`: the JSON body extractor for the tool and policy routes.
//!
//! axum's own `Json<T>` answers bad bodies with plain text. Here every
//! rejection becomes an `AppError::Validation` carrying the offending field.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

const SCHEMA_HINT: &str = "Request schemas are published at GET /api-doc/openapi.json.";

pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| AppJson(value))
            .map_err(map_json_rejection)
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let (message, field) = match &rejection {
        JsonRejection::MissingJsonContentType(_) => (
            "Expected 'Content-Type: application/json'".to_string(),
            "content-type".to_string(),
        ),
        JsonRejection::JsonSyntaxError(_) => (
            format!("Request body is not valid JSON: {}", rejection.body_text()),
            "body".to_string(),
        ),
        _ => {
            let detail = rejection.body_text();
            let field = serde_field(&detail).unwrap_or("body").to_string();
            (format!("Invalid request body: {detail}"), field)
        }
    };

    AppError::Validation {
        message,
        field: Some(field),
        received: None,
        docs_hint: Some(SCHEMA_HINT.to_string()),
    }
}

/// Field named by serde's "missing field `x`" / "unknown field `x`" messages.
fn serde_field(detail: &str) -> Option<&str> {
    ["missing field `", "unknown field `"].iter().find_map(|marker| {
        let (_, rest) = detail.split_once(marker)?;
        rest.split_once('`').map(|(name, _)| name)
    })
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    #[derive(Debug, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    #[allow(dead_code)]
    struct RoleBody {
        role: String,
    }

    async fn reject(content_type: Option<&str>, body: &'static str) -> AppError {
        let mut builder = axum::http::Request::builder();
        if let Some(value) = content_type {
            builder = builder.header("content-type", value);
        }
        let req = builder.body(Body::from(body)).unwrap();
        let rejection = Json::<RoleBody>::from_request(req, &()).await.unwrap_err();
        map_json_rejection(rejection)
    }

    fn field_of(err: AppError) -> Option<String> {
        match err {
            AppError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn serde_messages_name_the_field() {
        assert_eq!(
            serde_field("Failed to deserialize: missing field `toolName` at line 1 column 72"),
            Some("toolName")
        );
        assert_eq!(
            serde_field("unknown field `foo`, expected one of `bar`, `baz`"),
            Some("foo")
        );
        assert_eq!(serde_field("invalid type: string, expected u64"), None);
    }

    #[tokio::test]
    async fn missing_field_is_reported() {
        let err = reject(Some("application/json"), r#"{}"#).await;
        assert_eq!(field_of(err).as_deref(), Some("role"));
    }

    #[tokio::test]
    async fn unknown_field_is_reported() {
        let err = reject(Some("application/json"), r#"{"role": "x", "admin": true}"#).await;
        assert_eq!(field_of(err).as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn wrong_type_falls_back_to_body() {
        let err = reject(Some("application/json"), r#"{"role": 7}"#).await;
        assert_eq!(field_of(err).as_deref(), Some("body"));
    }

    #[tokio::test]
    async fn malformed_json_and_missing_content_type() {
        let err = reject(Some("application/json"), "{not json").await;
        assert_eq!(field_of(err).as_deref(), Some("body"));

        let err = reject(None, r#"{"role": "x"}"#).await;
        assert_eq!(field_of(err).as_deref(), Some("content-type"));
    }
}
