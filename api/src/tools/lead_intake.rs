use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deskgate_core::leads::{CreateLeadArgs, validate_lead};
use serde_json::{Value, json};
use uuid::Uuid;

use super::{ToolContext, ToolHandler};
use crate::error::AppError;
use crate::store::LeadStore;

pub const HANDLER_REF: &str = "lead_intake";

/// `crm.create_lead`: validate, reject open duplicates, score and store.
pub struct LeadIntakeHandler {
    store: Arc<dyn LeadStore>,
}

impl LeadIntakeHandler {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for LeadIntakeHandler {
    async fn call(&self, arguments: Value, context: ToolContext) -> Result<Value, AppError> {
        let args: CreateLeadArgs = serde_json::from_value(arguments).map_err(|err| {
            AppError::Validation {
                message: format!("Invalid lead arguments: {err}"),
                field: Some("arguments".to_string()),
                received: None,
                docs_hint: None,
            }
        })?;
        let new_lead = validate_lead(args, context.tenant_id.as_deref())?;

        // Advisory only; the store's uniqueness constraint is the real guard.
        if self
            .store
            .find_new_by_email(&new_lead.tenant_id, &new_lead.email)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict {
                message: "lead already exists".to_string(),
                field: Some("email".to_string()),
            });
        }

        let metadata = json!({
            "created_via": "tool",
            "role": context.role,
        });
        let lead = new_lead.into_lead(Uuid::now_v7(), context.user_id, metadata, Utc::now());
        let stored = self.store.insert(lead).await?;

        tracing::info!(
            lead_id = %stored.id,
            tenant_id = %stored.tenant_id,
            score = stored.score,
            source = stored.source.as_str(),
            "lead created"
        );
        serde_json::to_value(&stored).map_err(|err| AppError::Internal(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryLeadStore;

    fn handler() -> (Arc<MemoryLeadStore>, LeadIntakeHandler) {
        let store = Arc::new(MemoryLeadStore::new());
        (store.clone(), LeadIntakeHandler::new(store))
    }

    fn context() -> ToolContext {
        ToolContext {
            role: "sales_assistant".into(),
            tenant_id: Some("t1".into()),
            user_id: Some("u1".into()),
        }
    }

    #[tokio::test]
    async fn creates_scored_lead_with_provenance() {
        let (store, handler) = handler();
        let value = handler
            .call(
                json!({
                    "name": "Ana Rojas",
                    "email": "Ana@Acme.cl",
                    "phone": "+56912345678",
                    "source": "whatsapp"
                }),
                context(),
            )
            .await
            .unwrap();
        assert_eq!(value["score"], 80);
        assert_eq!(value["status"], "new");
        assert_eq!(value["email"], "ana@acme.cl");
        assert_eq!(value["tenant_id"], "t1");
        assert_eq!(value["created_by"], "u1");
        assert_eq!(value["metadata"]["role"], "sales_assistant");
        assert_eq!(value["assigned_to"], Value::Null);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn second_open_lead_for_same_email_conflicts() {
        let (store, handler) = handler();
        let args = json!({"name": "Ana", "email": "a@b.com"});
        handler.call(args.clone(), context()).await.unwrap();
        let err = handler.call(args, context()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn same_email_in_another_tenant_is_allowed() {
        let (store, handler) = handler();
        handler
            .call(json!({"name": "Ana", "email": "a@b.com"}), context())
            .await
            .unwrap();
        handler
            .call(json!({"name": "Ana", "email": "a@b.com", "tenant_id": "t2"}), context())
            .await
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn missing_tenant_is_rejected_before_store() {
        let (store, handler) = handler();
        let mut ctx = context();
        ctx.tenant_id = None;
        let err = handler
            .call(json!({"name": "Ana", "email": "a@b.com"}), ctx)
            .await
            .unwrap_err();
        match err {
            AppError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("tenant_id")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn wrongly_typed_arguments_are_validation_errors() {
        let (_, handler) = handler();
        let err = handler
            .call(json!({"name": 7, "email": "a@b.com"}), context())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
