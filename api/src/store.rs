//! Lead persistence. Postgres in deployments, memory when no database is configured.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deskgate_core::leads::{Lead, LeadSource, LeadStatus};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `new` lead with the same tenant and email already exists.
    #[error("lead already exists")]
    Duplicate,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("stored lead row is invalid: {0}")]
    InvalidRow(String),
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// The open (`status = new`) lead for `email` in `tenant_id`, if any.
    async fn find_new_by_email(
        &self,
        tenant_id: &str,
        email: &str,
    ) -> Result<Option<Lead>, StoreError>;

    async fn insert(&self, lead: Lead) -> Result<Lead, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

// ──────────────────────────────────────────────
// Postgres
// ──────────────────────────────────────────────

#[derive(Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const LEAD_COLUMNS: &str = "id, tenant_id, name, email, phone, source, notes, score, status, \
     assigned_to, created_by, metadata, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct LeadRow {
    id: Uuid,
    tenant_id: String,
    name: String,
    email: String,
    phone: Option<String>,
    source: String,
    notes: Option<String>,
    score: i16,
    status: String,
    assigned_to: Option<String>,
    created_by: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LeadRow> for Lead {
    type Error = StoreError;

    fn try_from(row: LeadRow) -> Result<Self, Self::Error> {
        let source = LeadSource::parse(&row.source)
            .ok_or_else(|| StoreError::InvalidRow(format!("unknown source '{}'", row.source)))?;
        let status = LeadStatus::parse(&row.status)
            .ok_or_else(|| StoreError::InvalidRow(format!("unknown status '{}'", row.status)))?;
        let score = u8::try_from(row.score)
            .map_err(|_| StoreError::InvalidRow(format!("score {} out of range", row.score)))?;
        Ok(Lead {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            source,
            notes: row.notes,
            score,
            status,
            assigned_to: row.assigned_to,
            tenant_id: row.tenant_id,
            created_by: row.created_by,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn find_new_by_email(
        &self,
        tenant_id: &str,
        email: &str,
    ) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads \
             WHERE tenant_id = $1 AND lower(email) = lower($2) AND status = 'new' \
             LIMIT 1"
        ))
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Lead::try_from).transpose()
    }

    async fn insert(&self, lead: Lead) -> Result<Lead, StoreError> {
        let result = sqlx::query_as::<_, LeadRow>(&format!(
            "INSERT INTO leads ({LEAD_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {LEAD_COLUMNS}"
        ))
        .bind(lead.id)
        .bind(&lead.tenant_id)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(lead.source.as_str())
        .bind(&lead.notes)
        .bind(i16::from(lead.score))
        .bind(lead.status.as_str())
        .bind(&lead.assigned_to)
        .bind(&lead.created_by)
        .bind(&lead.metadata)
        .bind(lead.created_at)
        .bind(lead.updated_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Lead::try_from(row),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Err(StoreError::Duplicate)
            }
            Err(err) => Err(StoreError::Database(err)),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Memory
// ──────────────────────────────────────────────

/// Process-local store. Enforces the same open-lead uniqueness as the
/// Postgres partial index.
#[derive(Debug, Default)]
pub struct MemoryLeadStore {
    leads: Mutex<Vec<Lead>>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Lead>>, StoreError> {
        self.leads
            .lock()
            .map_err(|_| StoreError::InvalidRow("lead store lock poisoned".to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|leads| leads.len()).unwrap_or(0)
    }
}

fn is_open_duplicate(existing: &Lead, tenant_id: &str, email: &str) -> bool {
    existing.status == LeadStatus::New
        && existing.tenant_id == tenant_id
        && existing.email.eq_ignore_ascii_case(email)
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn find_new_by_email(
        &self,
        tenant_id: &str,
        email: &str,
    ) -> Result<Option<Lead>, StoreError> {
        Ok(self
            .lock()?
            .iter()
            .find(|lead| is_open_duplicate(lead, tenant_id, email))
            .cloned())
    }

    async fn insert(&self, lead: Lead) -> Result<Lead, StoreError> {
        let mut leads = self.lock()?;
        if lead.status == LeadStatus::New
            && leads
                .iter()
                .any(|existing| is_open_duplicate(existing, &lead.tenant_id, &lead.email))
        {
            return Err(StoreError::Duplicate);
        }
        leads.push(lead.clone());
        Ok(lead)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
