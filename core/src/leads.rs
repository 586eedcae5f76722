//! Lead records: intake validation and priority scoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::validate::{is_email, is_identifier};

pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_NOTES_CHARS: usize = 500;
pub const MIN_PHONE_CHARS: usize = 8;
pub const MAX_SCORE: u8 = 100;

/// Score at which a lead would be routed to an agent automatically.
pub const AUTO_ASSIGN_THRESHOLD: u8 = 60;

const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "outlook.com",
    "hotmail.com",
    "yahoo.com",
    "icloud.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    Web,
    Whatsapp,
    #[default]
    Manual,
    Api,
}

impl LeadSource {
    pub const ALL: [LeadSource; 4] = [
        LeadSource::Web,
        LeadSource::Whatsapp,
        LeadSource::Manual,
        LeadSource::Api,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LeadSource::Web => "web",
            LeadSource::Whatsapp => "whatsapp",
            LeadSource::Manual => "manual",
            LeadSource::Api => "api",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|source| source.as_str() == value)
    }

    fn base_points(self) -> u8 {
        match self {
            LeadSource::Web => 30,
            LeadSource::Whatsapp => 50,
            LeadSource::Manual => 70,
            LeadSource::Api => 40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Converted => "converted",
            LeadStatus::Lost => "lost",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            LeadStatus::New,
            LeadStatus::Contacted,
            LeadStatus::Qualified,
            LeadStatus::Converted,
            LeadStatus::Lost,
        ]
        .into_iter()
        .find(|status| status.as_str() == value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Lead {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub source: LeadSource,
    pub notes: Option<String>,
    pub score: u8,
    pub status: LeadStatus,
    pub assigned_to: Option<String>,
    pub tenant_id: String,
    pub created_by: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw `crm.create_lead` arguments. Every field is optional at this stage so
/// that validation can name the missing one.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct CreateLeadArgs {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub assigned_to: Option<String>,
    pub tenant_id: Option<String>,
}

/// Validated, normalized and scored lead ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLead {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub source: LeadSource,
    pub notes: Option<String>,
    pub score: u8,
    pub assigned_to: Option<String>,
    pub tenant_id: String,
}

impl NewLead {
    /// Materialize the stored record for a fresh lead.
    pub fn into_lead(
        self,
        id: Uuid,
        created_by: Option<String>,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Lead {
        Lead {
            id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            source: self.source,
            notes: self.notes,
            score: self.score,
            status: LeadStatus::New,
            assigned_to: self.assigned_to,
            tenant_id: self.tenant_id,
            created_by,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct LeadValidationError {
    pub field: String,
    pub message: String,
}

impl LeadValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate and normalize intake arguments. `context_tenant` is the caller's
/// tenant; an explicit `tenant_id` argument takes precedence.
pub fn validate_lead(
    args: CreateLeadArgs,
    context_tenant: Option<&str>,
) -> Result<NewLead, LeadValidationError> {
    let name = non_blank(args.name).ok_or_else(|| LeadValidationError::new("name", "is required"))?;
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(LeadValidationError::new(
            "name",
            format!("must be at most {MAX_NAME_CHARS} characters"),
        ));
    }

    let email = non_blank(args.email)
        .map(|e| e.to_lowercase())
        .ok_or_else(|| LeadValidationError::new("email", "is required"))?;
    if !is_email(&email) {
        return Err(LeadValidationError::new("email", "must be a valid email address"));
    }

    let source = match non_blank(args.source) {
        None => LeadSource::default(),
        Some(raw) => LeadSource::parse(&raw).ok_or_else(|| {
            LeadValidationError::new("source", "must be one of: web, whatsapp, manual, api")
        })?,
    };

    let notes = args.notes.filter(|n| !n.trim().is_empty());
    if notes
        .as_ref()
        .is_some_and(|n| n.chars().count() > MAX_NOTES_CHARS)
    {
        return Err(LeadValidationError::new(
            "notes",
            format!("must be at most {MAX_NOTES_CHARS} characters"),
        ));
    }

    let assigned_to = non_blank(args.assigned_to);
    if assigned_to.as_deref().is_some_and(|a| !is_identifier(a)) {
        return Err(LeadValidationError::new("assigned_to", "must be a valid agent id"));
    }

    let tenant_id = match non_blank(args.tenant_id) {
        Some(explicit) => explicit,
        None => context_tenant
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| LeadValidationError::new("tenant_id", "is required"))?,
    };
    if !is_identifier(&tenant_id) {
        return Err(LeadValidationError::new("tenant_id", "must be a valid tenant id"));
    }

    let phone = non_blank(args.phone);
    let score = score_lead(source, &email, phone.as_deref());
    let assigned_to = assign_lead(assigned_to, score);

    Ok(NewLead {
        name,
        email,
        phone,
        source,
        notes,
        score,
        assigned_to,
        tenant_id,
    })
}

/// Deterministic 0-100 priority from source, email domain and phone presence.
pub fn score_lead(source: LeadSource, email: &str, phone: Option<&str>) -> u8 {
    let mut score = u32::from(source.base_points());
    if !is_free_mail(email) {
        score += 20;
    }
    if phone.is_some_and(|p| p.trim().chars().count() >= MIN_PHONE_CHARS) {
        score += 10;
    }
    score.min(u32::from(MAX_SCORE)) as u8
}

fn is_free_mail(email: &str) -> bool {
    email
        .rsplit_once('@')
        .is_some_and(|(_, domain)| {
            FREE_MAIL_DOMAINS
                .iter()
                .any(|free| free.eq_ignore_ascii_case(domain))
        })
}

/// High-scoring leads without an explicit assignee stay unassigned until an
/// assignment policy exists.
pub fn assign_lead(explicit: Option<String>, score: u8) -> Option<String> {
    if explicit.is_none() && score >= AUTO_ASSIGN_THRESHOLD {
        tracing::debug!(score = score, "lead qualifies for assignment, leaving unassigned");
    }
    explicit
}
