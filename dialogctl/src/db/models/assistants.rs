//! Database models for assistants.

use crate::types::{AssistantId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct AssistantCreateDBRequest {
    pub user_id: UserId,
    pub name: String,
    pub system_prompt: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AssistantUpdateDBRequest {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    pub is_active: Option<bool>,
    pub website_integration_enabled: Option<bool>,
}

/// Database response for an assistant
#[derive(Debug, Clone, FromRow)]
pub struct AssistantDBResponse {
    pub id: AssistantId,
    pub user_id: UserId,
    pub name: String,
    pub system_prompt: String,
    pub is_active: bool,
    pub website_integration_enabled: bool,
    /// Widget tokens carrying an older version are rejected
    pub widget_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
