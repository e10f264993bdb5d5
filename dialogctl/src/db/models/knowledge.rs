//! Database models for assistant knowledge entries.

use crate::types::{AssistantId, KnowledgeId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct KnowledgeCreateDBRequest {
    pub user_id: UserId,
    pub assistant_id: AssistantId,
    pub title: String,
    pub content: String,
    pub doc_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeUpdateDBRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct KnowledgeDBResponse {
    pub id: KnowledgeId,
    pub user_id: UserId,
    pub assistant_id: AssistantId,
    pub title: String,
    pub content: String,
    pub doc_type: String,
    pub created_at: DateTime<Utc>,
}
