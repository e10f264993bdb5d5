//! API models for assistant knowledge entries.

use crate::{
    db::models::knowledge::KnowledgeDBResponse,
    types::{AssistantId, KnowledgeId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KnowledgeCreate {
    pub title: String,
    pub content: String,
    /// Free-form document kind, e.g. `faq` or `text`
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
}

fn default_doc_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KnowledgeResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: KnowledgeId,
    #[schema(value_type = String, format = "uuid")]
    pub assistant_id: AssistantId,
    pub title: String,
    pub content: String,
    pub doc_type: String,
    pub created_at: DateTime<Utc>,
}

impl From<KnowledgeDBResponse> for KnowledgeResponse {
    fn from(db: KnowledgeDBResponse) -> Self {
        Self {
            id: db.id,
            assistant_id: db.assistant_id,
            title: db.title,
            content: db.content,
            doc_type: db.doc_type,
            created_at: db.created_at,
        }
    }
}
