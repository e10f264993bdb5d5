//! API models for assistants.

use crate::{
    db::models::assistants::AssistantDBResponse,
    types::{AssistantId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssistantCreate {
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AssistantUpdate {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    pub is_active: Option<bool>,
    pub website_integration_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssistantResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: AssistantId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub name: String,
    pub system_prompt: String,
    pub is_active: bool,
    pub website_integration_enabled: bool,
    /// Incremented whenever widget tokens are revoked
    pub widget_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AssistantDBResponse> for AssistantResponse {
    fn from(db: AssistantDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            name: db.name,
            system_prompt: db.system_prompt,
            is_active: db.is_active,
            website_integration_enabled: db.website_integration_enabled,
            widget_version: db.widget_version,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}
