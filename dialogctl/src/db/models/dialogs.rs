//! Database models for dialogs and their messages.

use crate::types::{AssistantId, DialogId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Where a dialog takes place, stored as TEXT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Widget,
    Telegram,
    Vk,
}

impl Channel {
    /// Telegram and VK dialogs are relayed through a bot
    pub fn is_bot(self) -> bool {
        matches!(self, Channel::Telegram | Channel::Vk)
    }
}

/// Operator handoff state of a dialog.
///
/// `none`/`released` → `requested` (detector) → `active` (operator accepts) → `released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HandoffStatus {
    #[sqlx(rename = "none")]
    #[serde(rename = "none")]
    NotRequested,
    Requested,
    Active,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
    Operator,
    System,
}

#[derive(Debug, Clone)]
pub struct DialogCreateDBRequest {
    pub assistant_id: AssistantId,
    pub user_id: UserId,
    pub channel: Channel,
    pub external_chat_id: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DialogDBResponse {
    pub id: DialogId,
    pub assistant_id: AssistantId,
    /// Owner of the assistant
    pub user_id: UserId,
    pub channel: Channel,
    pub external_chat_id: Option<String>,
    pub handoff_status: HandoffStatus,
    pub handoff_reason: Option<String>,
    pub handoff_requested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DialogMessageDBResponse {
    pub id: i64,
    pub dialog_id: DialogId,
    pub sender: Sender,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
