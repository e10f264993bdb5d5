//! API models for dialogs, messages and handoff state.

use crate::{
    db::models::dialogs::{Channel, DialogDBResponse, DialogMessageDBResponse, HandoffStatus, Sender},
    handoff::HandoffDecision,
    types::{AssistantId, DialogId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DialogResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: DialogId,
    #[schema(value_type = String, format = "uuid")]
    pub assistant_id: AssistantId,
    pub channel: Channel,
    pub external_chat_id: Option<String>,
    pub handoff_status: HandoffStatus,
    pub handoff_reason: Option<String>,
    pub handoff_requested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DialogDBResponse> for DialogResponse {
    fn from(db: DialogDBResponse) -> Self {
        Self {
            id: db.id,
            assistant_id: db.assistant_id,
            channel: db.channel,
            external_chat_id: db.external_chat_id,
            handoff_status: db.handoff_status,
            handoff_reason: db.handoff_reason,
            handoff_requested_at: db.handoff_requested_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: i64,
    pub sender: Sender,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<DialogMessageDBResponse> for MessageResponse {
    fn from(db: DialogMessageDBResponse) -> Self {
        Self {
            id: db.id,
            sender: db.sender,
            text: db.text,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DialogWithMessages {
    #[serde(flatten)]
    pub dialog: DialogResponse,
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageCreate {
    pub text: String,
}

/// Result of storing an inbound user message.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserMessageResponse {
    #[schema(value_type = String, format = "uuid")]
    pub dialog_id: DialogId,
    pub message: MessageResponse,
    pub handoff: HandoffDecision,
    /// Handoff status after this message
    pub handoff_status: HandoffStatus,
}

/// Result of an operator reply.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OperatorMessageResponse {
    pub message: MessageResponse,
    /// Whether the reply reached the messaging platform; always false for widget dialogs
    pub delivered: bool,
}
