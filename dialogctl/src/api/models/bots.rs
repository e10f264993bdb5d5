//! API models for bot tokens and bot-worker relays.

use crate::{
    db::models::{bot_tokens::{BotTokenDBResponse, Platform}, dialogs::HandoffStatus},
    handoff::HandoffDecision,
    types::{AssistantId, DialogId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BotTokenUpsert {
    pub token: String,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub assistant_id: Option<AssistantId>,
    /// VK community id
    pub group_id: Option<String>,
}

/// Stored bot. The token itself is never returned.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BotTokenResponse {
    pub platform: Platform,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub assistant_id: Option<AssistantId>,
    pub group_id: Option<String>,
    /// Last four characters of the token
    pub token_hint: String,
    pub updated_at: DateTime<Utc>,
}

impl From<BotTokenDBResponse> for BotTokenResponse {
    fn from(db: BotTokenDBResponse) -> Self {
        let chars: Vec<char> = db.token.chars().collect();
        let token_hint = chars[chars.len().saturating_sub(4)..].iter().collect();
        Self {
            platform: db.platform,
            assistant_id: db.assistant_id,
            group_id: db.group_id,
            token_hint,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BotReloadRequest {
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BotReloadResponse {
    /// False when no bot manager endpoint is configured
    pub reloaded: bool,
}

/// Inbound message relayed by a bot worker.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BotInboundMessage {
    #[schema(value_type = String, format = "uuid")]
    pub assistant_id: AssistantId,
    pub chat_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BotInboundResponse {
    #[schema(value_type = String, format = "uuid")]
    pub dialog_id: DialogId,
    pub handoff: HandoffDecision,
    pub handoff_status: HandoffStatus,
}
