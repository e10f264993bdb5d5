//! API models for widget tokens and widget chat.

use crate::types::{AssistantId, DialogId};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WidgetTokenCreate {
    /// Sites allowed to embed the assistant, e.g. `example.com`
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WidgetTokenResponse {
    pub token: String,
    pub domains: Vec<String>,
    pub widget_version: i32,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WidgetTokenRevokeResponse {
    /// Version new tokens will carry; older tokens are now invalid
    pub widget_version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidateWidgetTokenRequest {
    pub token: String,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidateWidgetTokenResponse {
    pub valid: bool,
    #[schema(value_type = Option<String>, format = "uuid")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<AssistantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidateWidgetTokenResponse {
    pub fn valid(assistant_id: AssistantId) -> Self {
        Self {
            valid: true,
            assistant_id: Some(assistant_id),
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            assistant_id: None,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WidgetDialogResponse {
    #[schema(value_type = String, format = "uuid")]
    pub dialog_id: DialogId,
    #[schema(value_type = String, format = "uuid")]
    pub assistant_id: AssistantId,
    pub assistant_name: String,
}
