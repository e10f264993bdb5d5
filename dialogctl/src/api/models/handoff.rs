use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HandoffDetectRequest {
    pub text: String,
    /// Previous user messages, newest first, for the repeat boost
    #[serde(default)]
    pub history: Vec<String>,
}
