//! Database models for messaging platform bot tokens.

use crate::db::models::dialogs::Channel;
use crate::types::{AssistantId, BotTokenId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Vk,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Vk => "vk",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "telegram" => Ok(Platform::Telegram),
            "vk" => Ok(Platform::Vk),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

impl From<Platform> for Channel {
    fn from(platform: Platform) -> Self {
        match platform {
            Platform::Telegram => Channel::Telegram,
            Platform::Vk => Channel::Vk,
        }
    }
}

impl TryFrom<Channel> for Platform {
    type Error = Channel;

    fn try_from(channel: Channel) -> Result<Self, Self::Error> {
        match channel {
            Channel::Telegram => Ok(Platform::Telegram),
            Channel::Vk => Ok(Platform::Vk),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotTokenUpsertDBRequest {
    pub user_id: UserId,
    pub platform: Platform,
    pub token: String,
    pub assistant_id: Option<AssistantId>,
    /// VK community id; unused for Telegram
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BotTokenDBResponse {
    pub id: BotTokenId,
    pub user_id: UserId,
    pub assistant_id: Option<AssistantId>,
    pub platform: Platform,
    pub token: String,
    pub group_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse() {
        assert_eq!("telegram".parse::<Platform>().unwrap(), Platform::Telegram);
        assert_eq!("VK".parse::<Platform>().unwrap(), Platform::Vk);
        assert!("whatsapp".parse::<Platform>().is_err());
        assert_eq!(Platform::try_from(Channel::Vk), Ok(Platform::Vk));
        assert_eq!(Platform::try_from(Channel::Widget), Err(Channel::Widget));
    }
}
