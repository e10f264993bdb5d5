//! Outbound messaging-platform calls: operator replies relayed to Telegram/VK and reload
//! notifications for the bot manager.

use rand::prelude::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::{config::BotsConfig, db::models::bot_tokens::Platform, payment_providers::http_client, types::UserId};

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("{platform} API rejected the message: {description}")]
    Rejected { platform: Platform, description: String },

    #[error("Unexpected HTTP {status} from {target}")]
    Status { target: String, status: u16 },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VkResponse {
    error: Option<VkError>,
}

#[derive(Debug, Deserialize)]
struct VkError {
    error_code: Option<i64>,
    error_msg: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReloadRequest {
    user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<Platform>,
}

/// Client for the messaging platforms and the bot manager.
#[derive(Clone)]
pub struct BotRelay {
    client: reqwest::Client,
    telegram_api_base: Url,
    vk_api_base: Url,
    vk_api_version: String,
    reload_url: Option<Url>,
    reload_timeout: Duration,
}

fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

impl BotRelay {
    pub fn new(config: &BotsConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.send_timeout)?,
            telegram_api_base: config.telegram_api_base.clone(),
            vk_api_base: config.vk_api_base.clone(),
            vk_api_version: config.vk_api_version.clone(),
            reload_url: config.reload_url.clone(),
            reload_timeout: config.reload_timeout,
        })
    }

    /// Send `text` to a chat on the given platform using the bot's token.
    #[instrument(skip(self, token, text), err)]
    pub async fn send_message(&self, platform: Platform, token: &str, chat_id: &str, text: &str) -> Result<()> {
        match platform {
            Platform::Telegram => self.send_telegram(token, chat_id, text).await,
            Platform::Vk => self.send_vk(token, chat_id, text).await,
        }
    }

    async fn send_telegram(&self, token: &str, chat_id: &str, text: &str) -> Result<()> {
        let url = endpoint(&self.telegram_api_base, &format!("bot{token}/sendMessage"));
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;

        // Telegram reports failures in the body with a 4xx status
        let body: TelegramResponse = response.json().await?;
        if body.ok {
            Ok(())
        } else {
            Err(BotError::Rejected {
                platform: Platform::Telegram,
                description: body.description.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }

    async fn send_vk(&self, token: &str, chat_id: &str, text: &str) -> Result<()> {
        let url = endpoint(&self.vk_api_base, "method/messages.send");
        let random_id = rng().random::<i32>().to_string();
        let response = self
            .client
            .post(url)
            .form(&[
                ("access_token", token),
                ("v", self.vk_api_version.as_str()),
                ("peer_id", chat_id),
                ("message", text),
                ("random_id", random_id.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Status {
                target: "vk".to_string(),
                status: status.as_u16(),
            });
        }

        let body: VkResponse = response.json().await?;
        match body.error {
            None => Ok(()),
            Some(error) => Err(BotError::Rejected {
                platform: Platform::Vk,
                description: format!(
                    "{} (code {})",
                    error.error_msg.unwrap_or_else(|| "unknown error".to_string()),
                    error.error_code.unwrap_or_default()
                ),
            }),
        }
    }

    /// Ask the bot manager to restart the user's bots. Returns `false` when no reload endpoint is
    /// configured.
    #[instrument(skip(self), err)]
    pub async fn reload(&self, user_id: UserId, platform: Option<Platform>) -> Result<bool> {
        let Some(url) = &self.reload_url else {
            tracing::debug!("No bot reload endpoint configured, skipping");
            return Ok(false);
        };

        let response = self
            .client
            .post(url.clone())
            .timeout(self.reload_timeout)
            .json(&ReloadRequest { user_id, platform })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Status {
                target: "bot manager".to_string(),
                status: status.as_u16(),
            });
        }
        tracing::info!("Requested bot reload for user {}", user_id);
        Ok(true)
    }

    /// Reload in the background; failures are logged, never surfaced to the caller.
    pub fn spawn_reload(&self, user_id: UserId, platform: Option<Platform>) {
        let relay = self.clone();
        tokio::spawn(async move {
            if let Err(e) = relay.reload(user_id, platform).await {
                tracing::warn!("Bot reload for user {} failed: {}", user_id, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn relay(server: &MockServer, reload: bool) -> BotRelay {
        let base = Url::parse(&server.uri()).unwrap();
        BotRelay::new(&BotsConfig {
            telegram_api_base: base.clone(),
            vk_api_base: base.clone(),
            reload_url: reload.then(|| base.join("/reload").unwrap()),
            ..BotsConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_telegram_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_json(serde_json::json!({ "chat_id": "42", "text": "Здравствуйте" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true, "result": {} })))
            .expect(1)
            .mount(&server)
            .await;

        relay(&server, false)
            .send_message(Platform::Telegram, "123:abc", "42", "Здравствуйте")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_telegram_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({ "ok": false, "description": "chat not found" })),
            )
            .mount(&server)
            .await;

        let err = relay(&server, false)
            .send_message(Platform::Telegram, "t", "1", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Rejected { platform: Platform::Telegram, ref description } if description == "chat not found"));
    }

    #[tokio::test]
    async fn test_vk_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/method/messages.send"))
            .and(body_string_contains("access_token=vk-token"))
            .and(body_string_contains("peer_id=2000000001"))
            .and(body_string_contains("v=5.199"))
            .and(body_string_contains("random_id="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "response": 17 })))
            .expect(1)
            .mount(&server)
            .await;

        relay(&server, false)
            .send_message(Platform::Vk, "vk-token", "2000000001", "hello")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_vk_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": { "error_code": 901, "error_msg": "Can't send messages for users without permission" }
            })))
            .mount(&server)
            .await;

        let err = relay(&server, false).send_message(Platform::Vk, "t", "1", "hi").await.unwrap_err();
        assert!(matches!(err, BotError::Rejected { platform: Platform::Vk, ref description } if description.contains("901")));
    }

    #[tokio::test]
    async fn test_reload() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/reload"))
            .and(body_json(serde_json::json!({ "user_id": user_id, "platform": "telegram" })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        assert!(relay(&server, true).reload(user_id, Some(Platform::Telegram)).await.unwrap());
        assert!(!relay(&server, false).reload(user_id, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_reload_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = relay(&server, true).reload(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, BotError::Status { status: 503, .. }));
    }
}
