//! Bot credentials and the relay endpoint bot workers post inbound messages to.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use sha2::{Digest, Sha256};

use crate::{
    AppState,
    api::{
        handlers::assistants::load_assistant,
        models::{
            bots::{BotInboundMessage, BotInboundResponse, BotReloadRequest, BotReloadResponse, BotTokenResponse, BotTokenUpsert},
            users::CurrentUser,
        },
    },
    db::{
        handlers::{Assistants, BotTokens, Dialogs, Repository},
        models::{
            bot_tokens::{BotTokenUpsertDBRequest, Platform},
            dialogs::DialogCreateDBRequest,
        },
    },
    errors::{Error, Result},
    services::conversations,
    types::Operation,
};

pub const BOT_SECRET_HEADER: &str = "x-bot-secret";

/// Compare digests so the comparison time does not depend on the secret.
fn secret_matches(expected: &str, provided: &str) -> bool {
    Sha256::digest(expected.as_bytes()) == Sha256::digest(provided.as_bytes())
}

/// Connected bots
#[utoipa::path(
    get,
    path = "/api/bots",
    tag = "bots",
    responses(
        (status = 200, description = "Connected bots; tokens are masked", body = [BotTokenResponse]),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_bots(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<BotTokenResponse>>> {
    let mut conn = state.db.acquire().await?;
    let bots = BotTokens::new(&mut conn).list_for_user(current_user.id).await?;
    Ok(Json(bots.into_iter().map(Into::into).collect()))
}

/// Connect or replace the bot for a platform
#[utoipa::path(
    put,
    path = "/api/bots/{platform}",
    tag = "bots",
    params(("platform" = Platform, Path, description = "telegram or vk")),
    request_body = BotTokenUpsert,
    responses(
        (status = 200, description = "Bot saved", body = BotTokenResponse),
        (status = 400, description = "Empty token"),
    )
)]
#[tracing::instrument(skip_all, fields(%platform))]
pub async fn upsert_bot(
    State(state): State<AppState>,
    Path(platform): Path<Platform>,
    current_user: CurrentUser,
    Json(request): Json<BotTokenUpsert>,
) -> Result<Json<BotTokenResponse>> {
    let token = request.token.trim();
    if token.is_empty() {
        return Err(Error::BadRequest {
            message: "Bot token must not be empty".to_string(),
        });
    }

    let mut conn = state.db.acquire().await?;
    if let Some(assistant_id) = request.assistant_id {
        load_assistant(&mut conn, &current_user, assistant_id, Operation::UpdateOwn).await?;
    }
    let saved = BotTokens::new(&mut conn)
        .upsert(&BotTokenUpsertDBRequest {
            user_id: current_user.id,
            platform,
            token: token.to_string(),
            assistant_id: request.assistant_id,
            group_id: request.group_id.filter(|g| !g.trim().is_empty()),
        })
        .await?;

    state.bot_relay.spawn_reload(current_user.id, Some(platform));
    Ok(Json(saved.into()))
}

/// Disconnect the bot for a platform
#[utoipa::path(
    delete,
    path = "/api/bots/{platform}",
    tag = "bots",
    params(("platform" = Platform, Path, description = "telegram or vk")),
    responses(
        (status = 204, description = "Bot removed"),
        (status = 404, description = "No bot for this platform"),
    )
)]
#[tracing::instrument(skip_all, fields(%platform))]
pub async fn delete_bot(State(state): State<AppState>, Path(platform): Path<Platform>, current_user: CurrentUser) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await?;
    if !BotTokens::new(&mut conn).delete(current_user.id, platform).await? {
        return Err(Error::not_found("Bot", platform));
    }
    state.bot_relay.spawn_reload(current_user.id, Some(platform));
    Ok(StatusCode::NO_CONTENT)
}

/// Ask the bot manager to restart the caller's bots
#[utoipa::path(
    post,
    path = "/api/bots/reload",
    tag = "bots",
    request_body = BotReloadRequest,
    responses(
        (status = 200, description = "Reload requested", body = BotReloadResponse),
        (status = 500, description = "Bot manager unreachable"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn reload_bots(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<BotReloadRequest>,
) -> Result<Json<BotReloadResponse>> {
    let reloaded = state.bot_relay.reload(current_user.id, request.platform).await.map_err(|e| {
        tracing::warn!("Manual bot reload failed: {}", e);
        Error::Internal {
            operation: format!("reload bots: {e}"),
        }
    })?;
    Ok(Json(BotReloadResponse { reloaded }))
}

/// Inbound user message from a bot worker
#[utoipa::path(
    post,
    path = "/api/bots/{platform}/messages",
    tag = "bots",
    params(
        ("platform" = Platform, Path, description = "telegram or vk"),
        ("X-Bot-Secret" = String, Header, description = "Shared bot worker secret"),
    ),
    request_body = BotInboundMessage,
    responses(
        (status = 200, description = "Message stored", body = BotInboundResponse),
        (status = 401, description = "Missing or wrong secret"),
        (status = 404, description = "Assistant not found"),
    )
)]
#[tracing::instrument(skip_all, fields(%platform))]
pub async fn inbound_message(
    State(state): State<AppState>,
    Path(platform): Path<Platform>,
    headers: HeaderMap,
    Json(request): Json<BotInboundMessage>,
) -> Result<Json<BotInboundResponse>> {
    let provided = headers.get(BOT_SECRET_HEADER).and_then(|v| v.to_str().ok());
    match (state.config.bots.shared_secret.as_deref(), provided) {
        (Some(expected), Some(provided)) if secret_matches(expected, provided) => {}
        _ => {
            return Err(Error::Unauthenticated {
                message: Some("Invalid bot secret".to_string()),
            });
        }
    }

    let chat_id = request.chat_id.trim();
    if chat_id.is_empty() {
        return Err(Error::BadRequest {
            message: "chat_id is required".to_string(),
        });
    }

    let dialog = {
        let mut conn = state.db.acquire().await?;
        let assistant = Assistants::new(&mut conn)
            .get_by_id(request.assistant_id)
            .await?
            .ok_or_else(|| Error::not_found("Assistant", request.assistant_id))?;
        if !assistant.is_active {
            return Err(Error::BadRequest {
                message: "Assistant is inactive".to_string(),
            });
        }
        Dialogs::new(&mut conn)
            .find_or_create_external(&DialogCreateDBRequest {
                assistant_id: assistant.id,
                user_id: assistant.user_id,
                channel: platform.into(),
                external_chat_id: Some(chat_id.to_string()),
            })
            .await?
    };

    let outcome = conversations::record_user_message(
        &state.db,
        &state.handoff,
        state.config.handoff.enabled,
        dialog.id,
        &request.text,
    )
    .await?;

    Ok(Json(BotInboundResponse {
        dialog_id: dialog.id,
        handoff: outcome.decision,
        handoff_status: outcome.dialog.handoff_status,
    }))
}
