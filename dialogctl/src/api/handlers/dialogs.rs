use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use sqlx::PgConnection;

use crate::{
    AppState,
    api::{
        handlers::assistants::load_assistant,
        models::{
            dialogs::{DialogResponse, DialogWithMessages, MessageCreate, OperatorMessageResponse},
            handoff::HandoffDetectRequest,
            pagination::Pagination,
            users::CurrentUser,
        },
    },
    auth::current_user::require_owner,
    db::{
        handlers::{BotTokens, Dialogs},
        models::{
            bot_tokens::Platform,
            dialogs::{DialogDBResponse, Sender},
        },
    },
    errors::{Error, Result},
    handoff::{HandoffContext, HandoffDecision},
    types::{AssistantId, DialogId, Operation, Resource},
};

async fn load_dialog(conn: &mut PgConnection, user: &CurrentUser, id: DialogId, action: Operation) -> Result<DialogDBResponse> {
    let dialog = Dialogs::new(conn)
        .get_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("Dialog", id))?;
    require_owner(user, dialog.user_id, action, Resource::Dialogs)?;
    Ok(dialog)
}

/// Dialogs of an assistant, most recently active first
#[utoipa::path(
    get,
    path = "/api/assistants/{id}/dialogs",
    tag = "dialogs",
    params(("id" = uuid::Uuid, Path, description = "Assistant ID"), Pagination),
    responses(
        (status = 200, description = "Dialogs", body = [DialogResponse]),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Assistant not found"),
    )
)]
#[tracing::instrument(skip_all, fields(assistant_id = %id))]
pub async fn list_dialogs(
    State(state): State<AppState>,
    Path(id): Path<AssistantId>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<Vec<DialogResponse>>> {
    let (skip, limit) = pagination.params();
    let mut conn = state.db.acquire().await?;
    load_assistant(&mut conn, &current_user, id, Operation::ReadOwn).await?;
    let dialogs = Dialogs::new(&mut conn).list_for_assistant(id, skip, limit).await?;
    Ok(Json(dialogs.into_iter().map(Into::into).collect()))
}

/// A dialog with its full message history
#[utoipa::path(
    get,
    path = "/api/dialogs/{id}",
    tag = "dialogs",
    params(("id" = uuid::Uuid, Path, description = "Dialog ID")),
    responses(
        (status = 200, description = "Dialog and messages", body = DialogWithMessages),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(dialog_id = %id))]
pub async fn get_dialog(
    State(state): State<AppState>,
    Path(id): Path<DialogId>,
    current_user: CurrentUser,
) -> Result<Json<DialogWithMessages>> {
    let mut conn = state.db.acquire().await?;
    let dialog = load_dialog(&mut conn, &current_user, id, Operation::ReadOwn).await?;
    let messages = Dialogs::new(&mut conn).list_messages(id).await?;
    Ok(Json(DialogWithMessages {
        dialog: dialog.into(),
        messages: messages.into_iter().map(Into::into).collect(),
    }))
}

/// Reply to a dialog as an operator
///
/// Telegram and VK replies are relayed through the owner's bot. A failed relay still stores the
/// message and reports `delivered: false`.
#[utoipa::path(
    post,
    path = "/api/dialogs/{id}/messages",
    tag = "dialogs",
    params(("id" = uuid::Uuid, Path, description = "Dialog ID")),
    request_body = MessageCreate,
    responses(
        (status = 201, description = "Reply stored", body = OperatorMessageResponse),
        (status = 400, description = "Empty message"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(dialog_id = %id))]
pub async fn post_operator_message(
    State(state): State<AppState>,
    Path(id): Path<DialogId>,
    current_user: CurrentUser,
    Json(request): Json<MessageCreate>,
) -> Result<(StatusCode, Json<OperatorMessageResponse>)> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(Error::BadRequest {
            message: "Message text must not be empty".to_string(),
        });
    }

    let mut conn = state.db.acquire().await?;
    let dialog = load_dialog(&mut conn, &current_user, id, Operation::UpdateOwn).await?;
    let message = Dialogs::new(&mut conn).add_message(id, Sender::Operator, text).await?;

    let mut delivered = false;
    if let (Ok(platform), Some(chat_id)) = (Platform::try_from(dialog.channel), dialog.external_chat_id.as_deref()) {
        match BotTokens::new(&mut conn).get_for_assistant(dialog.assistant_id, platform).await? {
            Some(bot) => match state.bot_relay.send_message(platform, &bot.token, chat_id, text).await {
                Ok(()) => delivered = true,
                Err(e) => tracing::warn!("Failed to relay operator reply for dialog {}: {}", id, e),
            },
            None => tracing::warn!("No {} bot configured for assistant {}, reply not relayed", platform, dialog.assistant_id),
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(OperatorMessageResponse {
            message: message.into(),
            delivered,
        }),
    ))
}

/// Take over a dialog that requested an operator
#[utoipa::path(
    post,
    path = "/api/dialogs/{id}/handoff/accept",
    tag = "dialogs",
    params(("id" = uuid::Uuid, Path, description = "Dialog ID")),
    responses(
        (status = 200, description = "Handoff accepted", body = DialogResponse),
        (status = 409, description = "Dialog is not waiting for an operator"),
    )
)]
#[tracing::instrument(skip_all, fields(dialog_id = %id))]
pub async fn accept_handoff(
    State(state): State<AppState>,
    Path(id): Path<DialogId>,
    current_user: CurrentUser,
) -> Result<Json<DialogResponse>> {
    let mut conn = state.db.acquire().await?;
    let dialog = load_dialog(&mut conn, &current_user, id, Operation::UpdateOwn).await?;
    let accepted = Dialogs::new(&mut conn)
        .accept_handoff(id)
        .await?
        .ok_or_else(|| Error::Conflict {
            message: format!("Dialog handoff is '{}', not awaiting an operator", status_name(&dialog)),
        })?;
    tracing::info!("Operator {} accepted dialog {}", current_user.id, id);
    Ok(Json(accepted.into()))
}

/// Hand a dialog back to the assistant
#[utoipa::path(
    post,
    path = "/api/dialogs/{id}/handoff/release",
    tag = "dialogs",
    params(("id" = uuid::Uuid, Path, description = "Dialog ID")),
    responses(
        (status = 200, description = "Handoff released", body = DialogResponse),
        (status = 409, description = "No handoff in progress"),
    )
)]
#[tracing::instrument(skip_all, fields(dialog_id = %id))]
pub async fn release_handoff(
    State(state): State<AppState>,
    Path(id): Path<DialogId>,
    current_user: CurrentUser,
) -> Result<Json<DialogResponse>> {
    let mut conn = state.db.acquire().await?;
    let dialog = load_dialog(&mut conn, &current_user, id, Operation::UpdateOwn).await?;
    let released = Dialogs::new(&mut conn)
        .release_handoff(id)
        .await?
        .ok_or_else(|| Error::Conflict {
            message: format!("Dialog handoff is '{}', nothing to release", status_name(&dialog)),
        })?;
    Ok(Json(released.into()))
}

fn status_name(dialog: &DialogDBResponse) -> String {
    serde_json::to_value(dialog.handoff_status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Dialogs waiting for an operator
///
/// Admins see every owner's queue.
#[utoipa::path(
    get,
    path = "/api/handoffs",
    tag = "dialogs",
    responses(
        (status = 200, description = "Pending handoffs, oldest request first", body = [DialogResponse]),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_pending_handoffs(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<DialogResponse>>> {
    let owner = (!current_user.is_admin).then_some(current_user.id);
    let mut conn = state.db.acquire().await?;
    let dialogs = Dialogs::new(&mut conn).list_pending_handoffs(owner).await?;
    Ok(Json(dialogs.into_iter().map(Into::into).collect()))
}

/// Score a message with the handoff detector
#[utoipa::path(
    post,
    path = "/api/handoff/detect",
    tag = "dialogs",
    request_body = HandoffDetectRequest,
    responses(
        (status = 200, description = "Detector decision", body = HandoffDecision),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn detect_handoff(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(request): Json<HandoffDetectRequest>,
) -> Json<HandoffDecision> {
    let context = HandoffContext::from_history(&request.text, &request.history);
    Json(state.handoff.detect_with_context(&request.text, &context))
}
