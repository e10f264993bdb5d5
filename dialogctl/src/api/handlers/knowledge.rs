use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::{
    AppState,
    api::{
        handlers::assistants::load_assistant,
        models::{
            knowledge::{KnowledgeCreate, KnowledgeResponse},
            pagination::Pagination,
            users::CurrentUser,
        },
    },
    auth::current_user::require_owner,
    db::{
        handlers::{Knowledge, Repository, knowledge::KnowledgeFilter},
        models::knowledge::KnowledgeCreateDBRequest,
    },
    errors::{Error, Result},
    types::{AssistantId, KnowledgeId, Operation, Resource},
};

/// Knowledge entries of an assistant
#[utoipa::path(
    get,
    path = "/api/assistants/{id}/knowledge",
    tag = "knowledge",
    params(("id" = uuid::Uuid, Path, description = "Assistant ID"), Pagination),
    responses(
        (status = 200, description = "Knowledge entries", body = [KnowledgeResponse]),
        (status = 403, description = "Not the owner"),
    )
)]
#[tracing::instrument(skip_all, fields(assistant_id = %id))]
pub async fn list_knowledge(
    State(state): State<AppState>,
    Path(id): Path<AssistantId>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<Vec<KnowledgeResponse>>> {
    let (skip, limit) = pagination.params();
    let mut conn = state.db.acquire().await?;
    load_assistant(&mut conn, &current_user, id, Operation::ReadOwn).await?;
    let entries = Knowledge::new(&mut conn)
        .list(&KnowledgeFilter {
            assistant_id: id,
            skip,
            limit,
        })
        .await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

/// Add a knowledge entry to an assistant
#[utoipa::path(
    post,
    path = "/api/assistants/{id}/knowledge",
    tag = "knowledge",
    params(("id" = uuid::Uuid, Path, description = "Assistant ID")),
    request_body = KnowledgeCreate,
    responses(
        (status = 201, description = "Entry created", body = KnowledgeResponse),
        (status = 400, description = "Missing title or content"),
    )
)]
#[tracing::instrument(skip_all, fields(assistant_id = %id))]
pub async fn create_knowledge(
    State(state): State<AppState>,
    Path(id): Path<AssistantId>,
    current_user: CurrentUser,
    Json(request): Json<KnowledgeCreate>,
) -> Result<(StatusCode, Json<KnowledgeResponse>)> {
    let title = request.title.trim();
    if title.is_empty() || request.content.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Knowledge entries need a title and content".to_string(),
        });
    }

    let mut conn = state.db.acquire().await?;
    let assistant = load_assistant(&mut conn, &current_user, id, Operation::UpdateOwn).await?;
    let entry = Knowledge::new(&mut conn)
        .create(&KnowledgeCreateDBRequest {
            user_id: assistant.user_id,
            assistant_id: id,
            title: title.to_string(),
            content: request.content,
            doc_type: request.doc_type,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(entry.into())))
}

/// Delete a knowledge entry
#[utoipa::path(
    delete,
    path = "/api/knowledge/{id}",
    tag = "knowledge",
    params(("id" = uuid::Uuid, Path, description = "Knowledge entry ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(knowledge_id = %id))]
pub async fn delete_knowledge(
    State(state): State<AppState>,
    Path(id): Path<KnowledgeId>,
    current_user: CurrentUser,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await?;
    let mut repo = Knowledge::new(&mut conn);
    let entry = repo.get_by_id(id).await?.ok_or_else(|| Error::not_found("Knowledge entry", id))?;
    require_owner(&current_user, entry.user_id, Operation::DeleteOwn, Resource::Knowledge)?;
    repo.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
