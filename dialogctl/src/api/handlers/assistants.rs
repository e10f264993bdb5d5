use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use sqlx::PgConnection;

use crate::{
    AppState,
    api::models::{
        assistants::{AssistantCreate, AssistantResponse, AssistantUpdate},
        pagination::Pagination,
        users::CurrentUser,
    },
    auth::current_user::require_owner,
    db::{
        handlers::{Assistants, Repository, assistants::AssistantFilter},
        models::assistants::{AssistantCreateDBRequest, AssistantDBResponse, AssistantUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{AssistantId, Operation, Resource},
};

/// Load an assistant the caller owns (or any assistant, for admins).
pub(crate) async fn load_assistant(
    conn: &mut PgConnection,
    user: &CurrentUser,
    id: AssistantId,
    action: Operation,
) -> Result<AssistantDBResponse> {
    let assistant = Assistants::new(conn)
        .get_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("Assistant", id))?;
    require_owner(user, assistant.user_id, action, Resource::Assistants)?;
    Ok(assistant)
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::BadRequest {
            message: "Assistant name must not be empty".to_string(),
        });
    }
    Ok(name.to_string())
}

/// List the caller's assistants
#[utoipa::path(
    get,
    path = "/api/assistants",
    tag = "assistants",
    params(Pagination),
    responses(
        (status = 200, description = "Assistants owned by the caller", body = [AssistantResponse]),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_assistants(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<Vec<AssistantResponse>>> {
    let (skip, limit) = pagination.params();
    let mut conn = state.db.acquire().await?;
    let assistants = Assistants::new(&mut conn)
        .list(&AssistantFilter::new(Some(current_user.id), skip, limit))
        .await?;
    Ok(Json(assistants.into_iter().map(Into::into).collect()))
}

/// Create an assistant
#[utoipa::path(
    post,
    path = "/api/assistants",
    tag = "assistants",
    request_body = AssistantCreate,
    responses(
        (status = 201, description = "Assistant created", body = AssistantResponse),
        (status = 400, description = "Invalid input"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_assistant(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<AssistantCreate>,
) -> Result<(StatusCode, Json<AssistantResponse>)> {
    let name = validate_name(&request.name)?;
    let mut conn = state.db.acquire().await?;
    let assistant = Assistants::new(&mut conn)
        .create(&AssistantCreateDBRequest {
            user_id: current_user.id,
            name,
            system_prompt: request.system_prompt,
            is_active: request.is_active,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(assistant.into())))
}

/// Get an assistant
#[utoipa::path(
    get,
    path = "/api/assistants/{id}",
    tag = "assistants",
    params(("id" = uuid::Uuid, Path, description = "Assistant ID")),
    responses(
        (status = 200, description = "Assistant", body = AssistantResponse),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(assistant_id = %id))]
pub async fn get_assistant(
    State(state): State<AppState>,
    Path(id): Path<AssistantId>,
    current_user: CurrentUser,
) -> Result<Json<AssistantResponse>> {
    let mut conn = state.db.acquire().await?;
    let assistant = load_assistant(&mut conn, &current_user, id, Operation::ReadOwn).await?;
    Ok(Json(assistant.into()))
}

/// Update an assistant
#[utoipa::path(
    patch,
    path = "/api/assistants/{id}",
    tag = "assistants",
    params(("id" = uuid::Uuid, Path, description = "Assistant ID")),
    request_body = AssistantUpdate,
    responses(
        (status = 200, description = "Updated assistant", body = AssistantResponse),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(assistant_id = %id))]
pub async fn update_assistant(
    State(state): State<AppState>,
    Path(id): Path<AssistantId>,
    current_user: CurrentUser,
    Json(request): Json<AssistantUpdate>,
) -> Result<Json<AssistantResponse>> {
    let name = request.name.as_deref().map(validate_name).transpose()?;
    let mut conn = state.db.acquire().await?;
    load_assistant(&mut conn, &current_user, id, Operation::UpdateOwn).await?;

    let updated = Assistants::new(&mut conn)
        .update(
            id,
            &AssistantUpdateDBRequest {
                name,
                system_prompt: request.system_prompt,
                is_active: request.is_active,
                website_integration_enabled: request.website_integration_enabled,
            },
        )
        .await?;
    Ok(Json(updated.into()))
}

/// Delete an assistant with its dialogs and knowledge
#[utoipa::path(
    delete,
    path = "/api/assistants/{id}",
    tag = "assistants",
    params(("id" = uuid::Uuid, Path, description = "Assistant ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(assistant_id = %id))]
pub async fn delete_assistant(
    State(state): State<AppState>,
    Path(id): Path<AssistantId>,
    current_user: CurrentUser,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await?;
    load_assistant(&mut conn, &current_user, id, Operation::DeleteOwn).await?;
    Assistants::new(&mut conn).delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{bearer_token, create_test_server, create_test_user};
    use sqlx::PgPool;

    #[sqlx::test(migrations = false)]
    async fn test_assistant_crud(pool: PgPool) {
        let server = create_test_server(pool.clone()).await;
        let owner = create_test_user(&pool, false).await;
        let token = bearer_token(&owner);

        let response = server
            .post("/api/assistants")
            .authorization_bearer(&token)
            .json(&serde_json::json!({ "name": "  Support bot ", "system_prompt": "Be kind" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: AssistantResponse = response.json();
        assert_eq!(created.name, "Support bot");
        assert!(created.is_active);
        assert!(!created.website_integration_enabled);
        assert_eq!(created.widget_version, 1);

        let list: Vec<AssistantResponse> = server.get("/api/assistants").authorization_bearer(&token).await.json();
        assert_eq!(list.len(), 1);

        let response = server
            .patch(&format!("/api/assistants/{}", created.id))
            .authorization_bearer(&token)
            .json(&serde_json::json!({ "is_active": false }))
            .await;
        response.assert_status_ok();
        let updated: AssistantResponse = response.json();
        assert!(!updated.is_active);
        assert_eq!(updated.system_prompt, "Be kind");

        server
            .delete(&format!("/api/assistants/{}", created.id))
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&format!("/api/assistants/{}", created.id))
            .authorization_bearer(&token)
            .await
            .assert_status_not_found();
    }

    #[sqlx::test(migrations = false)]
    async fn test_ownership(pool: PgPool) {
        let server = create_test_server(pool.clone()).await;
        let owner = create_test_user(&pool, false).await;
        let stranger = create_test_user(&pool, false).await;
        let admin = create_test_user(&pool, true).await;

        let created: AssistantResponse = server
            .post("/api/assistants")
            .authorization_bearer(bearer_token(&owner))
            .json(&serde_json::json!({ "name": "Private" }))
            .await
            .json();
        let path = format!("/api/assistants/{}", created.id);

        server
            .get(&path)
            .authorization_bearer(bearer_token(&stranger))
            .await
            .assert_status(StatusCode::FORBIDDEN);
        server
            .delete(&path)
            .authorization_bearer(bearer_token(&stranger))
            .await
            .assert_status(StatusCode::FORBIDDEN);
        server.get(&path).authorization_bearer(bearer_token(&admin)).await.assert_status_ok();

        server
            .post("/api/assistants")
            .authorization_bearer(bearer_token(&owner))
            .json(&serde_json::json!({ "name": "   " }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        server.get("/api/assistants").await.assert_status(StatusCode::UNAUTHORIZED);
    }
}
