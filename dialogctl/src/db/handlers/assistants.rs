use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::assistants::{AssistantCreateDBRequest, AssistantDBResponse, AssistantUpdateDBRequest},
    },
    types::{AssistantId, UserId, abbrev_uuid},
};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

/// Filter for listing assistants. `user_id = None` lists every owner's assistants.
#[derive(Debug, Clone)]
pub struct AssistantFilter {
    pub user_id: Option<UserId>,
    pub skip: i64,
    pub limit: i64,
}

impl AssistantFilter {
    pub fn new(user_id: Option<UserId>, skip: i64, limit: i64) -> Self {
        Self { user_id, skip, limit }
    }
}

pub struct Assistants<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Assistants<'c> {
    type CreateRequest = AssistantCreateDBRequest;
    type UpdateRequest = AssistantUpdateDBRequest;
    type Response = AssistantDBResponse;
    type Id = AssistantId;
    type Filter = AssistantFilter;

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let assistant = sqlx::query_as::<_, AssistantDBResponse>(
            r#"
            INSERT INTO assistants (id, user_id, name, system_prompt, is_active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.name)
        .bind(&request.system_prompt)
        .bind(request.is_active)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(assistant)
    }

    #[instrument(skip(self), fields(assistant_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let assistant = sqlx::query_as::<_, AssistantDBResponse>("SELECT * FROM assistants WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(assistant)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let assistants = sqlx::query_as::<_, AssistantDBResponse>(
            r#"
            SELECT * FROM assistants
            WHERE ($1::uuid IS NULL OR user_id = $1)
            ORDER BY created_at DESC, id
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.skip)
        .bind(filter.limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(assistants)
    }

    #[instrument(skip(self), fields(assistant_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM assistants WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(assistant_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let assistant = sqlx::query_as::<_, AssistantDBResponse>(
            r#"
            UPDATE assistants SET
                name = COALESCE($2, name),
                system_prompt = COALESCE($3, system_prompt),
                is_active = COALESCE($4, is_active),
                website_integration_enabled = COALESCE($5, website_integration_enabled),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(&request.system_prompt)
        .bind(request.is_active)
        .bind(request.website_integration_enabled)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(assistant)
    }
}

impl<'c> Assistants<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Increment `widget_version`, invalidating every widget token issued so far.
    #[instrument(skip(self), fields(assistant_id = %abbrev_uuid(&id)), err)]
    pub async fn bump_widget_version(&mut self, id: AssistantId) -> Result<AssistantDBResponse> {
        let assistant = sqlx::query_as::<_, AssistantDBResponse>(
            r#"
            UPDATE assistants SET widget_version = widget_version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(assistant)
    }
}
