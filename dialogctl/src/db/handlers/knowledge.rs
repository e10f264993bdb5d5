use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::knowledge::{KnowledgeCreateDBRequest, KnowledgeDBResponse, KnowledgeUpdateDBRequest},
    },
    types::{AssistantId, KnowledgeId, abbrev_uuid},
};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct KnowledgeFilter {
    pub assistant_id: AssistantId,
    pub skip: i64,
    pub limit: i64,
}

pub struct Knowledge<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Knowledge<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Knowledge<'c> {
    type CreateRequest = KnowledgeCreateDBRequest;
    type UpdateRequest = KnowledgeUpdateDBRequest;
    type Response = KnowledgeDBResponse;
    type Id = KnowledgeId;
    type Filter = KnowledgeFilter;

    #[instrument(skip(self, request), fields(assistant_id = %abbrev_uuid(&request.assistant_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let entry = sqlx::query_as::<_, KnowledgeDBResponse>(
            r#"
            INSERT INTO user_knowledge (id, user_id, assistant_id, title, content, doc_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(request.assistant_id)
        .bind(&request.title)
        .bind(&request.content)
        .bind(&request.doc_type)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(entry)
    }

    #[instrument(skip(self), fields(knowledge_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let entry = sqlx::query_as::<_, KnowledgeDBResponse>("SELECT * FROM user_knowledge WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(entry)
    }

    #[instrument(skip(self, filter), fields(assistant_id = %abbrev_uuid(&filter.assistant_id)), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let entries = sqlx::query_as::<_, KnowledgeDBResponse>(
            r#"
            SELECT * FROM user_knowledge
            WHERE assistant_id = $1
            ORDER BY created_at DESC, id
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(filter.assistant_id)
        .bind(filter.skip)
        .bind(filter.limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(entries)
    }

    #[instrument(skip(self), fields(knowledge_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_knowledge WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(knowledge_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let entry = sqlx::query_as::<_, KnowledgeDBResponse>(
            r#"
            UPDATE user_knowledge SET
                title = COALESCE($2, title),
                content = COALESCE($3, content)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.title)
        .bind(&request.content)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(entry)
    }
}
