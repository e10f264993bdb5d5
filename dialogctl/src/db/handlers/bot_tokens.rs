use crate::{
    db::{
        errors::Result,
        models::bot_tokens::{BotTokenDBResponse, BotTokenUpsertDBRequest, Platform},
    },
    types::{AssistantId, UserId, abbrev_uuid},
};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

/// One bot per platform per account owner.
pub struct BotTokens<'c> {
    db: &'c mut PgConnection,
}

impl<'c> BotTokens<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId) -> Result<Vec<BotTokenDBResponse>> {
        let tokens = sqlx::query_as::<_, BotTokenDBResponse>("SELECT * FROM bot_tokens WHERE user_id = $1 ORDER BY platform")
            .bind(user_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(tokens)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get(&mut self, user_id: UserId, platform: Platform) -> Result<Option<BotTokenDBResponse>> {
        let token = sqlx::query_as::<_, BotTokenDBResponse>("SELECT * FROM bot_tokens WHERE user_id = $1 AND platform = $2")
            .bind(user_id)
            .bind(platform)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(token)
    }

    /// The bot serving an assistant on a platform, used when relaying operator replies.
    #[instrument(skip(self), fields(assistant_id = %abbrev_uuid(&assistant_id)), err)]
    pub async fn get_for_assistant(&mut self, assistant_id: AssistantId, platform: Platform) -> Result<Option<BotTokenDBResponse>> {
        let token = sqlx::query_as::<_, BotTokenDBResponse>(
            r#"
            SELECT bt.* FROM bot_tokens bt
            JOIN assistants a ON a.user_id = bt.user_id
            WHERE a.id = $1 AND bt.platform = $2
              AND (bt.assistant_id IS NULL OR bt.assistant_id = a.id)
            "#,
        )
        .bind(assistant_id)
        .bind(platform)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(token)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), platform = %request.platform), err)]
    pub async fn upsert(&mut self, request: &BotTokenUpsertDBRequest) -> Result<BotTokenDBResponse> {
        let token = sqlx::query_as::<_, BotTokenDBResponse>(
            r#"
            INSERT INTO bot_tokens (id, user_id, platform, token, assistant_id, group_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ON CONSTRAINT bot_tokens_user_platform_unique
            DO UPDATE SET
                token = EXCLUDED.token,
                assistant_id = EXCLUDED.assistant_id,
                group_id = EXCLUDED.group_id,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(request.platform)
        .bind(&request.token)
        .bind(request.assistant_id)
        .bind(&request.group_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(token)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn delete(&mut self, user_id: UserId, platform: Platform) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bot_tokens WHERE user_id = $1 AND platform = $2")
            .bind(user_id)
            .bind(platform)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_assistant, create_test_user, setup_schema};
    use sqlx::PgPool;

    #[sqlx::test(migrations = false)]
    async fn test_upsert_replaces_token(pool: PgPool) {
        setup_schema(&pool).await;
        let user = create_test_user(&pool, false).await;
        let assistant = create_test_assistant(&pool, user.id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut bots = BotTokens::new(&mut conn);

        let first = bots
            .upsert(&BotTokenUpsertDBRequest {
                user_id: user.id,
                platform: Platform::Telegram,
                token: "123:abc".to_string(),
                assistant_id: None,
                group_id: None,
            })
            .await
            .unwrap();
        let second = bots
            .upsert(&BotTokenUpsertDBRequest {
                user_id: user.id,
                platform: Platform::Telegram,
                token: "123:def".to_string(),
                assistant_id: Some(assistant.id),
                group_id: None,
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.token, "123:def");
        assert_eq!(bots.list_for_user(user.id).await.unwrap().len(), 1);

        let found = bots.get_for_assistant(assistant.id, Platform::Telegram).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(bots.get_for_assistant(assistant.id, Platform::Vk).await.unwrap().is_none());

        assert!(bots.delete(user.id, Platform::Telegram).await.unwrap());
        assert!(bots.get(user.id, Platform::Telegram).await.unwrap().is_none());
        assert!(!bots.delete(user.id, Platform::Telegram).await.unwrap());
    }

    #[sqlx::test(migrations = false)]
    async fn test_token_bound_to_other_assistant_not_used(pool: PgPool) {
        setup_schema(&pool).await;
        let user = create_test_user(&pool, false).await;
        let bound = create_test_assistant(&pool, user.id).await;
        let other = create_test_assistant(&pool, user.id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut bots = BotTokens::new(&mut conn);

        bots.upsert(&BotTokenUpsertDBRequest {
            user_id: user.id,
            platform: Platform::Vk,
            token: "vk-token".to_string(),
            assistant_id: Some(bound.id),
            group_id: Some("777".to_string()),
        })
        .await
        .unwrap();

        assert!(bots.get_for_assistant(bound.id, Platform::Vk).await.unwrap().is_some());
        assert!(bots.get_for_assistant(other.id, Platform::Vk).await.unwrap().is_none());
    }
}
