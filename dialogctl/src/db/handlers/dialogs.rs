//! Dialogs, their messages and handoff state transitions.
//!
//! Handoff transitions are conditional updates: each returns `None` when the dialog is not in a
//! state the transition applies to, so concurrent operators cannot both accept the same dialog.

use crate::{
    db::{
        errors::Result,
        models::dialogs::{DialogCreateDBRequest, DialogDBResponse, DialogMessageDBResponse, Sender},
    },
    types::{AssistantId, DialogId, abbrev_uuid},
};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

pub struct Dialogs<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Dialogs<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(assistant_id = %abbrev_uuid(&request.assistant_id)), err)]
    pub async fn create(&mut self, request: &DialogCreateDBRequest) -> Result<DialogDBResponse> {
        let dialog = sqlx::query_as::<_, DialogDBResponse>(
            r#"
            INSERT INTO dialogs (id, assistant_id, user_id, channel, external_chat_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.assistant_id)
        .bind(request.user_id)
        .bind(request.channel)
        .bind(&request.external_chat_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(dialog)
    }

    /// Return the dialog for `(assistant, channel, external_chat_id)`, creating it on first contact.
    #[instrument(skip(self, request), fields(assistant_id = %abbrev_uuid(&request.assistant_id)), err)]
    pub async fn find_or_create_external(&mut self, request: &DialogCreateDBRequest) -> Result<DialogDBResponse> {
        let dialog = sqlx::query_as::<_, DialogDBResponse>(
            r#"
            INSERT INTO dialogs (id, assistant_id, user_id, channel, external_chat_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (assistant_id, channel, external_chat_id) WHERE external_chat_id IS NOT NULL
            DO UPDATE SET updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.assistant_id)
        .bind(request.user_id)
        .bind(request.channel)
        .bind(&request.external_chat_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(dialog)
    }

    #[instrument(skip(self), fields(dialog_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: DialogId) -> Result<Option<DialogDBResponse>> {
        let dialog = sqlx::query_as::<_, DialogDBResponse>("SELECT * FROM dialogs WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(dialog)
    }

    #[instrument(skip(self), fields(assistant_id = %abbrev_uuid(&assistant_id)), err)]
    pub async fn list_for_assistant(&mut self, assistant_id: AssistantId, skip: i64, limit: i64) -> Result<Vec<DialogDBResponse>> {
        let dialogs = sqlx::query_as::<_, DialogDBResponse>(
            r#"
            SELECT * FROM dialogs
            WHERE assistant_id = $1
            ORDER BY updated_at DESC, id
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(assistant_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(dialogs)
    }

    #[instrument(skip(self, text), fields(dialog_id = %abbrev_uuid(&dialog_id), sender = ?sender), err)]
    pub async fn add_message(&mut self, dialog_id: DialogId, sender: Sender, text: &str) -> Result<DialogMessageDBResponse> {
        let message = sqlx::query_as::<_, DialogMessageDBResponse>(
            r#"
            WITH touched AS (
                UPDATE dialogs SET updated_at = NOW() WHERE id = $1
            )
            INSERT INTO dialog_messages (dialog_id, sender, text)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(dialog_id)
        .bind(sender)
        .bind(text)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(message)
    }

    /// Messages in chronological order.
    #[instrument(skip(self), fields(dialog_id = %abbrev_uuid(&dialog_id)), err)]
    pub async fn list_messages(&mut self, dialog_id: DialogId) -> Result<Vec<DialogMessageDBResponse>> {
        let messages = sqlx::query_as::<_, DialogMessageDBResponse>("SELECT * FROM dialog_messages WHERE dialog_id = $1 ORDER BY id")
            .bind(dialog_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(messages)
    }

    /// Texts of the latest user messages, newest first.
    pub async fn recent_user_messages(&mut self, dialog_id: DialogId, limit: i64) -> Result<Vec<String>> {
        let texts = sqlx::query_scalar::<_, String>(
            r#"
            SELECT text FROM dialog_messages
            WHERE dialog_id = $1 AND sender = 'user'
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(dialog_id)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(texts)
    }

    /// `none`/`released` → `requested`.
    #[instrument(skip(self, reason), fields(dialog_id = %abbrev_uuid(&id)), err)]
    pub async fn request_handoff(&mut self, id: DialogId, reason: Option<&str>) -> Result<Option<DialogDBResponse>> {
        let dialog = sqlx::query_as::<_, DialogDBResponse>(
            r#"
            UPDATE dialogs SET
                handoff_status = 'requested',
                handoff_reason = $2,
                handoff_requested_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND handoff_status IN ('none', 'released')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(dialog)
    }

    /// `requested` → `active`.
    #[instrument(skip(self), fields(dialog_id = %abbrev_uuid(&id)), err)]
    pub async fn accept_handoff(&mut self, id: DialogId) -> Result<Option<DialogDBResponse>> {
        let dialog = sqlx::query_as::<_, DialogDBResponse>(
            r#"
            UPDATE dialogs SET handoff_status = 'active', updated_at = NOW()
            WHERE id = $1 AND handoff_status = 'requested'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(dialog)
    }

    /// `requested`/`active` → `released`.
    #[instrument(skip(self), fields(dialog_id = %abbrev_uuid(&id)), err)]
    pub async fn release_handoff(&mut self, id: DialogId) -> Result<Option<DialogDBResponse>> {
        let dialog = sqlx::query_as::<_, DialogDBResponse>(
            r#"
            UPDATE dialogs SET handoff_status = 'released', updated_at = NOW()
            WHERE id = $1 AND handoff_status IN ('requested', 'active')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(dialog)
    }

    /// Dialogs waiting for an operator, oldest request first.
    pub async fn list_pending_handoffs(&mut self, user_id: Option<Uuid>) -> Result<Vec<DialogDBResponse>> {
        let dialogs = sqlx::query_as::<_, DialogDBResponse>(
            r#"
            SELECT * FROM dialogs
            WHERE handoff_status = 'requested' AND ($1::uuid IS NULL OR user_id = $1)
            ORDER BY handoff_requested_at, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(dialogs)
    }
}
