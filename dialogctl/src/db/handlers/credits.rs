//! Credit ledger.
//!
//! The balance is the `balance_after` of the user's newest transaction. Writers lock the user row
//! first, so concurrent transactions for one user serialize and each computes its
//! `balance_after` from the committed predecessor.

use crate::{
    db::{
        errors::{DbError, Result},
        models::credits::{CreditTransactionCreateDBRequest, CreditTransactionDBResponse},
    },
    types::{UserId, abbrev_uuid},
};
use rust_decimal::Decimal;
use sqlx::{Connection, PgConnection};
use tracing::instrument;
use uuid::Uuid;

pub struct Credits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Credits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Append a transaction and return it with its computed `balance_after`.
    ///
    /// Fails with a unique violation on `credit_transactions_source_id_unique` when the source was
    /// already credited, and with a check violation when a debit would make the balance negative.
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), amount = %request.amount, source_id = %request.source_id), err)]
    pub async fn create_transaction(&mut self, request: &CreditTransactionCreateDBRequest) -> Result<CreditTransactionDBResponse> {
        let mut tx = self.db.begin().await?;

        sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(request.user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;

        let current = Self::current_balance(&mut tx, request.user_id).await?;
        let balance_after = if request.transaction_type.is_debit() {
            current - request.amount
        } else {
            current + request.amount
        };

        let transaction = sqlx::query_as::<_, CreditTransactionDBResponse>(
            r#"
            INSERT INTO credit_transactions (id, user_id, transaction_type, amount, balance_after, source_id, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, clock_timestamp())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(request.transaction_type)
        .bind(request.amount)
        .bind(balance_after)
        .bind(&request.source_id)
        .bind(&request.description)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(transaction)
    }

    /// Current balance, zero for a user without transactions.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get_user_balance(&mut self, user_id: UserId) -> Result<Decimal> {
        Self::current_balance(&mut *self.db, user_id).await
    }

    async fn current_balance(conn: &mut PgConnection, user_id: UserId) -> Result<Decimal> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT balance_after FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
        Ok(balance.unwrap_or(Decimal::ZERO))
    }

    /// Newest first.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_user_transactions(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<CreditTransactionDBResponse>> {
        let transactions = sqlx::query_as::<_, CreditTransactionDBResponse>(
            r#"
            SELECT * FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(transactions)
    }

    #[instrument(skip(self), err)]
    pub async fn get_transaction_by_source(&mut self, source_id: &str) -> Result<Option<CreditTransactionDBResponse>> {
        let transaction = sqlx::query_as::<_, CreditTransactionDBResponse>("SELECT * FROM credit_transactions WHERE source_id = $1")
            .bind(source_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(transaction)
    }
}
