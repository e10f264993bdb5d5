//! Payment rows.
//!
//! Status changes are conditional updates so that a payment is claimed for settlement exactly
//! once, and a late `failed` notification cannot overwrite a settled payment.

use crate::{
    db::{
        errors::Result,
        models::payments::{PaymentCreateDBRequest, PaymentDBResponse, PaymentStatus},
    },
    types::{UserId, abbrev_uuid},
};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

pub struct Payments<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Payments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id, user_id = %abbrev_uuid(&request.user_id)), err)]
    pub async fn create(&mut self, request: &PaymentCreateDBRequest) -> Result<PaymentDBResponse> {
        let payment = sqlx::query_as::<_, PaymentDBResponse>(
            r#"
            INSERT INTO payments (id, order_id, user_id, amount, currency, provider)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.order_id)
        .bind(request.user_id)
        .bind(request.amount)
        .bind(&request.currency)
        .bind(&request.provider)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(payment)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_order_id(&mut self, order_id: &str) -> Result<Option<PaymentDBResponse>> {
        let payment = sqlx::query_as::<_, PaymentDBResponse>("SELECT * FROM payments WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(payment)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<PaymentDBResponse>> {
        let payments = sqlx::query_as::<_, PaymentDBResponse>(
            r#"
            SELECT * FROM payments
            WHERE user_id = $1
            ORDER BY created_at DESC, id
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(payments)
    }

    /// Record what the provider returned for a freshly opened payment.
    #[instrument(skip(self, payment_url), err)]
    pub async fn set_provider_details(
        &mut self,
        order_id: &str,
        provider_payment_id: Option<&str>,
        payment_url: &str,
    ) -> Result<Option<PaymentDBResponse>> {
        let payment = sqlx::query_as::<_, PaymentDBResponse>(
            r#"
            UPDATE payments SET provider_payment_id = $2, payment_url = $3, updated_at = NOW()
            WHERE order_id = $1
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(provider_payment_id)
        .bind(payment_url)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(payment)
    }

    /// Move the payment to `succeeded` unless it already is. Returns `None` when another caller
    /// got there first (or the order does not exist). The row stays locked until the surrounding
    /// transaction ends.
    #[instrument(skip(self), err)]
    pub async fn claim_for_settlement(&mut self, order_id: &str) -> Result<Option<PaymentDBResponse>> {
        let payment = sqlx::query_as::<_, PaymentDBResponse>(
            r#"
            UPDATE payments SET status = 'succeeded', settled_at = NOW(), updated_at = NOW()
            WHERE order_id = $1 AND status <> 'succeeded'
            RETURNING *
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(payment)
    }

    /// Mark a still-pending payment as failed or cancelled.
    #[instrument(skip(self), err)]
    pub async fn mark_unsuccessful(&mut self, order_id: &str, status: PaymentStatus) -> Result<Option<PaymentDBResponse>> {
        debug_assert!(matches!(status, PaymentStatus::Failed | PaymentStatus::Cancelled));
        let payment = sqlx::query_as::<_, PaymentDBResponse>(
            r#"
            UPDATE payments SET status = $2, updated_at = NOW()
            WHERE order_id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(status)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(payment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_user, setup_schema};
    use rust_decimal::Decimal;
    use sqlx::PgPool;

    fn request(user_id: UserId, order_id: &str) -> PaymentCreateDBRequest {
        PaymentCreateDBRequest {
            order_id: order_id.to_string(),
            user_id,
            amount: Decimal::new(500, 0),
            currency: "RUB".to_string(),
            provider: "dummy".to_string(),
        }
    }

    #[sqlx::test(migrations = false)]
    async fn test_create_and_claim(pool: PgPool) {
        setup_schema(&pool).await;
        let user = create_test_user(&pool, false).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut payments = Payments::new(&mut conn);

        let payment = payments.create(&request(user.id, "ord_1")).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.settled_at.is_none());

        let updated = payments
            .set_provider_details("ord_1", Some("pay_1"), "https://pay.example.com/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.provider_payment_id.as_deref(), Some("pay_1"));

        let claimed = payments.claim_for_settlement("ord_1").await.unwrap().unwrap();
        assert_eq!(claimed.status, PaymentStatus::Succeeded);
        assert!(claimed.settled_at.is_some());
        assert!(payments.claim_for_settlement("ord_1").await.unwrap().is_none());
        assert!(payments.claim_for_settlement("missing").await.unwrap().is_none());

        // A settled payment cannot be failed afterwards
        assert!(payments.mark_unsuccessful("ord_1", PaymentStatus::Failed).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = false)]
    async fn test_mark_unsuccessful_only_from_pending(pool: PgPool) {
        setup_schema(&pool).await;
        let user = create_test_user(&pool, false).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut payments = Payments::new(&mut conn);

        payments.create(&request(user.id, "ord_2")).await.unwrap();
        let failed = payments.mark_unsuccessful("ord_2", PaymentStatus::Cancelled).await.unwrap().unwrap();
        assert_eq!(failed.status, PaymentStatus::Cancelled);
        assert!(payments.mark_unsuccessful("ord_2", PaymentStatus::Failed).await.unwrap().is_none());

        assert_eq!(payments.list_for_user(user.id, 0, 10).await.unwrap().len(), 1);
    }

    #[sqlx::test(migrations = false)]
    async fn test_duplicate_order_id(pool: PgPool) {
        setup_schema(&pool).await;
        let user = create_test_user(&pool, false).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut payments = Payments::new(&mut conn);

        payments.create(&request(user.id, "ord_3")).await.unwrap();
        let err = payments.create(&request(user.id, "ord_3")).await.unwrap_err();
        assert!(err.is_unique_violation_of("payments_order_id_unique"));
    }
}
