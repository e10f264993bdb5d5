//! Balance operations on top of the credit ledger.

use rust_decimal::Decimal;
use sqlx::{Connection, PgConnection};
use tracing::instrument;

use crate::{
    db::{
        handlers::{Credits, Users},
        models::credits::{CreditTransactionCreateDBRequest, CreditTransactionDBResponse, CreditTransactionType},
    },
    errors::{Error, Result},
    types::{MONEY_SCALE, UserId, abbrev_uuid, fits_money_scale},
};

/// Credit a purchase. `source_id` makes the top-up idempotent.
#[instrument(skip(conn, description), fields(user_id = %abbrev_uuid(&user_id), %amount), err)]
pub async fn top_up(
    conn: &mut PgConnection,
    user_id: UserId,
    amount: Decimal,
    source_id: &str,
    description: Option<String>,
) -> Result<CreditTransactionDBResponse> {
    if amount <= Decimal::ZERO {
        return Err(Error::BadRequest {
            message: "Top-up amount must be positive".to_string(),
        });
    }
    check_scale(amount)?;

    let transaction = Credits::new(conn)
        .create_transaction(&CreditTransactionCreateDBRequest {
            user_id,
            transaction_type: CreditTransactionType::Purchase,
            amount,
            source_id: source_id.to_string(),
            description,
        })
        .await?;
    Ok(transaction)
}

/// Grant the welcome bonus unless the user already received it.
///
/// Returns the ledger entry, or `None` when the bonus was already granted (or is zero). The flag
/// and the ledger entry are written in one transaction.
#[instrument(skip(conn), fields(user_id = %abbrev_uuid(&user_id), %amount), err)]
pub async fn grant_welcome_bonus(
    conn: &mut PgConnection,
    user_id: UserId,
    amount: Decimal,
) -> Result<Option<CreditTransactionDBResponse>> {
    let mut tx = conn.begin().await?;

    if !Users::new(&mut tx).claim_welcome_bonus(user_id).await? {
        tracing::debug!("Welcome bonus already granted");
        return Ok(None);
    }

    let transaction = if amount > Decimal::ZERO {
        Some(
            Credits::new(&mut tx)
                .create_transaction(&CreditTransactionCreateDBRequest {
                    user_id,
                    transaction_type: CreditTransactionType::WelcomeBonus,
                    amount,
                    source_id: format!("welcome_bonus:{user_id}"),
                    description: Some("Welcome bonus".to_string()),
                })
                .await?,
        )
    } else {
        None
    };

    tx.commit().await?;
    if transaction.is_some() {
        tracing::info!("Granted welcome bonus of {} to user {}", amount, abbrev_uuid(&user_id));
    }
    Ok(transaction)
}

/// Admin grant (positive amount) or removal (negative amount). A removal may not take the
/// balance below zero.
#[instrument(skip(conn, description), fields(user_id = %abbrev_uuid(&user_id), admin_id = %abbrev_uuid(&admin_id), %amount), err)]
pub async fn admin_adjust(
    conn: &mut PgConnection,
    user_id: UserId,
    admin_id: UserId,
    amount: Decimal,
    description: Option<String>,
) -> Result<CreditTransactionDBResponse> {
    if amount.is_zero() {
        return Err(Error::BadRequest {
            message: "Adjustment amount must not be zero".to_string(),
        });
    }
    check_scale(amount)?;

    let request = CreditTransactionCreateDBRequest::admin_adjustment(user_id, admin_id, amount, description);
    let transaction = Credits::new(conn).create_transaction(&request).await?;
    Ok(transaction)
}

/// Amounts finer than a cent would be rounded by the ledger column.
fn check_scale(amount: Decimal) -> Result<()> {
    if fits_money_scale(amount) {
        Ok(())
    } else {
        Err(Error::BadRequest {
            message: format!("Amount may have at most {MONEY_SCALE} decimal places"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::DbError;
    use crate::test_utils::{create_test_user, setup_schema};
    use sqlx::PgPool;

    #[sqlx::test(migrations = false)]
    async fn test_top_up_is_idempotent_per_source(pool: PgPool) {
        setup_schema(&pool).await;
        let user = create_test_user(&pool, false).await;
        let mut conn = pool.acquire().await.unwrap();

        let tx = top_up(&mut conn, user.id, Decimal::new(250, 0), "manual:1", None).await.unwrap();
        assert_eq!(tx.balance_after, Decimal::new(250, 0));

        let err = top_up(&mut conn, user.id, Decimal::new(250, 0), "manual:1", None).await.unwrap_err();
        assert!(matches!(err, Error::Database(ref e) if e.is_unique_violation_of("credit_transactions_source_id_unique")));

        assert!(matches!(
            top_up(&mut conn, user.id, Decimal::ZERO, "manual:2", None).await,
            Err(Error::BadRequest { .. })
        ));
    }

    #[sqlx::test(migrations = false)]
    async fn test_welcome_bonus_granted_once(pool: PgPool) {
        setup_schema(&pool).await;
        let user = create_test_user(&pool, false).await;
        let mut conn = pool.acquire().await.unwrap();

        let first = grant_welcome_bonus(&mut conn, user.id, Decimal::new(100, 0)).await.unwrap();
        assert_eq!(first.unwrap().transaction_type, CreditTransactionType::WelcomeBonus);
        assert!(grant_welcome_bonus(&mut conn, user.id, Decimal::new(100, 0)).await.unwrap().is_none());

        let balance = Credits::new(&mut conn).get_user_balance(user.id).await.unwrap();
        assert_eq!(balance, Decimal::new(100, 0));
    }

    #[sqlx::test(migrations = false)]
    async fn test_welcome_bonus_concurrent(pool: PgPool) {
        setup_schema(&pool).await;
        let user = create_test_user(&pool, false).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let mut conn = pool.acquire().await.unwrap();
                grant_welcome_bonus(&mut conn, user.id, Decimal::new(100, 0)).await.unwrap().is_some()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(Credits::new(&mut conn).get_user_balance(user.id).await.unwrap(), Decimal::new(100, 0));
    }

    #[sqlx::test(migrations = false)]
    async fn test_admin_adjust(pool: PgPool) {
        setup_schema(&pool).await;
        let admin = create_test_user(&pool, true).await;
        let user = create_test_user(&pool, false).await;
        let mut conn = pool.acquire().await.unwrap();

        let grant = admin_adjust(&mut conn, user.id, admin.id, Decimal::new(40, 0), None).await.unwrap();
        assert_eq!(grant.transaction_type, CreditTransactionType::AdminGrant);

        let removal = admin_adjust(&mut conn, user.id, admin.id, Decimal::new(-15, 0), None).await.unwrap();
        assert_eq!(removal.transaction_type, CreditTransactionType::AdminRemoval);
        assert_eq!(removal.amount, Decimal::new(15, 0));
        assert_eq!(removal.balance_after, Decimal::new(25, 0));

        let err = admin_adjust(&mut conn, user.id, admin.id, Decimal::new(-100, 0), None).await.unwrap_err();
        assert!(matches!(err, Error::Database(DbError::CheckViolation { .. })));
        assert_eq!(err.user_message(), "Insufficient balance");

        assert!(matches!(
            admin_adjust(&mut conn, user.id, admin.id, Decimal::ZERO, None).await,
            Err(Error::BadRequest { .. })
        ));
    }

    #[sqlx::test(migrations = false)]
    async fn test_sub_cent_amounts_rejected(pool: PgPool) {
        setup_schema(&pool).await;
        let admin = create_test_user(&pool, true).await;
        let user = create_test_user(&pool, false).await;
        let mut conn = pool.acquire().await.unwrap();

        let err = admin_adjust(&mut conn, user.id, admin.id, Decimal::new(1, 3), None).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
        assert_eq!(err.user_message(), "Amount may have at most 2 decimal places");
        assert!(matches!(
            top_up(&mut conn, user.id, Decimal::new(100005, 3), "manual:sub-cent", None).await,
            Err(Error::BadRequest { .. })
        ));
        assert_eq!(Credits::new(&mut conn).get_user_balance(user.id).await.unwrap(), Decimal::ZERO);

        // Trailing zeros are fine
        let grant = admin_adjust(&mut conn, user.id, admin.id, Decimal::new(12500, 3), None).await.unwrap();
        assert_eq!(grant.balance_after, Decimal::new(1250, 2));
    }
}
