//! Database models for credit transactions.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Credit transaction type enum stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionType {
    Purchase,
    WelcomeBonus,
    AdminGrant,
    AdminRemoval,
    Usage,
}

impl CreditTransactionType {
    /// Whether this transaction type reduces the balance. Amounts are always stored positive.
    pub fn is_debit(self) -> bool {
        matches!(self, CreditTransactionType::AdminRemoval | CreditTransactionType::Usage)
    }
}

/// Database request for creating a new credit transaction
#[derive(Debug, Clone)]
pub struct CreditTransactionCreateDBRequest {
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    pub amount: Decimal,
    /// Unique per crediting event, e.g. `payment:{order_id}`
    pub source_id: String,
    pub description: Option<String>,
}

impl CreditTransactionCreateDBRequest {
    /// Admin grant or removal with a freshly generated source id
    pub fn admin_adjustment(user_id: UserId, admin_id: UserId, amount: Decimal, description: Option<String>) -> Self {
        let transaction_type = if amount.is_sign_negative() {
            CreditTransactionType::AdminRemoval
        } else {
            CreditTransactionType::AdminGrant
        };
        Self {
            user_id,
            transaction_type,
            amount: amount.abs(),
            source_id: format!("admin:{}:{}", admin_id, Uuid::new_v4()),
            description,
        }
    }
}

/// Database response for a credit transaction
#[derive(Debug, Clone, FromRow)]
pub struct CreditTransactionDBResponse {
    pub id: Uuid,
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub source_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
