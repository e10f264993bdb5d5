//! API models for balances and the credit ledger.

use crate::{
    db::models::credits::{CreditTransactionDBResponse, CreditTransactionType},
    types::UserId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = String)]
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditTransactionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub transaction_type: CreditTransactionType,
    /// Always positive; the type says which direction
    #[schema(value_type = String)]
    pub amount: Decimal,
    #[schema(value_type = String)]
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CreditTransactionDBResponse> for CreditTransactionResponse {
    fn from(db: CreditTransactionDBResponse) -> Self {
        Self {
            id: db.id,
            transaction_type: db.transaction_type,
            amount: db.amount,
            balance_after: db.balance_after,
            description: db.description,
            created_at: db.created_at,
        }
    }
}

/// Admin balance adjustment. Positive amounts grant, negative amounts remove.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceAdjustment {
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub description: Option<String>,
}
