//! API models for payments.

use crate::db::models::payments::{PaymentDBResponse, PaymentStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentCreate {
    /// Top-up amount in the configured currency (sent as string to preserve precision)
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentResponse {
    pub order_id: String,
    pub payment_url: Option<String>,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<PaymentDBResponse> for PaymentResponse {
    fn from(db: PaymentDBResponse) -> Self {
        Self {
            order_id: db.order_id,
            payment_url: db.payment_url,
            amount: db.amount,
            currency: db.currency,
            status: db.status,
            created_at: db.created_at,
            settled_at: db.settled_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}
