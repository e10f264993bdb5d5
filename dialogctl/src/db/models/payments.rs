//! Database models for payments.

use crate::types::{PaymentId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PaymentCreateDBRequest {
    pub order_id: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub provider: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentDBResponse {
    pub id: PaymentId,
    pub order_id: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub payment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}
