//! Payment provider abstraction layer
//!
//! The `PaymentProvider` trait hides the external cashier behind four operations: create a
//! payment, ask for its status, validate an inbound webhook and ping the provider. Crediting the
//! balance is not the provider's job; see [`crate::services::settlement`].

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use axum::http::{HeaderMap, StatusCode};
use rand::prelude::RngExt;
use rand::rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::PaymentProviderConfig;
use crate::db::errors::DbError;
use crate::db::models::payments::PaymentStatus;

pub mod cashier;
pub mod dummy;
pub mod signing;

/// Create a payment provider from configuration.
pub fn create_provider(config: &PaymentProviderConfig) -> Result<Arc<dyn PaymentProvider>> {
    match config {
        PaymentProviderConfig::Cashier(cashier_config) => Ok(Arc::new(cashier::CashierProvider::new(cashier_config)?)),
        PaymentProviderConfig::Dummy(dummy_config) => Ok(Arc::new(dummy::DummyProvider::from(dummy_config.clone()))),
    }
}

/// Build an outbound HTTP client. Installs the rustls crypto provider if nothing did yet.
pub(crate) fn http_client(timeout: Duration) -> std::result::Result<reqwest::Client, reqwest::Error> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    reqwest::Client::builder().timeout(timeout).build()
}

/// Fresh merchant order id: `ord_` followed by 16 random bytes, URL-safe base64.
pub fn generate_order_id() -> String {
    let mut bytes = [0u8; 16];
    rng().fill(&mut bytes);
    format!("ord_{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur during payment processing
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Payment provider returned HTTP {status}: {body}")]
    ProviderStatus { status: u16, body: String },

    #[error("Payment provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Payment {0} not found")]
    NotFound(String),

    #[error("Amount {amount} is outside the allowed range {min}..={max}")]
    AmountOutOfRange { amount: Decimal, min: Decimal, max: Decimal },

    #[error("Payment processing is not configured")]
    NotConfigured,

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl From<sqlx::Error> for PaymentError {
    fn from(err: sqlx::Error) -> Self {
        PaymentError::Database(err.into())
    }
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::InvalidData(_) | PaymentError::AmountOutOfRange { .. } => StatusCode::BAD_REQUEST,
            PaymentError::InvalidSignature => StatusCode::UNAUTHORIZED,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            PaymentError::ProviderApi(_) | PaymentError::ProviderStatus { .. } | PaymentError::Transport(_) => StatusCode::BAD_GATEWAY,
            PaymentError::Database(DbError::NotFound) => StatusCode::NOT_FOUND,
            PaymentError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::InvalidData(msg) => msg.clone(),
            PaymentError::AmountOutOfRange { min, max, .. } => format!("Amount must be between {min} and {max}"),
            PaymentError::InvalidSignature => "Invalid webhook signature".to_string(),
            PaymentError::NotFound(order_id) => format!("Payment {order_id} not found"),
            PaymentError::NotConfigured => "Payments are not available".to_string(),
            PaymentError::ProviderApi(_) | PaymentError::ProviderStatus { .. } | PaymentError::Transport(_) => {
                "Payment provider is unavailable, please try again later".to_string()
            }
            PaymentError::Database(DbError::NotFound) => "Payment not found".to_string(),
            PaymentError::Database(_) => "Internal server error".to_string(),
        }
    }
}

/// A payment the provider should open for the customer.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOrder {
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub success_url: String,
    pub fail_url: String,
    pub customer_email: Option<String>,
}

/// What the provider hands back for a newly opened payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPayment {
    pub provider_payment_id: Option<String>,
    pub payment_url: String,
}

/// Payment state as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemotePaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl From<RemotePaymentStatus> for PaymentStatus {
    fn from(status: RemotePaymentStatus) -> Self {
        match status {
            RemotePaymentStatus::Pending => PaymentStatus::Pending,
            RemotePaymentStatus::Succeeded => PaymentStatus::Succeeded,
            RemotePaymentStatus::Failed => PaymentStatus::Failed,
            RemotePaymentStatus::Cancelled => PaymentStatus::Cancelled,
        }
    }
}

/// A verified payment notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookNotification {
    pub order_id: String,
    pub status: RemotePaymentStatus,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Why a provider healthcheck failed. Each category maps to a distinct process exit code.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HealthcheckFailure {
    #[error("provider rejected credentials (HTTP 401)")]
    Unauthorized,
    #[error("provider denied access (HTTP 403)")]
    Forbidden,
    #[error("provider endpoint not found (HTTP 404)")]
    NotFound,
    #[error("provider server error (HTTP {0})")]
    ServerError(u16),
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

impl HealthcheckFailure {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => HealthcheckFailure::Unauthorized,
            StatusCode::FORBIDDEN => HealthcheckFailure::Forbidden,
            StatusCode::NOT_FOUND => HealthcheckFailure::NotFound,
            s if s.is_server_error() => HealthcheckFailure::ServerError(s.as_u16()),
            s => HealthcheckFailure::UnexpectedStatus(s.as_u16()),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            HealthcheckFailure::Unauthorized => 3,
            HealthcheckFailure::Forbidden => 4,
            HealthcheckFailure::NotFound => 5,
            HealthcheckFailure::ServerError(_) => 6,
            HealthcheckFailure::UnexpectedStatus(_) => 7,
            HealthcheckFailure::Transport(_) => 8,
        }
    }
}

/// Abstract payment provider interface
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short provider name stored on payment rows
    fn name(&self) -> &'static str;

    /// Open a payment and return the URL the customer should be redirected to.
    async fn create_payment(&self, order: &PaymentOrder) -> Result<CreatedPayment>;

    /// Ask the provider for the current status of an order.
    async fn get_payment_status(&self, order_id: &str) -> Result<RemotePaymentStatus>;

    /// Verify and parse an inbound webhook.
    ///
    /// Returns `Ok(None)` when the provider does not send webhooks, `Err` when the signature or
    /// payload is invalid.
    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<WebhookNotification>>;

    /// Check that the provider is reachable and accepts our credentials.
    async fn healthcheck(&self) -> std::result::Result<(), HealthcheckFailure>;
}
