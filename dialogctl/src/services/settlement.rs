//! Payment settlement.
//!
//! Settling claims the payment row with a conditional update (`status <> 'succeeded'`) and
//! appends the ledger credit in the same transaction. A concurrent second caller blocks on the
//! row lock, then sees the claim and reports [`SettlementOutcome::AlreadySettled`]. The credit's
//! `source_id` (`payment:{order_id}`) is unique, so even a payment reset by hand is never credited
//! twice.

use sqlx::PgPool;
use tracing::instrument;

use crate::{
    db::{
        handlers::{Credits, Payments},
        models::{
            credits::{CreditTransactionCreateDBRequest, CreditTransactionDBResponse, CreditTransactionType},
            payments::{PaymentDBResponse, PaymentStatus},
        },
    },
    payment_providers::{PaymentError, PaymentProvider, RemotePaymentStatus, Result, WebhookNotification},
};

const SOURCE_ID_UNIQUE: &str = "credit_transactions_source_id_unique";

/// Ledger source id for a payment order.
pub fn payment_source_id(order_id: &str) -> String {
    format!("payment:{order_id}")
}

#[derive(Debug)]
pub enum SettlementOutcome {
    /// This call marked the payment succeeded and credited the balance
    Settled {
        payment: PaymentDBResponse,
        transaction: CreditTransactionDBResponse,
    },
    /// The payment had been settled before
    AlreadySettled { payment: PaymentDBResponse },
}

impl SettlementOutcome {
    pub fn payment(&self) -> &PaymentDBResponse {
        match self {
            SettlementOutcome::Settled { payment, .. } | SettlementOutcome::AlreadySettled { payment } => payment,
        }
    }
}

/// Mark the payment succeeded and credit its amount, at most once.
#[instrument(skip(pool), err)]
pub async fn settle_payment(pool: &PgPool, order_id: &str) -> Result<SettlementOutcome> {
    let mut tx = pool.begin().await?;

    let Some(payment) = Payments::new(&mut tx).claim_for_settlement(order_id).await? else {
        let existing = Payments::new(&mut tx).get_by_order_id(order_id).await?;
        tx.rollback().await?;
        return match existing {
            Some(payment) => {
                tracing::debug!("Payment {} already settled", order_id);
                Ok(SettlementOutcome::AlreadySettled { payment })
            }
            None => Err(PaymentError::NotFound(order_id.to_string())),
        };
    };

    let request = CreditTransactionCreateDBRequest {
        user_id: payment.user_id,
        transaction_type: CreditTransactionType::Purchase,
        amount: payment.amount,
        source_id: payment_source_id(order_id),
        description: Some(format!("Payment {order_id}")),
    };

    match Credits::new(&mut tx).create_transaction(&request).await {
        Ok(transaction) => {
            tx.commit().await?;
            tracing::info!(
                "Settled payment {} for user {}: +{} (balance {})",
                order_id,
                payment.user_id,
                transaction.amount,
                transaction.balance_after
            );
            Ok(SettlementOutcome::Settled { payment, transaction })
        }
        Err(e) if e.is_unique_violation_of(SOURCE_ID_UNIQUE) => {
            // Credited earlier under the same order; keep the status fix, skip the credit
            tx.commit().await?;
            tracing::warn!("Payment {} was already credited; marked succeeded without a new credit", order_id);
            Ok(SettlementOutcome::AlreadySettled { payment })
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug)]
pub enum WebhookOutcome {
    Settlement(SettlementOutcome),
    /// A pending payment was marked failed or cancelled
    MarkedUnsuccessful(PaymentDBResponse),
    /// Nothing to change (pending notification, or payment no longer pending)
    Ignored,
}

/// Apply a verified provider notification.
#[instrument(skip(pool, notification), fields(order_id = %notification.order_id, status = ?notification.status), err)]
pub async fn apply_webhook(pool: &PgPool, notification: &WebhookNotification) -> Result<WebhookOutcome> {
    let payment = {
        let mut conn = pool.acquire().await?;
        Payments::new(&mut conn)
            .get_by_order_id(&notification.order_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(notification.order_id.clone()))?
    };

    if let Some(amount) = notification.amount
        && amount != payment.amount
    {
        tracing::warn!(
            "Webhook amount {} does not match payment {} amount {}",
            amount,
            payment.order_id,
            payment.amount
        );
        return Err(PaymentError::InvalidData("amount does not match the payment".to_string()));
    }

    match notification.status {
        RemotePaymentStatus::Succeeded => Ok(WebhookOutcome::Settlement(settle_payment(pool, &notification.order_id).await?)),
        RemotePaymentStatus::Failed | RemotePaymentStatus::Cancelled => {
            mark_unsuccessful(pool, &notification.order_id, notification.status.into()).await
        }
        RemotePaymentStatus::Pending => Ok(WebhookOutcome::Ignored),
    }
}

async fn mark_unsuccessful(pool: &PgPool, order_id: &str, status: PaymentStatus) -> Result<WebhookOutcome> {
    let mut conn = pool.acquire().await?;
    match Payments::new(&mut conn).mark_unsuccessful(order_id, status).await? {
        Some(payment) => {
            tracing::info!("Payment {} marked {:?}", order_id, status);
            Ok(WebhookOutcome::MarkedUnsuccessful(payment))
        }
        None => Ok(WebhookOutcome::Ignored),
    }
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    Settlement(SettlementOutcome),
    MarkedUnsuccessful(PaymentDBResponse),
    /// The provider still reports the payment as pending
    StillPending(PaymentDBResponse),
    /// Nothing to do: the payment is already final
    Final(PaymentDBResponse),
}

impl ReconcileOutcome {
    pub fn payment(&self) -> &PaymentDBResponse {
        match self {
            ReconcileOutcome::Settlement(outcome) => outcome.payment(),
            ReconcileOutcome::MarkedUnsuccessful(payment)
            | ReconcileOutcome::StillPending(payment)
            | ReconcileOutcome::Final(payment) => payment,
        }
    }
}

/// Bring a local payment in line with the provider.
///
/// Used by the status endpoint and the `reprocess-payment` command. With `force`, the payment is
/// settled without asking the provider; this also settles payments previously marked failed.
#[instrument(skip(pool, provider), err)]
pub async fn reconcile_payment(
    pool: &PgPool,
    provider: &dyn PaymentProvider,
    order_id: &str,
    force: bool,
) -> Result<ReconcileOutcome> {
    let payment = {
        let mut conn = pool.acquire().await?;
        Payments::new(&mut conn)
            .get_by_order_id(order_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(order_id.to_string()))?
    };

    if force {
        tracing::warn!("Force-settling payment {} without provider confirmation", order_id);
        return Ok(ReconcileOutcome::Settlement(settle_payment(pool, order_id).await?));
    }

    if payment.status != PaymentStatus::Pending {
        return Ok(ReconcileOutcome::Final(payment));
    }

    match provider.get_payment_status(order_id).await? {
        RemotePaymentStatus::Succeeded => Ok(ReconcileOutcome::Settlement(settle_payment(pool, order_id).await?)),
        RemotePaymentStatus::Pending => Ok(ReconcileOutcome::StillPending(payment)),
        status @ (RemotePaymentStatus::Failed | RemotePaymentStatus::Cancelled) => {
            match mark_unsuccessful(pool, order_id, status.into()).await? {
                WebhookOutcome::MarkedUnsuccessful(payment) => Ok(ReconcileOutcome::MarkedUnsuccessful(payment)),
                _ => Ok(ReconcileOutcome::Final(payment)),
            }
        }
    }
}
