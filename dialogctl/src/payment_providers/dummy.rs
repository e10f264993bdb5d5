//! Dummy payment provider implementation
//!
//! Payments are reported as paid (or failed, with `always_fail`) without contacting anything.
//! Useful for development and tests.

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::config::DummyConfig;
use crate::payment_providers::{
    CreatedPayment, HealthcheckFailure, PaymentOrder, PaymentProvider, RemotePaymentStatus, Result, WebhookNotification,
};

pub struct DummyProvider {
    always_fail: bool,
}

impl From<DummyConfig> for DummyProvider {
    fn from(config: DummyConfig) -> Self {
        Self {
            always_fail: config.always_fail,
        }
    }
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn create_payment(&self, order: &PaymentOrder) -> Result<CreatedPayment> {
        tracing::info!("Dummy provider created payment {} for {}", order.order_id, order.amount);

        // The customer lands straight on the success page
        let payment_url = if self.always_fail {
            order.fail_url.clone()
        } else {
            order.success_url.clone()
        };
        Ok(CreatedPayment {
            provider_payment_id: Some(format!("dummy_{}", order.order_id)),
            payment_url,
        })
    }

    async fn get_payment_status(&self, _order_id: &str) -> Result<RemotePaymentStatus> {
        if self.always_fail {
            Ok(RemotePaymentStatus::Failed)
        } else {
            Ok(RemotePaymentStatus::Succeeded)
        }
    }

    async fn validate_webhook(&self, _headers: &HeaderMap, _body: &str) -> Result<Option<WebhookNotification>> {
        Ok(None)
    }

    async fn healthcheck(&self) -> std::result::Result<(), HealthcheckFailure> {
        Ok(())
    }
}
