//! Cashier (payment gateway) provider.
//!
//! Every request carries `X-Shop-Id` and an `X-Signature` computed by
//! [`signing::sign_request`](super::signing::sign_request). Webhooks are verified against the raw
//! body with the same shop secret.

use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::Method;
use serde::Deserialize;
use url::Url;

use crate::config::CashierConfig;
use crate::payment_providers::{
    CreatedPayment, HealthcheckFailure, PaymentError, PaymentOrder, PaymentProvider, RemotePaymentStatus, Result,
    WebhookNotification, http_client, signing,
};

pub const SHOP_ID_HEADER: &str = "X-Shop-Id";
pub const SIGNATURE_HEADER: &str = "X-Signature";

pub struct CashierProvider {
    client: reqwest::Client,
    base_url: Url,
    shop_id: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
    #[serde(default)]
    payment_id: Option<String>,
    payment_url: String,
}

#[derive(Debug, Deserialize)]
struct PaymentStatusResponse {
    status: RemotePaymentStatus,
}

impl CashierProvider {
    pub fn new(config: &CashierConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout)?,
            base_url: config.base_url.clone(),
            shop_id: config.shop_id.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}")).map_err(|e| PaymentError::InvalidData(format!("invalid cashier URL: {e}")))
    }

    /// Build a signed request. The signature covers the full URL path, including any prefix on
    /// `base_url`.
    fn signed(&self, method: Method, path: &str, body: Option<String>) -> Result<reqwest::RequestBuilder> {
        let url = self.endpoint(path)?;
        let body = body.unwrap_or_default();
        let signature = signing::sign_request(&self.secret_key, method.as_str(), url.path(), &body)
            .ok_or_else(|| PaymentError::InvalidData("cannot sign request with the configured secret".to_string()))?;

        let mut request = self
            .client
            .request(method, url)
            .header(SHOP_ID_HEADER, &self.shop_id)
            .header(SIGNATURE_HEADER, signature);
        if !body.is_empty() {
            request = request.header(reqwest::header::CONTENT_TYPE, "application/json").body(body);
        }
        Ok(request)
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PaymentError::ProviderStatus {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl PaymentProvider for CashierProvider {
    fn name(&self) -> &'static str {
        "cashier"
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id, amount = %order.amount))]
    async fn create_payment(&self, order: &PaymentOrder) -> Result<CreatedPayment> {
        let body = serde_json::to_string(order).map_err(|e| PaymentError::InvalidData(e.to_string()))?;
        let response = self.signed(Method::POST, "/v1/payments", Some(body))?.send().await?;
        let response = error_for_status(response).await?;

        let created: CreatePaymentResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::ProviderApi(format!("malformed create-payment response: {e}")))?;

        tracing::info!("Cashier opened payment {}", order.order_id);
        Ok(CreatedPayment {
            provider_payment_id: created.payment_id,
            payment_url: created.payment_url,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get_payment_status(&self, order_id: &str) -> Result<RemotePaymentStatus> {
        let response = self
            .signed(Method::GET, &format!("/v1/payments/{order_id}"), None)?
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PaymentError::NotFound(order_id.to_string()));
        }
        let response = error_for_status(response).await?;

        let status: PaymentStatusResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::ProviderApi(format!("malformed payment status response: {e}")))?;
        Ok(status.status)
    }

    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<WebhookNotification>> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(PaymentError::InvalidSignature)?;

        if !signing::verify_body(&self.secret_key, body, signature) {
            tracing::warn!("Rejected cashier webhook with invalid signature");
            return Err(PaymentError::InvalidSignature);
        }

        let notification: WebhookNotification =
            serde_json::from_str(body).map_err(|e| PaymentError::InvalidData(format!("malformed webhook payload: {e}")))?;
        Ok(Some(notification))
    }

    async fn healthcheck(&self) -> std::result::Result<(), HealthcheckFailure> {
        let request = self
            .signed(Method::GET, "/v1/ping", None)
            .map_err(|e| HealthcheckFailure::Transport(e.to_string()))?;
        let response = request.send().await.map_err(|e| HealthcheckFailure::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(HealthcheckFailure::from_status(response.status()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> CashierProvider {
        CashierProvider::new(&CashierConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            shop_id: "shop-1".to_string(),
            secret_key: "s3cret".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn order() -> PaymentOrder {
        PaymentOrder {
            order_id: "ord_abc".to_string(),
            amount: Decimal::new(50000, 2),
            currency: "RUB".to_string(),
            description: "Balance top-up".to_string(),
            success_url: "https://app.example.com/ok".to_string(),
            fail_url: "https://app.example.com/fail".to_string(),
            customer_email: Some("owner@example.com".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_payment_signs_request() {
        let server = MockServer::start().await;
        let expected_body = serde_json::to_string(&order()).unwrap();
        let expected_signature = signing::sign_request("s3cret", "POST", "/v1/payments", &expected_body).unwrap();

        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .and(header(SHOP_ID_HEADER, "shop-1"))
            .and(header(SIGNATURE_HEADER, expected_signature.as_str()))
            .and(body_partial_json(serde_json::json!({"order_id": "ord_abc", "currency": "RUB"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "payment_id": "pay_1",
                "payment_url": "https://cashier.example.com/pay/pay_1",
                "status": "pending"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = provider(&server).create_payment(&order()).await.unwrap();
        assert_eq!(created.provider_payment_id.as_deref(), Some("pay_1"));
        assert_eq!(created.payment_url, "https://cashier.example.com/pay/pay_1");
    }

    #[tokio::test]
    async fn test_create_payment_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = provider(&server).create_payment(&order()).await.unwrap_err();
        assert!(matches!(err, PaymentError::ProviderStatus { status: 500, .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_get_payment_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/ord_abc"))
            .and(header_exists(SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "order_id": "ord_abc",
                "status": "succeeded",
                "amount": "500.00"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = provider(&server);
        assert_eq!(provider.get_payment_status("ord_abc").await.unwrap(), RemotePaymentStatus::Succeeded);
        assert!(matches!(
            provider.get_payment_status("missing").await,
            Err(PaymentError::NotFound(id)) if id == "missing"
        ));
    }

    #[tokio::test]
    async fn test_validate_webhook() {
        let server = MockServer::start().await;
        let provider = provider(&server);
        let body = r#"{"order_id":"ord_abc","status":"succeeded","amount":"500.00"}"#;

        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, signing::sign_body("s3cret", body).unwrap().parse().unwrap());
        let notification = provider.validate_webhook(&headers, body).await.unwrap().unwrap();
        assert_eq!(notification.order_id, "ord_abc");
        assert_eq!(notification.status, RemotePaymentStatus::Succeeded);

        let mut forged = HeaderMap::new();
        forged.insert(SIGNATURE_HEADER, signing::sign_body("guess", body).unwrap().parse().unwrap());
        assert!(matches!(
            provider.validate_webhook(&forged, body).await,
            Err(PaymentError::InvalidSignature)
        ));
        assert!(matches!(
            provider.validate_webhook(&HeaderMap::new(), body).await,
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_healthcheck_classification() {
        for (status, expected) in [
            (401, Some(HealthcheckFailure::Unauthorized)),
            (403, Some(HealthcheckFailure::Forbidden)),
            (404, Some(HealthcheckFailure::NotFound)),
            (503, Some(HealthcheckFailure::ServerError(503))),
            (302, Some(HealthcheckFailure::UnexpectedStatus(302))),
            (200, None),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v1/ping"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let result = provider(&server).healthcheck().await;
            assert_eq!(result.err(), expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn test_healthcheck_transport_error() {
        let server = MockServer::start().await;
        let provider = provider(&server);
        drop(server);

        let err = provider.healthcheck().await.unwrap_err();
        assert_eq!(err.exit_code(), 8);
    }
}
