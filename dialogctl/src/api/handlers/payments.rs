use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};

use crate::{
    AppState,
    api::models::{
        pagination::Pagination,
        payments::{PaymentCreate, PaymentResponse, WebhookAck},
        users::CurrentUser,
    },
    auth::current_user::require_owner,
    db::{
        handlers::Payments,
        models::payments::{PaymentCreateDBRequest, PaymentStatus},
    },
    errors::{Error, Result},
    payment_providers::{self, PaymentError, PaymentOrder, PaymentProvider},
    services::settlement::{self, ReconcileOutcome, WebhookOutcome},
    types::{MONEY_SCALE, Operation, Resource, fits_money_scale},
};

fn provider(state: &AppState) -> Result<Arc<dyn PaymentProvider>> {
    state.payment_provider.clone().ok_or(Error::Payment(PaymentError::NotConfigured))
}

/// Open a balance top-up payment
#[utoipa::path(
    post,
    path = "/api/payments/create-payment",
    tag = "payments",
    request_body = PaymentCreate,
    responses(
        (status = 201, description = "Payment opened", body = PaymentResponse),
        (status = 400, description = "Amount out of range or finer than cents"),
        (status = 502, description = "Provider unavailable"),
        (status = 503, description = "Payments not configured"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn create_payment(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<PaymentCreate>,
) -> Result<(StatusCode, Json<PaymentResponse>)> {
    let (Some(config), Some(provider)) = (state.config.payment.as_ref(), state.payment_provider.as_ref()) else {
        return Err(PaymentError::NotConfigured.into());
    };
    if request.amount < config.min_amount || request.amount > config.max_amount {
        return Err(PaymentError::AmountOutOfRange {
            amount: request.amount,
            min: config.min_amount,
            max: config.max_amount,
        }
        .into());
    }
    if !fits_money_scale(request.amount) {
        return Err(PaymentError::InvalidData(format!("Amount may have at most {MONEY_SCALE} decimal places")).into());
    }

    let order_id = payment_providers::generate_order_id();
    let mut conn = state.db.acquire().await?;
    Payments::new(&mut conn)
        .create(&PaymentCreateDBRequest {
            order_id: order_id.clone(),
            user_id: current_user.id,
            amount: request.amount,
            currency: config.currency.clone(),
            provider: provider.name().to_string(),
        })
        .await?;

    let return_base = state.config.dashboard_url.trim_end_matches('/');
    let order = PaymentOrder {
        order_id: order_id.clone(),
        amount: request.amount,
        currency: config.currency.clone(),
        description: request.description.unwrap_or_else(|| "Balance top-up".to_string()),
        success_url: format!("{return_base}/payment/success?order_id={order_id}"),
        fail_url: format!("{return_base}/payment/fail?order_id={order_id}"),
        customer_email: Some(current_user.email.clone()),
    };

    let created = match provider.create_payment(&order).await {
        Ok(created) => created,
        Err(e) => {
            tracing::error!("Provider {} failed to open payment {}: {}", provider.name(), order_id, e);
            Payments::new(&mut conn).mark_unsuccessful(&order_id, PaymentStatus::Failed).await?;
            return Err(e.into());
        }
    };

    let payment = Payments::new(&mut conn)
        .set_provider_details(&order_id, created.provider_payment_id.as_deref(), &created.payment_url)
        .await?
        .ok_or_else(|| Error::not_found("Payment", &order_id))?;
    tracing::info!("Opened payment {} for {} {}", order_id, payment.amount, payment.currency);

    Ok((StatusCode::CREATED, Json(payment.into())))
}

/// Payment status
///
/// A pending payment is checked with the provider and settled if it was paid.
#[utoipa::path(
    get,
    path = "/api/payments/{order_id}",
    tag = "payments",
    params(("order_id" = String, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment", body = PaymentResponse),
        (status = 403, description = "Not the payer"),
        (status = 404, description = "Unknown order"),
    )
)]
#[tracing::instrument(skip_all, fields(order_id = %order_id))]
pub async fn get_payment(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    current_user: CurrentUser,
) -> Result<Json<PaymentResponse>> {
    let payment = {
        let mut conn = state.db.acquire().await?;
        Payments::new(&mut conn)
            .get_by_order_id(&order_id)
            .await?
            .ok_or_else(|| Error::not_found("Payment", &order_id))?
    };
    require_owner(&current_user, payment.user_id, Operation::ReadOwn, Resource::Payments)?;

    if payment.status != PaymentStatus::Pending {
        return Ok(Json(payment.into()));
    }
    let Some(provider) = state.payment_provider.as_ref() else {
        return Ok(Json(payment.into()));
    };

    match settlement::reconcile_payment(&state.db, provider.as_ref(), &order_id, false).await {
        Ok(outcome) => Ok(Json(outcome.payment().clone().into())),
        // Report the stored state when the provider cannot be reached or does not know the order
        Err(
            e @ (PaymentError::ProviderApi(_)
            | PaymentError::ProviderStatus { .. }
            | PaymentError::Transport(_)
            | PaymentError::NotFound(_)),
        ) => {
            tracing::warn!("Could not refresh payment {} from provider: {}", order_id, e);
            Ok(Json(payment.into()))
        }
        Err(e) => Err(e.into()),
    }
}

/// The caller's payments, newest first
#[utoipa::path(
    get,
    path = "/api/payments",
    tag = "payments",
    params(Pagination),
    responses(
        (status = 200, description = "Payments", body = [PaymentResponse]),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_payments(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<Vec<PaymentResponse>>> {
    let (skip, limit) = pagination.params();
    let mut conn = state.db.acquire().await?;
    let payments = Payments::new(&mut conn).list_for_user(current_user.id, skip, limit).await?;
    Ok(Json(payments.into_iter().map(Into::into).collect()))
}

/// Payment provider notifications
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    tag = "payments",
    request_body(content = String, description = "Signed provider payload"),
    responses(
        (status = 200, description = "Notification processed", body = WebhookAck),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Bad signature"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Json<WebhookAck>> {
    let provider = provider(&state)?;
    let Some(notification) = provider.validate_webhook(&headers, &body).await? else {
        tracing::debug!("Provider {} ignores webhooks", provider.name());
        return Ok(Json(WebhookAck { received: false }));
    };

    match settlement::apply_webhook(&state.db, &notification).await? {
        WebhookOutcome::Settlement(outcome) => {
            tracing::info!("Webhook settled payment {} ({:?})", notification.order_id, outcome.payment().status)
        }
        WebhookOutcome::MarkedUnsuccessful(payment) => {
            tracing::info!("Webhook marked payment {} as {:?}", payment.order_id, payment.status)
        }
        WebhookOutcome::Ignored => tracing::debug!("Webhook for {} needs no action", notification.order_id),
    }
    Ok(Json(WebhookAck { received: true }))
}

/// Human-readable reconciliation result, used by the CLI.
pub fn describe_outcome(outcome: &ReconcileOutcome) -> String {
    let payment = outcome.payment();
    match outcome {
        ReconcileOutcome::Settlement(settlement::SettlementOutcome::Settled { transaction, .. }) => format!(
            "Payment {} settled: credited {} (balance {})",
            payment.order_id, transaction.amount, transaction.balance_after
        ),
        ReconcileOutcome::Settlement(settlement::SettlementOutcome::AlreadySettled { .. }) => {
            format!("Payment {} was already settled", payment.order_id)
        }
        ReconcileOutcome::MarkedUnsuccessful(_) => format!("Payment {} marked as {:?}", payment.order_id, payment.status),
        ReconcileOutcome::StillPending(_) => format!("Payment {} is still pending with the provider", payment.order_id),
        ReconcileOutcome::Final(_) => format!("Payment {} is already {:?}, nothing to do", payment.order_id, payment.status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::balance::BalanceResponse,
        config::{CashierConfig, PaymentProviderConfig},
        payment_providers::signing,
        test_utils::{bearer_token, create_test_config, create_test_server, create_test_server_with_config, create_test_user},
    };
    use axum::http::{HeaderName, HeaderValue};
    use rust_decimal::Decimal;
    use sqlx::PgPool;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cashier_config(server: &MockServer) -> crate::Config {
        let mut config = create_test_config();
        if let Some(payment) = config.payment.as_mut() {
            payment.provider = PaymentProviderConfig::Cashier(CashierConfig {
                base_url: Url::parse(&server.uri()).unwrap(),
                shop_id: "shop-1".to_string(),
                secret_key: "s3cret".to_string(),
                timeout: Duration::from_secs(5),
            });
        }
        config
    }

    #[sqlx::test(migrations = false)]
    async fn test_dummy_payment_settles_on_status_check(pool: PgPool) {
        let server = create_test_server(pool.clone()).await;
        let user = create_test_user(&pool, false).await;
        let token = bearer_token(&user);

        let response = server
            .post("/api/payments/create-payment")
            .authorization_bearer(&token)
            .json(&serde_json::json!({ "amount": "500" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: PaymentResponse = response.json();
        assert_eq!(created.status, PaymentStatus::Pending);
        assert!(created.payment_url.as_deref().unwrap().contains(&created.order_id));

        let before: BalanceResponse = server.get("/api/balance").authorization_bearer(&token).await.json();

        let status: PaymentResponse = server
            .get(&format!("/api/payments/{}", created.order_id))
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(status.status, PaymentStatus::Succeeded);
        assert!(status.settled_at.is_some());

        // Checking again does not credit twice
        server
            .get(&format!("/api/payments/{}", created.order_id))
            .authorization_bearer(&token)
            .await
            .assert_status_ok();
        let after: BalanceResponse = server.get("/api/balance").authorization_bearer(&token).await.json();
        assert_eq!(after.balance - before.balance, Decimal::new(500, 0));

        let listed: Vec<PaymentResponse> = server.get("/api/payments").authorization_bearer(&token).await.json();
        assert_eq!(listed.len(), 1);
    }

    #[sqlx::test(migrations = false)]
    async fn test_create_payment_validation(pool: PgPool) {
        let server = create_test_server(pool.clone()).await;
        let user = create_test_user(&pool, false).await;
        let stranger = create_test_user(&pool, false).await;

        for amount in ["1", "100000000", "100.005"] {
            server
                .post("/api/payments/create-payment")
                .authorization_bearer(bearer_token(&user))
                .json(&serde_json::json!({ "amount": amount }))
                .await
                .assert_status(StatusCode::BAD_REQUEST);
        }

        let created: PaymentResponse = server
            .post("/api/payments/create-payment")
            .authorization_bearer(bearer_token(&user))
            .json(&serde_json::json!({ "amount": "150.50" }))
            .await
            .json();
        server
            .get(&format!("/api/payments/{}", created.order_id))
            .authorization_bearer(bearer_token(&stranger))
            .await
            .assert_status(StatusCode::FORBIDDEN);
        server
            .get("/api/payments/ord_missing")
            .authorization_bearer(bearer_token(&user))
            .await
            .assert_status_not_found();
    }

    #[sqlx::test(migrations = false)]
    async fn test_payments_not_configured(pool: PgPool) {
        let mut config = create_test_config();
        config.payment = None;
        let server = create_test_server_with_config(pool.clone(), config).await;
        let user = create_test_user(&pool, false).await;

        server
            .post("/api/payments/create-payment")
            .authorization_bearer(bearer_token(&user))
            .json(&serde_json::json!({ "amount": "500" }))
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);
        server
            .post("/api/payments/webhook")
            .text("{}")
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[sqlx::test(migrations = false)]
    async fn test_cashier_webhook_settles_once(pool: PgPool) {
        let cashier = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "payment_id": "pay_1",
                "payment_url": "https://cashier.example.com/pay/pay_1"
            })))
            .mount(&cashier)
            .await;

        let server = create_test_server_with_config(pool.clone(), cashier_config(&cashier)).await;
        let user = create_test_user(&pool, false).await;
        let token = bearer_token(&user);

        let created: PaymentResponse = server
            .post("/api/payments/create-payment")
            .authorization_bearer(&token)
            .json(&serde_json::json!({ "amount": "250" }))
            .await
            .json();
        assert_eq!(created.payment_url.as_deref(), Some("https://cashier.example.com/pay/pay_1"));
        let before: BalanceResponse = server.get("/api/balance").authorization_bearer(&token).await.json();

        let body = serde_json::json!({ "order_id": created.order_id, "status": "succeeded", "amount": "250" }).to_string();
        let signature = HeaderValue::from_str(&signing::sign_body("s3cret", &body).unwrap()).unwrap();
        let header = HeaderName::from_static("x-signature");

        for _ in 0..2 {
            let ack: WebhookAck = server
                .post("/api/payments/webhook")
                .add_header(header.clone(), signature.clone())
                .text(body.clone())
                .await
                .json();
            assert!(ack.received);
        }

        let after: BalanceResponse = server.get("/api/balance").authorization_bearer(&token).await.json();
        assert_eq!(after.balance - before.balance, Decimal::new(250, 0));

        // Forged signature
        let forged = HeaderValue::from_str(&signing::sign_body("guess", &body).unwrap()).unwrap();
        server
            .post("/api/payments/webhook")
            .add_header(header, forged)
            .text(body)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test(migrations = false)]
    async fn test_cashier_sees_the_stored_amount(pool: PgPool) {
        let cashier = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "payment_id": "pay_2",
                "payment_url": "https://cashier.example.com/pay/pay_2"
            })))
            .mount(&cashier)
            .await;

        let server = create_test_server_with_config(pool.clone(), cashier_config(&cashier)).await;
        let user = create_test_user(&pool, false).await;
        let token = bearer_token(&user);

        let response = server
            .post("/api/payments/create-payment")
            .authorization_bearer(&token)
            .json(&serde_json::json!({ "amount": "100.005" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<serde_json::Value>()["message"], "Amount may have at most 2 decimal places");
        assert!(cashier.received_requests().await.unwrap().is_empty());

        let created: PaymentResponse = server
            .post("/api/payments/create-payment")
            .authorization_bearer(&token)
            .json(&serde_json::json!({ "amount": "100.50" }))
            .await
            .json();
        assert_eq!(created.amount, Decimal::new(10050, 2));

        let requests = cashier.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let sent_amount: Decimal = sent["amount"].as_str().unwrap().parse().unwrap();
        assert_eq!(sent_amount, created.amount);

        // The provider echoes the amount in its own formatting
        let before: BalanceResponse = server.get("/api/balance").authorization_bearer(&token).await.json();
        let body = serde_json::json!({ "order_id": created.order_id, "status": "succeeded", "amount": "100.5" }).to_string();
        server
            .post("/api/payments/webhook")
            .add_header(
                HeaderName::from_static("x-signature"),
                HeaderValue::from_str(&signing::sign_body("s3cret", &body).unwrap()).unwrap(),
            )
            .text(body)
            .await
            .assert_status_ok();
        let after: BalanceResponse = server.get("/api/balance").authorization_bearer(&token).await.json();
        assert_eq!(after.balance - before.balance, Decimal::new(10050, 2));
    }

    #[sqlx::test(migrations = false)]
    async fn test_status_falls_back_when_provider_forgot_the_order(pool: PgPool) {
        let cashier = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "payment_id": "pay_3",
                "payment_url": "https://cashier.example.com/pay/pay_3"
            })))
            .mount(&cashier)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/v1/payments/.+$"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&cashier)
            .await;

        let server = create_test_server_with_config(pool.clone(), cashier_config(&cashier)).await;
        let user = create_test_user(&pool, false).await;
        let token = bearer_token(&user);

        let created: PaymentResponse = server
            .post("/api/payments/create-payment")
            .authorization_bearer(&token)
            .json(&serde_json::json!({ "amount": "300" }))
            .await
            .json();

        let response = server
            .get(&format!("/api/payments/{}", created.order_id))
            .authorization_bearer(&token)
            .await;
        response.assert_status_ok();
        let status: PaymentResponse = response.json();
        assert_eq!(status.order_id, created.order_id);
        assert_eq!(status.status, PaymentStatus::Pending);
    }
}
