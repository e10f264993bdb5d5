//! # dialogctl: backend for a chat assistant platform
//!
//! `dialogctl` serves the API behind a dashboard where account owners build chat assistants and
//! put them in front of their customers: on a website through an embeddable widget, or on
//! Telegram and VK through bots. It stores every conversation, notices when a customer asks for a
//! human and hands the dialog to an operator, and keeps a credit balance that owners top up
//! through a payment provider.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); all state lives in PostgreSQL.
//!
//! - **API** ([`api`]): handlers and request/response models. Owners authenticate with a session
//!   JWT, widget visitors with a widget token, bot workers with a shared secret.
//! - **Auth** ([`auth`]): password hashing, session tokens, widget tokens and the ownership
//!   checks every handler runs.
//! - **Database** ([`db`]): one repository per table, each borrowing a connection.
//! - **Migrations** ([`migrations`]): a revision graph with branches and merges, applied at
//!   startup or through `dialogctl migrate`.
//! - **Handoff** ([`handoff`]): weighted phrase rules that score how strongly a message asks for a
//!   human operator.
//! - **Payments** ([`payment_providers`], [`services::settlement`]): provider abstraction plus
//!   idempotent settlement into the credit ledger.
//! - **Bots** ([`services::bots`]): outbound Telegram/VK sends and reload notifications for the
//!   bot manager.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use dialogctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = dialogctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     dialogctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod errors;
pub mod handoff;
pub mod migrations;
mod openapi;
pub mod payment_providers;
pub mod services;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{delete, get, post, put},
};
use bon::Builder;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;
pub use types::{AssistantId, DialogId, UserId};

use crate::{
    api::handlers,
    auth::password,
    config::CorsOrigin,
    db::{
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    handoff::HandoffDetector,
    migrations::{Migrator, UpgradeTarget},
    openapi::ApiDoc,
    payment_providers::PaymentProvider,
    services::bots::BotRelay,
};

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .bot_relay(relay)
///     .handoff(Arc::new(detector))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// `None` when no `payment` section is configured; payment routes then answer 503
    pub payment_provider: Option<Arc<dyn PaymentProvider>>,
    pub bot_relay: BotRelay,
    pub handoff: Arc<HandoffDetector>,
}

/// Create the initial admin user, or promote and re-password it if the email already exists.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(email: &str, password: Option<&str>, db: &PgPool) -> errors::Result<UserId> {
    let password_hash = password.map(password::hash_password).transpose()?;

    let mut tx = db.begin().await?;
    let mut users = Users::new(&mut tx);

    let user = match users.get_user_by_email(email).await? {
        Some(existing) => {
            users
                .update(
                    existing.id,
                    &UserUpdateDBRequest {
                        password_hash,
                        is_admin: Some(true),
                        ..Default::default()
                    },
                )
                .await?
        }
        None => {
            users
                .create(&UserCreateDBRequest {
                    email: email.to_string(),
                    password_hash,
                    display_name: None,
                    is_admin: true,
                })
                .await?
        }
    };

    tx.commit().await?;
    Ok(user.id)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allowed = &config.auth.cors.allowed_origins;
    let allow_origin = if allowed.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in allowed {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([
            http::header::AUTHORIZATION,
            http::header::CONTENT_TYPE,
            http::HeaderName::from_static(handlers::widget::WIDGET_TOKEN_HEADER),
        ])
        .allow_credentials(config.auth.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: every API route, the OpenAPI document and its UI, CORS and
/// request tracing.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let cors = create_cors_layer(&state.config)?;

    let api_routes = Router::new()
        // Auth
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/me", get(handlers::auth::me))
        // Assistants
        .route(
            "/assistants",
            get(handlers::assistants::list_assistants).post(handlers::assistants::create_assistant),
        )
        .route(
            "/assistants/{id}",
            get(handlers::assistants::get_assistant)
                .patch(handlers::assistants::update_assistant)
                .delete(handlers::assistants::delete_assistant),
        )
        .route("/assistants/{id}/dialogs", get(handlers::dialogs::list_dialogs))
        .route(
            "/assistants/{id}/knowledge",
            get(handlers::knowledge::list_knowledge).post(handlers::knowledge::create_knowledge),
        )
        .route("/knowledge/{id}", delete(handlers::knowledge::delete_knowledge))
        // Widget
        .route("/assistants/{id}/widget-token", post(handlers::widget::create_token))
        .route("/assistants/{id}/widget-token/revoke", post(handlers::widget::revoke_tokens))
        .route("/validate-widget-token", post(handlers::widget::validate_token))
        .route("/widget/dialogs", post(handlers::widget::start_dialog))
        .route(
            "/widget/dialogs/{id}/messages",
            get(handlers::widget::list_messages).post(handlers::widget::post_message),
        )
        // Dialogs and handoff
        .route("/dialogs/{id}", get(handlers::dialogs::get_dialog))
        .route("/dialogs/{id}/messages", post(handlers::dialogs::post_operator_message))
        .route("/dialogs/{id}/handoff/accept", post(handlers::dialogs::accept_handoff))
        .route("/dialogs/{id}/handoff/release", post(handlers::dialogs::release_handoff))
        .route("/handoffs", get(handlers::dialogs::list_pending_handoffs))
        .route("/handoff/detect", post(handlers::dialogs::detect_handoff))
        // Payments
        .route("/payments", get(handlers::payments::list_payments))
        .route("/payments/create-payment", post(handlers::payments::create_payment))
        .route("/payments/webhook", post(handlers::payments::webhook))
        .route("/payments/{order_id}", get(handlers::payments::get_payment))
        // Balance
        .route("/balance", get(handlers::balance::get_balance))
        .route("/balance/transactions", get(handlers::balance::list_transactions))
        .route("/admin/users/{user_id}/balance", post(handlers::balance::adjust_balance))
        // Bots
        .route("/bots", get(handlers::bots::list_bots))
        .route("/bots/reload", post(handlers::bots::reload_bots))
        .route(
            "/bots/{platform}",
            put(handlers::bots::upsert_bot).delete(handlers::bots::delete_bot),
        )
        .route("/bots/{platform}/messages", post(handlers::bots::inbound_message));

    let router = Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api", api_routes)
        .route("/api-docs/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .with_state(state)
        .layer(cors);

    // Add tracing layer
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Build the shared state from configuration and an open pool.
pub fn build_state(config: Config, pool: PgPool) -> anyhow::Result<AppState> {
    let payment_provider = config
        .payment
        .as_ref()
        .map(|payment| payment_providers::create_provider(&payment.provider))
        .transpose()?;
    let bot_relay = BotRelay::new(&config.bots)?;
    let handoff = Arc::new(HandoffDetector::from_config(&config.handoff));

    Ok(AppState::builder()
        .db(pool)
        .bot_relay(bot_relay)
        .handoff(handoff)
        .maybe_payment_provider(payment_provider)
        .config(config)
        .build())
}

/// The HTTP server and the resources it owns.
///
/// 1. **Create**: [`Application::new`] connects to the database, applies pending revisions when
///    `database.run_migrations` is set and ensures the admin user exists
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests
/// 3. **Shutdown**: when the shutdown future resolves, the pool is closed and telemetry flushed
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Connect to the configured database and prepare the router.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting dialogctl with configuration: {:#?}", config);
        let pool = db::connect(&config.database).await?;
        Self::new_with_pool(config, pool).await
    }

    /// Prepare the application on an existing pool.
    pub async fn new_with_pool(config: Config, pool: PgPool) -> anyhow::Result<Self> {
        if config.database.run_migrations {
            let report = Migrator::new(pool.clone())?.upgrade(UpgradeTarget::Heads).await?;
            if report.applied.is_empty() {
                info!("Database schema is up to date at {:?}", report.heads);
            } else {
                info!("Applied revisions {:?}; heads now {:?}", report.applied, report.heads);
            }
        }

        create_initial_admin_user(&config.admin_email, config.admin_password.as_deref(), &pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {}", e))?;

        let state = build_state(config.clone(), pool.clone())?;
        let router = build_router(state)?;

        Ok(Self { router, config, pool })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "dialogctl listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
