//! Test utilities shared by the unit and handler tests.

use axum_test::TestServer;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    AppState, Application,
    api::models::users::CurrentUser,
    auth::session,
    config::{Config, DummyConfig, PaymentConfig, PaymentProviderConfig},
    db::{
        handlers::{Assistants, Repository, Users},
        models::{
            assistants::{AssistantCreateDBRequest, AssistantDBResponse},
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    migrations::{Migrator, UpgradeTarget},
};

/// Bring an empty test database up to the latest revision.
pub async fn setup_schema(pool: &PgPool) {
    Migrator::new(pool.clone())
        .expect("embedded revisions are valid")
        .upgrade(UpgradeTarget::Heads)
        .await
        .expect("Failed to apply migrations");
}

pub fn create_test_config() -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        admin_email: "admin@test.com".to_string(),
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        payment: Some(PaymentConfig {
            min_amount: Decimal::new(100, 0),
            max_amount: Decimal::new(500_000, 0),
            currency: "RUB".to_string(),
            provider: PaymentProviderConfig::Dummy(DummyConfig::default()),
        }),
        ..Default::default()
    };
    config.auth.allow_registration = true;
    // Migrations are applied per test by setup_schema
    config.database.run_migrations = false;
    config
}

pub fn create_test_state(pool: PgPool, config: Config) -> AppState {
    crate::build_state(config, pool).expect("Failed to build app state")
}

pub async fn create_test_server(pool: PgPool) -> TestServer {
    create_test_server_with_config(pool, create_test_config()).await
}

pub async fn create_test_server_with_config(pool: PgPool, config: Config) -> TestServer {
    setup_schema(&pool).await;
    Application::new_with_pool(config, pool)
        .await
        .expect("Failed to create application")
        .into_test_server()
}

pub async fn create_test_user(pool: &PgPool, is_admin: bool) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let email = format!("user-{}@example.com", Uuid::new_v4().simple());
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email,
            password_hash: None,
            display_name: Some("Test User".to_string()),
            is_admin,
        })
        .await
        .expect("Failed to create test user")
}

pub async fn create_test_assistant(pool: &PgPool, owner_id: Uuid) -> AssistantDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Assistants::new(&mut conn)
        .create(&AssistantCreateDBRequest {
            user_id: owner_id,
            name: "Test assistant".to_string(),
            system_prompt: "You answer questions about the shop".to_string(),
            is_active: true,
        })
        .await
        .expect("Failed to create test assistant")
}

/// Session JWT for a test user, signed with the test config's secret.
pub fn bearer_token(user: &UserDBResponse) -> String {
    let current = CurrentUser {
        id: user.id,
        email: user.email.clone(),
        display_name: user.display_name.clone(),
        is_admin: user.is_admin,
    };
    session::create_session_token(&current, &create_test_config()).expect("Failed to create session token")
}
