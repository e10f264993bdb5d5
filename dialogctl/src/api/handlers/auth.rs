use axum::{Json, extract::State, http::StatusCode};

use crate::{
    AppState,
    api::models::{
        auth::{AuthResponse, LoginRequest, RegisterRequest, SessionResponse},
        users::{CurrentUser, UserResponse},
    },
    auth::{password, session},
    config::Config,
    db::{
        handlers::{Repository, Users},
        models::users::UserCreateDBRequest,
    },
    errors::Error,
    services::balance,
};

fn session_cookie(token: &str, config: &Config) -> String {
    let session = &config.auth.session;
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        session.cookie_name,
        token,
        config.auth.jwt_expiry.as_secs(),
        if session.cookie_secure { "; Secure" } else { "" }
    )
}

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    }
}

/// Register a new account owner
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    tag = "auth",
    responses(
        (status = 201, description = "Account created and signed in", body = AuthResponse),
        (status = 400, description = "Invalid input or registration disabled"),
        (status = 409, description = "Email already registered"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> Result<SessionResponse, Error> {
    if !state.config.auth.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    let email = request.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(Error::BadRequest {
            message: "A valid email address is required".to_string(),
        });
    }
    password::validate_password(&request.password, &state.config.auth.password)?;

    // Argon2 is CPU-bound
    let plain = request.password;
    let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })??;

    let mut tx = state.db.begin().await?;
    let created = Users::new(&mut tx)
        .create(&UserCreateDBRequest {
            email,
            password_hash: Some(password_hash),
            display_name: request.display_name.filter(|name| !name.trim().is_empty()),
            is_admin: false,
        })
        .await?;

    balance::grant_welcome_bonus(&mut tx, created.id, state.config.credits.welcome_bonus).await?;
    tx.commit().await?;

    let user = UserResponse::from(created);
    let token = session::create_session_token(&user.clone().into(), &state.config)?;
    tracing::info!("Registered user {}", user.id);

    Ok(SessionResponse {
        status: StatusCode::CREATED,
        cookie: session_cookie(&token, &state.config),
        body: AuthResponse {
            user,
            token,
            message: "Registration successful".to_string(),
        },
    })
}

/// Log in with email and password
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<SessionResponse, Error> {
    let mut conn = state.db.acquire().await?;
    let user = Users::new(&mut conn)
        .get_user_by_email(&request.email)
        .await?
        .ok_or_else(invalid_credentials)?;
    let hash = user.password_hash.clone().ok_or_else(invalid_credentials)?;

    let plain = request.password;
    let valid = tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })??;
    if !valid {
        return Err(invalid_credentials());
    }

    let user = UserResponse::from(user);
    let token = session::create_session_token(&user.clone().into(), &state.config)?;

    Ok(SessionResponse {
        status: StatusCode::OK,
        cookie: session_cookie(&token, &state.config),
        body: AuthResponse {
            user,
            token,
            message: "Login successful".to_string(),
        },
    })
}

/// The authenticated account
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn me(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserResponse>, Error> {
    let mut conn = state.db.acquire().await?;
    // The session may outlive the account
    let user = Users::new(&mut conn)
        .get_by_id(current_user.id)
        .await?
        .ok_or(Error::Unauthenticated { message: None })?;
    Ok(Json(UserResponse::from(user)))
}
