//! Registration and login payloads.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::users::UserResponse;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserResponse,
    /// Session JWT, also set as the session cookie
    pub token: String,
    pub message: String,
}

/// Auth response plus the `Set-Cookie` header carrying the session.
#[derive(Debug)]
pub struct SessionResponse {
    pub status: StatusCode,
    pub body: AuthResponse,
    pub cookie: String,
}

impl IntoResponse for SessionResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        match self.cookie.parse() {
            Ok(value) => {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!("Session cookie is not a valid header value: {}", e),
        }
        response
    }
}
