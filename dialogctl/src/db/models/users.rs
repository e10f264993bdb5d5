//! Row and write shapes for the `users` table.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// `password_hash` is `None` for accounts created by the first-admin bootstrap without a password.
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub email: String,
    pub password_hash: Option<String>,
    pub display_name: Option<String>,
    pub is_admin: bool,
}

/// Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    pub is_admin: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserDBResponse {
    pub id: UserId,
    pub email: String,
    pub password_hash: Option<String>,
    pub display_name: Option<String>,
    pub is_admin: bool,
    /// Set once the registration credit grant has been written to the ledger.
    pub welcome_bonus_received: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
