//! Authentication.
//!
//! Account owners authenticate with a session JWT, sent either as `Authorization: Bearer <jwt>`
//! or in the session cookie set by `/api/auth/login`. Embedded widgets use a separate
//! long-lived widget token (see [`widget_token`]); bot workers use a shared secret checked in
//! their handlers.
//!
//! - [`current_user`]: the [`CurrentUser`](crate::api::models::users::CurrentUser) extractor and
//!   ownership checks
//! - [`password`]: Argon2 password hashing
//! - [`session`]: session JWTs
//! - [`widget_token`]: widget JWTs and domain matching

pub mod current_user;
pub mod password;
pub mod session;
pub mod widget_token;
