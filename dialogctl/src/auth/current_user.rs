use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    config::Config,
    errors::{Error, Result},
    types::{Operation, Resource, UserId},
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::{debug, instrument, trace};

/// Extract the user from an `Authorization: Bearer <jwt>` header.
/// Returns:
/// - None: no bearer token present
/// - Some(Ok(user)): token verified
/// - Some(Err(error)): token present but invalid
fn try_bearer_auth(parts: &Parts, config: &Config) -> Option<Result<CurrentUser>> {
    let auth_header = parts.headers.get(header::AUTHORIZATION)?;
    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };
    let token = auth_str.strip_prefix("Bearer ")?;
    Some(session::verify_session_token(token.trim(), config))
}

/// Extract the user from the session cookie.
fn try_session_cookie_auth(parts: &Parts, config: &Config) -> Option<Result<CurrentUser>> {
    let cookie_str = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    let cookie_name = &config.auth.session.cookie_name;

    let mut last_error = None;
    for cookie in cookie_str.split(';') {
        if let Some((name, value)) = cookie.trim().split_once('=')
            && name == cookie_name
        {
            match session::verify_session_token(value, config) {
                Ok(user) => return Some(Ok(user)),
                // Stale cookies are expected; keep looking
                Err(e) => last_error = Some(e),
            }
        }
    }
    last_error.map(Err)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // Bearer first, then the cookie; a valid cookie still wins over a broken header
        let mut failed = false;
        for (method, attempt) in [
            ("bearer", try_bearer_auth(parts, &state.config)),
            ("session cookie", try_session_cookie_auth(parts, &state.config)),
        ] {
            match attempt {
                Some(Ok(user)) => {
                    debug!("Authenticated user {} via {}", user.id, method);
                    return Ok(user);
                }
                Some(Err(e)) => {
                    trace!("{} authentication failed: {:?}", method, e);
                    if matches!(e, Error::Internal { .. }) {
                        return Err(e);
                    }
                    failed = true;
                }
                None => trace!("No {} credentials", method),
            }
        }

        Err(Error::Unauthenticated {
            message: failed.then(|| "Invalid or expired session".to_string()),
        })
    }
}

/// Admin-only operations.
pub fn require_admin(user: &CurrentUser, resource: Resource) -> Result<()> {
    if user.is_admin {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            action: Operation::UpdateAll,
            resource,
        })
    }
}

/// Owners may act on their own resources; admins on everyone's.
pub fn require_owner(user: &CurrentUser, owner_id: UserId, action: Operation, resource: Resource) -> Result<()> {
    if user.is_admin || user.id == owner_id {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions { action, resource })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_config, create_test_state};
    use axum::http::StatusCode;
    use sqlx::PgPool;
    use uuid::Uuid;

    fn user(is_admin: bool) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "someone@example.com".to_string(),
            display_name: None,
            is_admin,
        }
    }

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = axum::http::Request::builder().uri("http://localhost/api/auth/me");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[sqlx::test(migrations = false)]
    async fn test_bearer_and_cookie(pool: PgPool) {
        let state = create_test_state(pool, create_test_config());
        let expected = user(false);
        let token = session::create_session_token(&expected, &state.config).unwrap();

        let bearer = format!("Bearer {token}");
        let mut p = parts(&[("authorization", &bearer)]);
        assert_eq!(CurrentUser::from_request_parts(&mut p, &state).await.unwrap().id, expected.id);

        let cookie = format!("theme=dark; {}={token}", state.config.auth.session.cookie_name);
        let mut p = parts(&[("cookie", &cookie)]);
        assert_eq!(CurrentUser::from_request_parts(&mut p, &state).await.unwrap().id, expected.id);

        // Broken bearer, good cookie
        let mut p = parts(&[("authorization", "Bearer garbage"), ("cookie", &cookie)]);
        assert_eq!(CurrentUser::from_request_parts(&mut p, &state).await.unwrap().id, expected.id);
    }

    #[sqlx::test(migrations = false)]
    async fn test_missing_or_invalid_credentials(pool: PgPool) {
        let state = create_test_state(pool, create_test_config());

        let mut p = parts(&[]);
        let err = CurrentUser::from_request_parts(&mut p, &state).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.user_message(), "Authentication required");

        let mut p = parts(&[("authorization", "Bearer not.a.jwt")]);
        let err = CurrentUser::from_request_parts(&mut p, &state).await.unwrap_err();
        assert_eq!(err.user_message(), "Invalid or expired session");
    }

    #[test]
    fn test_permission_helpers() {
        let admin = user(true);
        let owner = user(false);
        let stranger = user(false);

        assert!(require_admin(&admin, Resource::Credits).is_ok());
        assert_eq!(
            require_admin(&owner, Resource::Credits).unwrap_err().status_code(),
            StatusCode::FORBIDDEN
        );

        assert!(require_owner(&owner, owner.id, Operation::ReadOwn, Resource::Assistants).is_ok());
        assert!(require_owner(&admin, owner.id, Operation::ReadOwn, Resource::Assistants).is_ok());
        assert!(require_owner(&stranger, owner.id, Operation::ReadOwn, Resource::Assistants).is_err());
    }
}
