//! Widget tokens and the chat routes a website widget talks to.
//!
//! Widget routes authenticate with the `X-Widget-Token` header and the browser's `Origin`; no
//! user session is involved.

use axum::{
    Json,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, header, request::Parts},
};
use sqlx::PgConnection;

use crate::{
    AppState,
    api::{
        handlers::assistants::load_assistant,
        models::{
            dialogs::{MessageCreate, MessageResponse, UserMessageResponse},
            users::CurrentUser,
            widget::{
                ValidateWidgetTokenRequest, ValidateWidgetTokenResponse, WidgetDialogResponse, WidgetTokenCreate,
                WidgetTokenResponse, WidgetTokenRevokeResponse,
            },
        },
    },
    auth::{
        session::secret_key,
        widget_token::{WidgetClaims, create_widget_token, domain_allowed, normalize_domain, verify_widget_token},
    },
    config::Config,
    db::{
        handlers::{Assistants, Dialogs, Repository},
        models::{
            assistants::{AssistantDBResponse, AssistantUpdateDBRequest},
            dialogs::{Channel, DialogCreateDBRequest, DialogDBResponse},
        },
    },
    errors::{Error, Result},
    services::conversations,
    types::{AssistantId, DialogId, Operation},
};

pub const WIDGET_TOKEN_HEADER: &str = "x-widget-token";

/// Outcome of checking a widget token against the current assistant state.
#[derive(Debug)]
pub enum WidgetCheck {
    Valid {
        claims: WidgetClaims,
        assistant: AssistantDBResponse,
    },
    Invalid(&'static str),
}

/// Signature and expiry, domain, assistant existence and state, then version.
pub async fn check_widget_token(conn: &mut PgConnection, config: &Config, token: &str, origin: &str) -> Result<WidgetCheck> {
    let claims = match verify_widget_token(token, secret_key(config)?) {
        Ok(claims) => claims,
        Err(Error::Unauthenticated { .. }) => return Ok(WidgetCheck::Invalid("invalid or expired token")),
        Err(e) => return Err(e),
    };

    if !domain_allowed(&claims.domains, origin) {
        return Ok(WidgetCheck::Invalid("domain not allowed"));
    }

    let Some(assistant) = Assistants::new(conn).get_by_id(claims.sub).await? else {
        return Ok(WidgetCheck::Invalid("assistant not found"));
    };
    if !assistant.is_active {
        return Ok(WidgetCheck::Invalid("assistant is inactive"));
    }
    if !assistant.website_integration_enabled {
        return Ok(WidgetCheck::Invalid("website integration disabled"));
    }
    if claims.widget_version != assistant.widget_version {
        return Ok(WidgetCheck::Invalid("token revoked"));
    }

    Ok(WidgetCheck::Valid { claims, assistant })
}

/// An authorized widget: the assistant its token grants access to.
#[derive(Debug, Clone)]
pub struct WidgetSession {
    pub assistant: AssistantDBResponse,
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> &'a str {
    parts.headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or_default()
}

impl FromRequestParts<AppState> for WidgetSession {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = header_value(parts, WIDGET_TOKEN_HEADER);
        if token.is_empty() {
            return Err(Error::Unauthenticated {
                message: Some("Widget token required".to_string()),
            });
        }
        let origin = header_value(parts, header::ORIGIN.as_str());

        let mut conn = state.db.acquire().await?;
        match check_widget_token(&mut conn, &state.config, token, origin).await? {
            WidgetCheck::Valid { assistant, .. } => Ok(WidgetSession { assistant }),
            WidgetCheck::Invalid(reason) => {
                tracing::debug!("Widget request rejected: {}", reason);
                Err(Error::Unauthenticated {
                    message: Some(format!("Widget token rejected: {reason}")),
                })
            }
        }
    }
}

/// Load a dialog and make sure it belongs to the widget's assistant.
async fn load_widget_dialog(conn: &mut PgConnection, session: &WidgetSession, id: DialogId) -> Result<DialogDBResponse> {
    Dialogs::new(conn)
        .get_by_id(id)
        .await?
        .filter(|dialog| dialog.assistant_id == session.assistant.id && dialog.channel == Channel::Widget)
        .ok_or_else(|| Error::not_found("Dialog", id))
}

/// Issue a widget token
///
/// Also turns on website integration for the assistant.
#[utoipa::path(
    post,
    path = "/api/assistants/{id}/widget-token",
    tag = "widget",
    params(("id" = uuid::Uuid, Path, description = "Assistant ID")),
    request_body = WidgetTokenCreate,
    responses(
        (status = 201, description = "Token issued", body = WidgetTokenResponse),
        (status = 400, description = "No valid domains"),
        (status = 403, description = "Not the owner"),
    )
)]
#[tracing::instrument(skip_all, fields(assistant_id = %id))]
pub async fn create_token(
    State(state): State<AppState>,
    Path(id): Path<AssistantId>,
    current_user: CurrentUser,
    Json(request): Json<WidgetTokenCreate>,
) -> Result<(StatusCode, Json<WidgetTokenResponse>)> {
    if !request.domains.iter().any(|d| normalize_domain(d).is_some()) {
        return Err(Error::BadRequest {
            message: "At least one valid domain is required".to_string(),
        });
    }

    let mut tx = state.db.begin().await?;
    let assistant = load_assistant(&mut tx, &current_user, id, Operation::UpdateOwn).await?;
    let assistant = if assistant.website_integration_enabled {
        assistant
    } else {
        Assistants::new(&mut tx)
            .update(
                id,
                &AssistantUpdateDBRequest {
                    website_integration_enabled: Some(true),
                    ..Default::default()
                },
            )
            .await?
    };
    tx.commit().await?;

    let claims = WidgetClaims::new(
        assistant.id,
        assistant.user_id,
        request.domains,
        assistant.widget_version,
        state.config.widget.token_ttl,
    );
    let token = create_widget_token(&claims, secret_key(&state.config)?)?;
    tracing::info!("Issued widget token for assistant {} (version {})", assistant.id, claims.widget_version);

    Ok((
        StatusCode::CREATED,
        Json(WidgetTokenResponse {
            token,
            domains: claims.domains,
            widget_version: claims.widget_version,
            expires_at: claims.exp,
        }),
    ))
}

/// Revoke every widget token issued for an assistant
#[utoipa::path(
    post,
    path = "/api/assistants/{id}/widget-token/revoke",
    tag = "widget",
    params(("id" = uuid::Uuid, Path, description = "Assistant ID")),
    responses(
        (status = 200, description = "Tokens revoked", body = WidgetTokenRevokeResponse),
        (status = 403, description = "Not the owner"),
    )
)]
#[tracing::instrument(skip_all, fields(assistant_id = %id))]
pub async fn revoke_tokens(
    State(state): State<AppState>,
    Path(id): Path<AssistantId>,
    current_user: CurrentUser,
) -> Result<Json<WidgetTokenRevokeResponse>> {
    let mut tx = state.db.begin().await?;
    load_assistant(&mut tx, &current_user, id, Operation::UpdateOwn).await?;
    let assistant = Assistants::new(&mut tx).bump_widget_version(id).await?;
    tx.commit().await?;

    Ok(Json(WidgetTokenRevokeResponse {
        widget_version: assistant.widget_version,
    }))
}

/// Check a widget token for a domain
#[utoipa::path(
    post,
    path = "/api/validate-widget-token",
    tag = "widget",
    request_body = ValidateWidgetTokenRequest,
    responses(
        (status = 200, description = "Validation result", body = ValidateWidgetTokenResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn validate_token(
    State(state): State<AppState>,
    Json(request): Json<ValidateWidgetTokenRequest>,
) -> Result<Json<ValidateWidgetTokenResponse>> {
    let mut conn = state.db.acquire().await?;
    let response = match check_widget_token(&mut conn, &state.config, &request.token, &request.domain).await? {
        WidgetCheck::Valid { claims, .. } => ValidateWidgetTokenResponse::valid(claims.sub),
        WidgetCheck::Invalid(reason) => ValidateWidgetTokenResponse::invalid(reason),
    };
    Ok(Json(response))
}

/// Start a widget dialog
#[utoipa::path(
    post,
    path = "/api/widget/dialogs",
    tag = "widget",
    params(("X-Widget-Token" = String, Header, description = "Widget token")),
    responses(
        (status = 201, description = "Dialog started", body = WidgetDialogResponse),
        (status = 401, description = "Token missing or rejected"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn start_dialog(State(state): State<AppState>, session: WidgetSession) -> Result<(StatusCode, Json<WidgetDialogResponse>)> {
    let mut conn = state.db.acquire().await?;
    let dialog = Dialogs::new(&mut conn)
        .create(&DialogCreateDBRequest {
            assistant_id: session.assistant.id,
            user_id: session.assistant.user_id,
            channel: Channel::Widget,
            external_chat_id: None,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(WidgetDialogResponse {
            dialog_id: dialog.id,
            assistant_id: session.assistant.id,
            assistant_name: session.assistant.name,
        }),
    ))
}

/// Send a visitor message
#[utoipa::path(
    post,
    path = "/api/widget/dialogs/{id}/messages",
    tag = "widget",
    params(
        ("id" = uuid::Uuid, Path, description = "Dialog ID"),
        ("X-Widget-Token" = String, Header, description = "Widget token"),
    ),
    request_body = MessageCreate,
    responses(
        (status = 201, description = "Message stored", body = UserMessageResponse),
        (status = 401, description = "Token missing or rejected"),
        (status = 404, description = "Dialog not found for this widget"),
    )
)]
#[tracing::instrument(skip_all, fields(dialog_id = %id))]
pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<DialogId>,
    session: WidgetSession,
    Json(request): Json<MessageCreate>,
) -> Result<(StatusCode, Json<UserMessageResponse>)> {
    {
        let mut conn = state.db.acquire().await?;
        load_widget_dialog(&mut conn, &session, id).await?;
    }

    let outcome =
        conversations::record_user_message(&state.db, &state.handoff, state.config.handoff.enabled, id, &request.text).await?;

    Ok((
        StatusCode::CREATED,
        Json(UserMessageResponse {
            dialog_id: id,
            message: outcome.message.into(),
            handoff: outcome.decision,
            handoff_status: outcome.dialog.handoff_status,
        }),
    ))
}

/// Messages of a widget dialog
#[utoipa::path(
    get,
    path = "/api/widget/dialogs/{id}/messages",
    tag = "widget",
    params(
        ("id" = uuid::Uuid, Path, description = "Dialog ID"),
        ("X-Widget-Token" = String, Header, description = "Widget token"),
    ),
    responses(
        (status = 200, description = "Messages, oldest first", body = [MessageResponse]),
        (status = 404, description = "Dialog not found for this widget"),
    )
)]
#[tracing::instrument(skip_all, fields(dialog_id = %id))]
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<DialogId>,
    session: WidgetSession,
) -> Result<Json<Vec<MessageResponse>>> {
    let mut conn = state.db.acquire().await?;
    load_widget_dialog(&mut conn, &session, id).await?;
    let messages = Dialogs::new(&mut conn).list_messages(id).await?;
    Ok(Json(messages.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::models::dialogs::HandoffStatus,
        test_utils::{bearer_token, create_test_assistant, create_test_server, create_test_user},
    };
    use axum::http::{HeaderName, HeaderValue};
    use axum_test::TestServer;
    use sqlx::PgPool;

    async fn issue(server: &TestServer, token: &str, assistant_id: AssistantId, domains: &[&str]) -> WidgetTokenResponse {
        let response = server
            .post(&format!("/api/assistants/{assistant_id}/widget-token"))
            .authorization_bearer(token)
            .json(&serde_json::json!({ "domains": domains }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    async fn validate(server: &TestServer, token: &str, domain: &str) -> ValidateWidgetTokenResponse {
        server
            .post("/api/validate-widget-token")
            .json(&ValidateWidgetTokenRequest {
                token: token.to_string(),
                domain: domain.to_string(),
            })
            .await
            .json()
    }

    fn widget_headers(token: &str, origin: &str) -> [(HeaderName, HeaderValue); 2] {
        [
            (HeaderName::from_static(WIDGET_TOKEN_HEADER), HeaderValue::from_str(token).unwrap()),
            (header::ORIGIN, HeaderValue::from_str(origin).unwrap()),
        ]
    }

    #[sqlx::test(migrations = false)]
    async fn test_issue_validate_revoke(pool: PgPool) {
        let server = create_test_server(pool.clone()).await;
        let owner = create_test_user(&pool, false).await;
        let assistant = create_test_assistant(&pool, owner.id).await;
        let bearer = bearer_token(&owner);

        let issued = issue(&server, &bearer, assistant.id, &["https://Shop.example.com"]).await;
        assert_eq!(issued.domains, vec!["shop.example.com"]);
        assert_eq!(issued.widget_version, 1);

        let result = validate(&server, &issued.token, "https://shop.example.com").await;
        assert!(result.valid);
        assert_eq!(result.assistant_id, Some(assistant.id));

        let result = validate(&server, &issued.token, "https://example.com").await;
        assert!(!result.valid);
        assert_eq!(result.reason.as_deref(), Some("domain not allowed"));

        let result = validate(&server, "garbage", "https://shop.example.com").await;
        assert_eq!(result.reason.as_deref(), Some("invalid or expired token"));

        let revoked: WidgetTokenRevokeResponse = server
            .post(&format!("/api/assistants/{}/widget-token/revoke", assistant.id))
            .authorization_bearer(&bearer)
            .await
            .json();
        assert_eq!(revoked.widget_version, 2);

        let result = validate(&server, &issued.token, "https://shop.example.com").await;
        assert_eq!(result.reason.as_deref(), Some("token revoked"));

        let reissued = issue(&server, &bearer, assistant.id, &["shop.example.com"]).await;
        assert_eq!(reissued.widget_version, 2);
        assert!(validate(&server, &reissued.token, "shop.example.com").await.valid);
    }

    #[sqlx::test(migrations = false)]
    async fn test_issue_rules(pool: PgPool) {
        let server = create_test_server(pool.clone()).await;
        let owner = create_test_user(&pool, false).await;
        let stranger = create_test_user(&pool, false).await;
        let assistant = create_test_assistant(&pool, owner.id).await;
        let path = format!("/api/assistants/{}/widget-token", assistant.id);

        server
            .post(&path)
            .authorization_bearer(bearer_token(&owner))
            .json(&serde_json::json!({ "domains": ["   "] }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        server
            .post(&path)
            .authorization_bearer(bearer_token(&stranger))
            .json(&serde_json::json!({ "domains": ["example.com"] }))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        // Disabling the assistant or its integration invalidates live tokens
        let issued = issue(&server, &bearer_token(&owner), assistant.id, &["example.com"]).await;
        server
            .patch(&format!("/api/assistants/{}", assistant.id))
            .authorization_bearer(bearer_token(&owner))
            .json(&serde_json::json!({ "website_integration_enabled": false }))
            .await
            .assert_status_ok();
        let result = validate(&server, &issued.token, "example.com").await;
        assert_eq!(result.reason.as_deref(), Some("website integration disabled"));
    }

    #[sqlx::test(migrations = false)]
    async fn test_widget_chat(pool: PgPool) {
        let server = create_test_server(pool.clone()).await;
        let owner = create_test_user(&pool, false).await;
        let assistant = create_test_assistant(&pool, owner.id).await;
        let issued = issue(&server, &bearer_token(&owner), assistant.id, &["example.com"]).await;
        let [(token_name, token_value), (origin_name, origin_value)] = widget_headers(&issued.token, "https://www.example.com");

        let response = server
            .post("/api/widget/dialogs")
            .add_header(token_name.clone(), token_value.clone())
            .add_header(origin_name.clone(), origin_value.clone())
            .await;
        response.assert_status(StatusCode::CREATED);
        let started: WidgetDialogResponse = response.json();
        assert_eq!(started.assistant_id, assistant.id);

        let messages_path = format!("/api/widget/dialogs/{}/messages", started.dialog_id);
        let response = server
            .post(&messages_path)
            .add_header(token_name.clone(), token_value.clone())
            .add_header(origin_name.clone(), origin_value.clone())
            .json(&MessageCreate {
                text: "Позовите оператора".to_string(),
            })
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: serde_json::Value = response.json();
        assert_eq!(body["handoff"]["should_handoff"], true);
        assert_eq!(body["handoff_status"], serde_json::json!(HandoffStatus::Requested));

        let messages: Vec<MessageResponse> = server
            .get(&messages_path)
            .add_header(token_name.clone(), token_value.clone())
            .add_header(origin_name.clone(), origin_value.clone())
            .await
            .json();
        assert_eq!(messages.len(), 1);

        // Wrong origin
        let [_, (_, evil)] = widget_headers(&issued.token, "https://evil.io");
        server
            .get(&messages_path)
            .add_header(token_name.clone(), token_value.clone())
            .add_header(origin_name.clone(), evil)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        // Missing token
        server.post("/api/widget/dialogs").await.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test(migrations = false)]
    async fn test_widget_cannot_read_other_assistants_dialogs(pool: PgPool) {
        let server = create_test_server(pool.clone()).await;
        let owner = create_test_user(&pool, false).await;
        let first = create_test_assistant(&pool, owner.id).await;
        let second = create_test_assistant(&pool, owner.id).await;
        let first_token = issue(&server, &bearer_token(&owner), first.id, &["example.com"]).await;
        let second_token = issue(&server, &bearer_token(&owner), second.id, &["example.com"]).await;

        let [(name, value), (origin_name, origin)] = widget_headers(&first_token.token, "https://example.com");
        let started: WidgetDialogResponse = server
            .post("/api/widget/dialogs")
            .add_header(name, value)
            .add_header(origin_name, origin)
            .await
            .json();

        let [(name, value), (origin_name, origin)] = widget_headers(&second_token.token, "https://example.com");
        server
            .get(&format!("/api/widget/dialogs/{}/messages", started.dialog_id))
            .add_header(name, value)
            .add_header(origin_name, origin)
            .await
            .assert_status_not_found();
    }
}
