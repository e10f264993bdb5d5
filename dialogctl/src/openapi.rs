//! OpenAPI document for the HTTP API, served at `/api-docs/openapi.json` and rendered at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, db, handoff};

/// Session JWTs for owners, widget tokens for embedded chats, a shared secret for bot workers.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Session token from `/api/auth/login`. The same token is also accepted in the session cookie.",
                        ))
                        .build(),
                ),
            );
            components.security_schemes.insert(
                "WidgetToken".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-Widget-Token",
                    "Widget token issued for an assistant; the request `Origin` must be one of its domains.",
                ))),
            );
            components.security_schemes.insert(
                "BotSecret".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Bot-Secret"))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    security(("BearerAuth" = [])),
    paths(
        api::handlers::health::health,
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::me,
        api::handlers::assistants::list_assistants,
        api::handlers::assistants::create_assistant,
        api::handlers::assistants::get_assistant,
        api::handlers::assistants::update_assistant,
        api::handlers::assistants::delete_assistant,
        api::handlers::knowledge::list_knowledge,
        api::handlers::knowledge::create_knowledge,
        api::handlers::knowledge::delete_knowledge,
        api::handlers::widget::create_token,
        api::handlers::widget::revoke_tokens,
        api::handlers::widget::validate_token,
        api::handlers::widget::start_dialog,
        api::handlers::widget::post_message,
        api::handlers::widget::list_messages,
        api::handlers::dialogs::list_dialogs,
        api::handlers::dialogs::get_dialog,
        api::handlers::dialogs::post_operator_message,
        api::handlers::dialogs::accept_handoff,
        api::handlers::dialogs::release_handoff,
        api::handlers::dialogs::list_pending_handoffs,
        api::handlers::dialogs::detect_handoff,
        api::handlers::payments::create_payment,
        api::handlers::payments::get_payment,
        api::handlers::payments::list_payments,
        api::handlers::payments::webhook,
        api::handlers::balance::get_balance,
        api::handlers::balance::list_transactions,
        api::handlers::balance::adjust_balance,
        api::handlers::bots::list_bots,
        api::handlers::bots::upsert_bot,
        api::handlers::bots::delete_bot,
        api::handlers::bots::reload_bots,
        api::handlers::bots::inbound_message,
    ),
    components(
        schemas(
            api::models::health::HealthResponse,
            api::models::health::HealthStatus,
            api::models::auth::RegisterRequest,
            api::models::auth::LoginRequest,
            api::models::auth::AuthResponse,
            api::models::users::CurrentUser,
            api::models::users::UserResponse,
            api::models::assistants::AssistantCreate,
            api::models::assistants::AssistantUpdate,
            api::models::assistants::AssistantResponse,
            api::models::knowledge::KnowledgeCreate,
            api::models::knowledge::KnowledgeResponse,
            api::models::widget::WidgetTokenCreate,
            api::models::widget::WidgetTokenResponse,
            api::models::widget::WidgetTokenRevokeResponse,
            api::models::widget::ValidateWidgetTokenRequest,
            api::models::widget::ValidateWidgetTokenResponse,
            api::models::widget::WidgetDialogResponse,
            api::models::dialogs::DialogResponse,
            api::models::dialogs::MessageResponse,
            api::models::dialogs::DialogWithMessages,
            api::models::dialogs::MessageCreate,
            api::models::dialogs::UserMessageResponse,
            api::models::dialogs::OperatorMessageResponse,
            api::models::handoff::HandoffDetectRequest,
            api::models::payments::PaymentCreate,
            api::models::payments::PaymentResponse,
            api::models::payments::WebhookAck,
            api::models::balance::BalanceResponse,
            api::models::balance::CreditTransactionResponse,
            api::models::balance::BalanceAdjustment,
            api::models::bots::BotTokenUpsert,
            api::models::bots::BotTokenResponse,
            api::models::bots::BotReloadRequest,
            api::models::bots::BotReloadResponse,
            api::models::bots::BotInboundMessage,
            api::models::bots::BotInboundResponse,
            db::models::dialogs::Channel,
            db::models::dialogs::HandoffStatus,
            db::models::dialogs::Sender,
            db::models::credits::CreditTransactionType,
            db::models::payments::PaymentStatus,
            db::models::bot_tokens::Platform,
            handoff::HandoffDecision,
        )
    ),
    tags(
        (name = "health", description = "Liveness and database reachability"),
        (name = "auth", description = "Registration, login and the current user"),
        (name = "assistants", description = "Assistants owned by the caller"),
        (name = "knowledge", description = "Knowledge entries attached to an assistant"),
        (name = "widget", description = "Website widget tokens and the embedded chat.

Widget routes authenticate with `X-Widget-Token`. Tokens are bound to a list of domains and to the
assistant's widget version; revoking bumps the version and invalidates every issued token."),
        (name = "dialogs", description = "Conversations and operator handoff.

When a user message looks like a request for a human, the dialog moves to `requested`. An
operator accepts it (`active`) and later releases it back to the assistant (`released`)."),
        (name = "payments", description = "Balance top-ups through the configured payment provider"),
        (name = "balance", description = "Credit balance and ledger"),
        (name = "bots", description = "Telegram and VK bot connections and the inbound relay used by bot workers"),
    ),
    info(
        title = "dialogctl",
        description = "Backend for a chat assistant platform",
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_routes_and_schemes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/assistants/{id}"));
        assert!(doc.paths.paths.contains_key("/api/payments/webhook"));
        assert!(doc.paths.paths.contains_key("/api/bots/{platform}/messages"));

        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("WidgetToken"));
        assert!(components.schemas.contains_key("HandoffDecision"));
    }
}
