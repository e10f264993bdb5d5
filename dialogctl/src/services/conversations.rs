//! Inbound user messages: store, score for handoff, escalate.

use sqlx::PgPool;
use tracing::instrument;

use crate::{
    db::{
        handlers::Dialogs,
        models::dialogs::{DialogDBResponse, DialogMessageDBResponse, Sender},
    },
    errors::{Error, Result},
    handoff::{HandoffContext, HandoffDecision, HandoffDetector},
    types::{DialogId, abbrev_uuid},
};

/// Earlier user messages looked at for the repeat boost.
const HISTORY_WINDOW: i64 = 5;

#[derive(Debug)]
pub struct InboundOutcome {
    pub message: DialogMessageDBResponse,
    pub decision: HandoffDecision,
    /// Dialog state after the message, including any handoff transition
    pub dialog: DialogDBResponse,
}

/// Store a user message and request a handoff when the detector says so.
///
/// With `escalate` off the decision is still computed and returned, but the dialog is left alone.
#[instrument(skip(pool, detector, text), fields(dialog_id = %abbrev_uuid(&dialog_id)), err)]
pub async fn record_user_message(
    pool: &PgPool,
    detector: &HandoffDetector,
    escalate: bool,
    dialog_id: DialogId,
    text: &str,
) -> Result<InboundOutcome> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::BadRequest {
            message: "Message text must not be empty".to_string(),
        });
    }

    let mut tx = pool.begin().await?;
    let mut dialogs = Dialogs::new(&mut tx);

    let previous = dialogs.recent_user_messages(dialog_id, HISTORY_WINDOW).await?;
    let message = dialogs.add_message(dialog_id, Sender::User, text).await?;

    let decision = detector.detect_with_context(text, &HandoffContext::from_history(text, &previous));

    let escalated = if escalate && decision.should_handoff {
        dialogs.request_handoff(dialog_id, decision.reason.as_deref()).await?
    } else {
        None
    };
    let dialog = match escalated {
        Some(dialog) => {
            tracing::info!(
                "Handoff requested for dialog {} (score {:.2}, reason {:?})",
                abbrev_uuid(&dialog_id),
                decision.score,
                decision.reason
            );
            dialog
        }
        None => dialogs
            .get_by_id(dialog_id)
            .await?
            .ok_or_else(|| Error::not_found("Dialog", dialog_id))?,
    };

    tx.commit().await?;
    Ok(InboundOutcome {
        message,
        decision,
        dialog,
    })
}
