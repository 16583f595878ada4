//! Inbound WhatsApp webhook.
//!
//! Twilio POSTs form-encoded message data and expects a TwiML
//! (`text/xml`) reply; anything else makes the provider mark the webhook as
//! failed. This handler therefore always answers TwiML, whatever happened
//! internally: the happy path files an activity from the message text and
//! confirms with its reference, every failure path logs (phone masked) and
//! apologizes.

use axum::Form;
use axum::extract::State;
use axum::extract::rejection::FormRejection;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::api::AppState;
use crate::events::{DomainEvent, EventKind};
use crate::model::{Activity, ActivityStatus, WhatsAppMessage, new_id};
use crate::notify::mask_phone;
use crate::providers;

/// Form fields Twilio sends for an inbound message.
#[derive(Debug, Deserialize)]
pub struct TwilioInbound {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "MessageSid", default)]
    pub message_sid: String,
}

/// Escape text for inclusion in a TwiML element.
fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap a reply in the TwiML envelope Twilio requires.
fn twiml(message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
        escape_xml(message)
    )
}

fn twiml_response(message: &str) -> Response {
    (
        [(header::CONTENT_TYPE, "text/xml")],
        twiml(message),
    )
        .into_response()
}

/// POST /webhook/whatsapp - file an activity from an inbound message.
///
/// Even a payload that fails form extraction gets a TwiML answer; Twilio
/// treats anything else as a webhook failure.
#[instrument(skip_all)]
pub async fn post_whatsapp_webhook(
    State(state): State<AppState>,
    form: Result<Form<TwilioInbound>, FormRejection>,
) -> Response {
    let Form(inbound) = match form {
        Ok(form) => form,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected inbound webhook payload");
            return twiml_response("Sorry, we could not read that message. Please try again.");
        }
    };

    if inbound.body.trim().is_empty() {
        return twiml_response("Please describe the incident so we can log it.");
    }

    match file_report(&state, &inbound).await {
        Ok(reply) => twiml_response(&reply),
        Err(e) => {
            warn!(
                from = %mask_phone(&inbound.from),
                error = %e,
                "Failed to process inbound WhatsApp message"
            );
            twiml_response("Sorry, we could not log that report right now. Please try again.")
        }
    }
}

async fn file_report(state: &AppState, inbound: &TwilioInbound) -> anyhow::Result<String> {
    let (draft, source) = providers::draft_activity(&state.storage, &inbound.body, None).await?;

    let now = Utc::now();
    let activity = Activity {
        id: new_id(),
        category: draft.category,
        subcategory: draft.subcategory,
        location: draft.location.unwrap_or_else(|| "unspecified".to_string()),
        latitude: None,
        longitude: None,
        notes: draft.notes,
        photo_url: None,
        status: ActivityStatus::Unassigned,
        assigned_to_user_id: None,
        assignment_instructions: None,
        resolution_notes: None,
        reported_by: None,
        created_at: now,
        updated_at: now,
    };
    state.storage.insert_activity(&activity).await?;

    let message = WhatsAppMessage {
        id: new_id(),
        message_sid: inbound.message_sid.clone(),
        from_phone: inbound.from.clone(),
        body: inbound.body.clone(),
        direction: "inbound".to_string(),
        activity_id: Some(activity.id.clone()),
        created_at: now,
    };
    state.storage.insert_whatsapp_message(&message).await?;

    state.broadcaster.broadcast(DomainEvent::new(
        EventKind::ActivityCreated,
        json!({
            "id": activity.id,
            "category": activity.category,
            "location": activity.location,
            "status": activity.status,
            "via": "whatsapp"
        }),
    ));

    info!(
        activity_id = %activity.id,
        source = source.as_str(),
        "Filed activity from WhatsApp"
    );

    Ok(format!(
        "Logged a {} report at {}. Reference: {}",
        activity.category, activity.location, activity.id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twiml_envelope() {
        let xml = twiml("Logged.");
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<Response><Message>Logged.</Message></Response>"));
    }

    #[test]
    fn test_twiml_escapes_content() {
        let xml = twiml("a < b & c > \"d\"");
        assert!(xml.contains("a &lt; b &amp; c &gt; &quot;d&quot;"));
        assert!(!xml.contains("a < b"));
    }
}
