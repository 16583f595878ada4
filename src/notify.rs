//! Outbound WhatsApp notifications via Twilio.
//!
//! Delivery is best-effort and fires exactly once per notification event:
//! no queue, no retry. Failures are logged with the phone number masked and
//! never reach the request handler that triggered the notification —
//! [`WhatsAppNotifier::notify_detached`] runs the send on a detached task.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::model::{Activity, ActivityStatus};

/// Base URL for the Twilio REST API.
const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// What changed, for template selection.
#[derive(Debug, Clone)]
pub enum ChangeKind {
    StatusChanged { from: ActivityStatus },
    Assigned { instructions: Option<String> },
    Resolved,
}

/// Twilio send-message client for WhatsApp.
#[derive(Clone)]
pub struct WhatsAppNotifier {
    client: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    /// Sender address, e.g. "whatsapp:+14155238886".
    from: String,
}

impl WhatsAppNotifier {
    pub fn new(account_sid: &str, auth_token: &str, from: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: TWILIO_API_BASE.to_string(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from: from.to_string(),
        }
    }

    /// Create a notifier with a custom base URL (for testing).
    pub fn with_base_url(account_sid: &str, auth_token: &str, from: &str, base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::new(account_sid, auth_token, from)
        }
    }

    /// Render the message body for a change to an activity.
    pub fn render_message(activity: &Activity, change: &ChangeKind) -> String {
        let heading = format!(
            "[{}] {} at {}",
            activity.category,
            activity.subcategory.as_deref().unwrap_or("incident"),
            activity.location
        );

        match change {
            ChangeKind::StatusChanged { from } => format!(
                "{}\nStatus changed: {} -> {}",
                heading,
                from.as_str(),
                activity.status.as_str()
            ),
            ChangeKind::Assigned { instructions } => {
                let mut body = format!("{}\nYou have been assigned to this activity.", heading);
                if let Some(instructions) = instructions {
                    body.push_str("\nInstructions: ");
                    body.push_str(instructions);
                }
                body
            }
            ChangeKind::Resolved => {
                let mut body = format!("{}\nMarked resolved.", heading);
                if let Some(notes) = &activity.resolution_notes {
                    body.push_str("\nNotes: ");
                    body.push_str(notes);
                }
                body
            }
        }
    }

    /// Single delivery attempt through Twilio's send-message API.
    pub async fn send(&self, to_phone: &str, body: &str) -> anyhow::Result<()> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );

        let to = if to_phone.starts_with("whatsapp:") {
            to_phone.to_string()
        } else {
            format!("whatsapp:{}", to_phone)
        };

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("From", self.from.as_str()), ("To", &to), ("Body", body)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail: Value = response.json().await.unwrap_or(Value::Null);
            anyhow::bail!("twilio send failed (status {}): {}", status, detail);
        }

        Ok(())
    }

    /// Fire-and-forget delivery: spawns the send so the caller's response is
    /// never blocked on Twilio, and swallows (but logs) any failure.
    pub fn notify_detached(self: &Arc<Self>, to_phone: String, activity: &Activity, change: ChangeKind) {
        let notifier = Arc::clone(self);
        let body = Self::render_message(activity, &change);
        let activity_id = activity.id.clone();

        tokio::spawn(async move {
            let masked = mask_phone(&to_phone);
            match notifier.send(&to_phone, &body).await {
                Ok(()) => {
                    info!(activity_id = %activity_id, to = %masked, "WhatsApp notification sent");
                }
                Err(e) => {
                    warn!(
                        activity_id = %activity_id,
                        to = %masked,
                        error = %e,
                        "WhatsApp notification failed"
                    );
                }
            }
        });
    }
}

/// Mask a phone number to its last four digits for logging.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("****{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::new_id;
    use chrono::Utc;

    fn activity() -> Activity {
        let now = Utc::now();
        Activity {
            id: new_id(),
            category: "maintenance".to_string(),
            subcategory: Some("leak".to_string()),
            location: "Room 4".to_string(),
            latitude: None,
            longitude: None,
            notes: None,
            photo_url: None,
            status: ActivityStatus::Open,
            assigned_to_user_id: Some("user1".to_string()),
            assignment_instructions: None,
            resolution_notes: None,
            reported_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+15551234567"), "****4567");
        assert_eq!(mask_phone("whatsapp:+15551234567"), "****4567");
        assert_eq!(mask_phone("123"), "****");
        assert_eq!(mask_phone(""), "****");
    }

    #[test]
    fn test_status_change_template() {
        let body = WhatsAppNotifier::render_message(
            &activity(),
            &ChangeKind::StatusChanged {
                from: ActivityStatus::Unassigned,
            },
        );
        assert!(body.contains("[maintenance] leak at Room 4"));
        assert!(body.contains("Unassigned -> Open"));
    }

    #[test]
    fn test_assignment_template_includes_instructions() {
        let body = WhatsAppNotifier::render_message(
            &activity(),
            &ChangeKind::Assigned {
                instructions: Some("bring a wrench".to_string()),
            },
        );
        assert!(body.contains("assigned"));
        assert!(body.contains("bring a wrench"));
    }

    #[test]
    fn test_resolved_template() {
        let mut a = activity();
        a.set_status(ActivityStatus::Resolved, Some("tightened the valve".to_string()));
        let body = WhatsAppNotifier::render_message(&a, &ChangeKind::Resolved);
        assert!(body.contains("Marked resolved"));
        assert!(body.contains("tightened the valve"));
    }
}
