//! Data models for Chalkline.
//!
//! The central record is the [`Activity`]: an incident or task reported by
//! staff, either through the JSON API or the WhatsApp webhook. Activities
//! carry an append-only trail of [`ActivityUpdate`] children and zero or more
//! [`Assignment`] records linking responsible users.
//!
//! Status-transition rules live here as pure functions on [`Activity`] so the
//! HTTP handlers and the webhook share one implementation:
//!
//! - setting status to `Unassigned` clears the assignee and instructions
//! - leaving `Resolved`/`Completed` (a reopen) clears the resolution notes
//! - assigning a user while `Unassigned` promotes the activity to `Open`
//! - clearing the assignee resets the activity to `Unassigned`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle status of an activity.
///
/// The nominal progression is `Unassigned -> Open -> Assigned/InProgress ->
/// Resolved/Completed`, with `Cancelled` and `OnHold` as side states. The
/// progression is loosely enforced: any transition is accepted, but the
/// invariants above are applied on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityStatus {
    Unassigned,
    Open,
    Assigned,
    InProgress,
    Resolved,
    Completed,
    Cancelled,
    OnHold,
}

impl ActivityStatus {
    /// String form used for database storage and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Unassigned => "Unassigned",
            ActivityStatus::Open => "Open",
            ActivityStatus::Assigned => "Assigned",
            ActivityStatus::InProgress => "InProgress",
            ActivityStatus::Resolved => "Resolved",
            ActivityStatus::Completed => "Completed",
            ActivityStatus::Cancelled => "Cancelled",
            ActivityStatus::OnHold => "OnHold",
        }
    }

    /// Parse the database/wire string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Unassigned" => Some(ActivityStatus::Unassigned),
            "Open" => Some(ActivityStatus::Open),
            "Assigned" => Some(ActivityStatus::Assigned),
            "InProgress" => Some(ActivityStatus::InProgress),
            "Resolved" => Some(ActivityStatus::Resolved),
            "Completed" => Some(ActivityStatus::Completed),
            "Cancelled" => Some(ActivityStatus::Cancelled),
            "OnHold" => Some(ActivityStatus::OnHold),
            _ => None,
        }
    }

    /// Whether this status represents a closed-out activity.
    ///
    /// Moving from a closing status back to anything else is a reopen and
    /// clears the resolution notes.
    pub fn is_closing(&self) -> bool {
        matches!(self, ActivityStatus::Resolved | ActivityStatus::Completed)
    }
}

/// An incident or task record.
#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub id: String,

    /// Coarse category such as "maintenance" or "security".
    pub category: String,

    /// Finer classification within the category, e.g. "leak".
    pub subcategory: Option<String>,

    /// Where the incident happened, free text ("Room 4", "west gate").
    pub location: String,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    /// Free-text description from the reporter.
    pub notes: Option<String>,

    /// Reference to an uploaded photo, if any.
    pub photo_url: Option<String>,

    pub status: ActivityStatus,

    /// The user currently responsible, if any.
    pub assigned_to_user_id: Option<String>,

    /// Instructions given to the assignee.
    pub assignment_instructions: Option<String>,

    /// Notes written when the activity was resolved. Cleared on reopen.
    pub resolution_notes: Option<String>,

    /// The user who reported the activity, when known.
    pub reported_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    /// Apply a status change, enforcing the lifecycle invariants.
    ///
    /// `resolution_notes` is only consulted when the new status is a closing
    /// one; a reopen always clears whatever notes were stored.
    pub fn set_status(&mut self, new_status: ActivityStatus, resolution_notes: Option<String>) {
        let was_closing = self.status.is_closing();

        if was_closing && !new_status.is_closing() {
            self.resolution_notes = None;
        }

        if new_status.is_closing() {
            if let Some(notes) = resolution_notes {
                self.resolution_notes = Some(notes);
            }
        }

        if new_status == ActivityStatus::Unassigned {
            self.assigned_to_user_id = None;
            self.assignment_instructions = None;
        }

        self.status = new_status;
    }

    /// Assign a responsible user, promoting `Unassigned` to `Open`.
    pub fn assign_user(&mut self, user_id: String, instructions: Option<String>) {
        self.assigned_to_user_id = Some(user_id);
        if instructions.is_some() {
            self.assignment_instructions = instructions;
        }
        if self.status == ActivityStatus::Unassigned {
            self.status = ActivityStatus::Open;
        }
    }

    /// Remove the current assignee and reset the activity to `Unassigned`.
    pub fn clear_assignee(&mut self) {
        self.assigned_to_user_id = None;
        self.assignment_instructions = None;
        self.set_status(ActivityStatus::Unassigned, None);
    }
}

/// A staff member who reports or handles activities.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    /// E.164 phone number used for WhatsApp notifications, if known.
    pub phone: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// A named incident category ("maintenance", "security", ...).
#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One entry in an activity's append-only audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityUpdate {
    pub id: String,
    pub activity_id: String,
    pub author_id: Option<String>,
    /// Status the activity held after this update, when the update changed it.
    pub status: Option<ActivityStatus>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// A responsibility link between an activity and a user.
///
/// Uniqueness is enforced on (activity_id, user_id); a second assignment of
/// the same user to the same activity is a conflict, not a duplicate row.
#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub id: String,
    pub activity_id: String,
    pub user_id: String,
    pub instructions: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An inbound or outbound WhatsApp message.
#[derive(Debug, Clone, Serialize)]
pub struct WhatsAppMessage {
    pub id: String,
    /// Provider-assigned message identifier.
    pub message_sid: String,
    pub from_phone: String,
    pub body: String,
    /// "inbound" or "outbound".
    pub direction: String,
    /// The activity this message produced or concerns, if any.
    pub activity_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A stored AI provider configuration.
///
/// Invariant: at most one configuration is marked default at any time.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl LlmConfig {
    /// Serializable view with the credential masked to its last four chars.
    pub fn masked(&self) -> LlmConfigView {
        // Counted in characters, not bytes; keys aren't guaranteed ASCII.
        let char_count = self.api_key.chars().count();
        let masked_key = if char_count > 4 {
            let tail: String = self.api_key.chars().skip(char_count - 4).collect();
            format!("...{}", tail)
        } else {
            "...".to_string()
        };
        LlmConfigView {
            id: self.id.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            api_key: masked_key,
            is_active: self.is_active,
            is_default: self.is_default,
            created_at: self.created_at,
        }
    }
}

/// API response form of [`LlmConfig`]; never exposes the full credential.
#[derive(Debug, Clone, Serialize)]
pub struct LlmConfigView {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// A structured activity draft produced by an AI provider or the rule-based
/// fallback parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDraft {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

// ============================================================================
// Request bodies
// ============================================================================

/// Request body for POST /users and PUT /users/:id.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRequest {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "staff".to_string()
}

/// Request body for POST /categories and PUT /categories/:id.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
}

/// Request body for POST /activities.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateActivityRequest {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub location: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub reported_by: Option<String>,
}

/// Request body for PUT /activities/:id.
///
/// All fields are optional; `assigned_to_user_id` distinguishes "absent"
/// (leave unchanged) from explicit `null` (clear the assignee).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateActivityRequest {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_to_user_id: Option<Option<String>>,
    #[serde(default)]
    pub assignment_instructions: Option<String>,
}

/// Request body for PUT /activities/:id/status.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: ActivityStatus,
    #[serde(default)]
    pub resolution_notes: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
}

/// Request body for POST /activities/:id/updates.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUpdateRequest {
    pub note: String,
    #[serde(default)]
    pub author_id: Option<String>,
}

/// Request body for POST /activities/:id/assignments.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAssignmentRequest {
    pub user_id: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Request body for POST /llm-configs and PUT /llm-configs/:id.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfigRequest {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Request body for POST /activities/parse.
#[derive(Debug, Clone, Deserialize)]
pub struct ParseRequest {
    pub text: String,
    /// Preferred provider name; the fallback chain is consulted regardless.
    #[serde(default)]
    pub provider: Option<String>,
}

/// Request body for POST /presence.
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// "online" or "offline".
    pub state: String,
}

/// Query parameters for GET /activities.
#[derive(Debug, Deserialize)]
pub struct ActivityFilter {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

// ============================================================================
// Identifiers
// ============================================================================

/// Generate a fresh record identifier (CUID).
pub fn new_id() -> String {
    cuid2::create_id()
}

/// Validate a path identifier: 24 lowercase alphanumerics with a leading
/// letter, the shape `cuid2` produces. Malformed ids are rejected with 400
/// before any storage lookup.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == 24
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && id.chars().next().is_some_and(|c| c.is_ascii_lowercase())
}

/// Deserialize helper distinguishing an absent field from explicit `null`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}
