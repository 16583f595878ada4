//! HTTP API handlers for Chalkline.
//!
//! Handlers are thin: validate the path id and body, touch [`Storage`], then
//! kick off the side effects (broadcast, WhatsApp notification). Side
//! effects are best-effort by contract — a broadcast or notification
//! failure is logged and never changes the response of the request that
//! triggered it.
//!
//! Path identifiers are CUIDs; malformed ids are rejected with 400 before
//! touching storage. Error mapping lives in [`crate::error`].

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    response::sse::{Event, Sse},
    routing::{delete, get, post, put},
};
use chrono::Utc;
use futures::stream::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, instrument, warn};

use crate::broadcast::Broadcaster;
use crate::error::ApiError;
use crate::events::{DomainEvent, EventKind};
use crate::model::{
    Activity, ActivityFilter, ActivityStatus, ActivityUpdate, Assignment, Category,
    CategoryRequest, CreateActivityRequest, CreateAssignmentRequest, CreateUpdateRequest,
    LlmConfig, LlmConfigRequest, LlmConfigView, ParseRequest, PresenceRequest,
    StatusUpdateRequest, UpdateActivityRequest, User, UserRequest, is_valid_id, new_id,
};
use crate::notify::{ChangeKind, WhatsAppNotifier};
use crate::providers::{self, ProviderId};
use crate::storage::Storage;
use crate::webhook::post_whatsapp_webhook;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub broadcaster: Broadcaster,
    pub notifier: Option<Arc<WhatsAppNotifier>>,
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/users", post(create_user).get(list_users))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/categories", post(create_category).get(list_categories))
        .route(
            "/categories/:id",
            get(get_category).put(update_category).delete(delete_category),
        )
        .route("/activities", post(create_activity).get(list_activities))
        .route("/activities/parse", post(parse_activity))
        .route(
            "/activities/:id",
            get(get_activity).put(update_activity).delete(delete_activity),
        )
        .route("/activities/:id/status", put(update_activity_status))
        .route(
            "/activities/:id/updates",
            post(create_activity_update).get(list_activity_updates),
        )
        .route(
            "/activities/:id/assignments",
            post(create_assignment).get(list_assignments),
        )
        .route("/assignments/:id", delete(delete_assignment))
        .route("/llm-configs", post(create_llm_config).get(list_llm_configs))
        .route(
            "/llm-configs/:id",
            get(get_llm_config).put(update_llm_config).delete(delete_llm_config),
        )
        .route("/llm-configs/:id/default", put(set_default_llm_config))
        .route("/presence", post(post_presence))
        .route("/events", get(get_events))
        .route("/webhook/whatsapp", post(post_whatsapp_webhook))
        .with_state(state)
}

fn check_id(id: &str) -> Result<(), ApiError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("malformed id: {}", id)))
    }
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

// ============================================================================
// Users
// ============================================================================

#[instrument(skip(state, request))]
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<UserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::Validation("user name must not be empty".into()));
    }

    let user = User {
        id: new_id(),
        name: request.name,
        phone: request.phone,
        role: request.role,
        created_at: Utc::now(),
    };
    state.storage.insert_user(&user).await?;

    info!(user_id = %user.id, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.storage.list_users().await?))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    check_id(&id)?;
    let user = state
        .storage
        .get_user(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("user", &id))?;
    Ok(Json(user))
}

#[instrument(skip(state, request))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UserRequest>,
) -> Result<Json<User>, ApiError> {
    check_id(&id)?;
    let mut user = state
        .storage
        .get_user(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("user", &id))?;

    user.name = request.name;
    user.phone = request.phone;
    user.role = request.role;
    state.storage.update_user(&user).await?;

    Ok(Json(user))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_id(&id)?;
    if state.storage.delete_user(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("user", &id))
    }
}

// ============================================================================
// Categories
// ============================================================================

#[instrument(skip(state, request))]
pub async fn create_category(
    State(state): State<AppState>,
    Json(request): Json<CategoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("category name must not be empty".into()));
    }
    if state.storage.get_category_by_name(&name).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "category already exists: {}",
            name
        )));
    }

    let category = Category {
        id: new_id(),
        name,
        created_at: Utc::now(),
    };
    state.storage.insert_category(&category).await?;

    info!(category_id = %category.id, name = %category.name, "Category created");
    Ok((StatusCode::CREATED, Json(category)))
}

#[instrument(skip(state))]
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.storage.list_categories().await?))
}

#[instrument(skip(state))]
pub async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Category>, ApiError> {
    check_id(&id)?;
    let category = state
        .storage
        .get_category(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("category", &id))?;
    Ok(Json(category))
}

#[instrument(skip(state, request))]
pub async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CategoryRequest>,
) -> Result<Json<Category>, ApiError> {
    check_id(&id)?;
    let mut category = state
        .storage
        .get_category(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("category", &id))?;

    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("category name must not be empty".into()));
    }
    if let Some(existing) = state.storage.get_category_by_name(&name).await? {
        if existing.id != id {
            return Err(ApiError::Conflict(format!(
                "category already exists: {}",
                name
            )));
        }
    }

    category.name = name;
    state.storage.update_category(&category).await?;
    Ok(Json(category))
}

#[instrument(skip(state))]
pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_id(&id)?;
    if state.storage.delete_category(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("category", &id))
    }
}

// ============================================================================
// Activities
// ============================================================================

#[instrument(skip(state, request))]
pub async fn create_activity(
    State(state): State<AppState>,
    Json(request): Json<CreateActivityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.category.trim().is_empty() {
        return Err(ApiError::Validation("category must not be empty".into()));
    }
    if request.location.trim().is_empty() {
        return Err(ApiError::Validation("location must not be empty".into()));
    }

    let now = Utc::now();
    let activity = Activity {
        id: new_id(),
        category: request.category,
        subcategory: request.subcategory,
        location: request.location,
        latitude: request.latitude,
        longitude: request.longitude,
        notes: request.notes,
        photo_url: request.photo_url,
        status: ActivityStatus::Unassigned,
        assigned_to_user_id: None,
        assignment_instructions: None,
        resolution_notes: None,
        reported_by: request.reported_by,
        created_at: now,
        updated_at: now,
    };
    state.storage.insert_activity(&activity).await?;

    state.broadcaster.broadcast(DomainEvent::new(
        EventKind::ActivityCreated,
        json!({
            "id": activity.id,
            "category": activity.category,
            "location": activity.location,
            "status": activity.status,
        }),
    ));

    info!(activity_id = %activity.id, category = %activity.category, "Activity created");
    Ok((StatusCode::CREATED, Json(activity)))
}

#[instrument(skip(state))]
pub async fn list_activities(
    State(state): State<AppState>,
    Query(filter): Query<ActivityFilter>,
) -> Result<Json<Vec<Activity>>, ApiError> {
    if let Some(status) = &filter.status {
        if ActivityStatus::parse(status).is_none() {
            return Err(ApiError::Validation(format!("unknown status: {}", status)));
        }
    }

    let activities = state
        .storage
        .list_activities(filter.status.as_deref(), filter.category.as_deref())
        .await?;
    Ok(Json(activities))
}

#[instrument(skip(state))]
pub async fn get_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Activity>, ApiError> {
    check_id(&id)?;
    let activity = state
        .storage
        .get_activity(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("activity", &id))?;
    Ok(Json(activity))
}

#[instrument(skip(state, request))]
pub async fn update_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateActivityRequest>,
) -> Result<Json<Activity>, ApiError> {
    check_id(&id)?;
    let mut activity = state
        .storage
        .get_activity(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("activity", &id))?;

    if let Some(category) = request.category {
        activity.category = category;
    }
    if let Some(subcategory) = request.subcategory {
        activity.subcategory = Some(subcategory);
    }
    if let Some(location) = request.location {
        activity.location = location;
    }
    if let Some(latitude) = request.latitude {
        activity.latitude = Some(latitude);
    }
    if let Some(longitude) = request.longitude {
        activity.longitude = Some(longitude);
    }
    if let Some(notes) = request.notes {
        activity.notes = Some(notes);
    }
    if let Some(photo_url) = request.photo_url {
        activity.photo_url = Some(photo_url);
    }

    // `null` clears the assignee, a string assigns, absence leaves it alone.
    match request.assigned_to_user_id {
        Some(None) => activity.clear_assignee(),
        Some(Some(user_id)) => {
            check_id(&user_id)?;
            if state.storage.get_user(&user_id).await?.is_none() {
                return Err(ApiError::not_found("user", &user_id));
            }
            activity.assign_user(user_id, request.assignment_instructions.clone());
        }
        None => {
            if let Some(instructions) = request.assignment_instructions {
                activity.assignment_instructions = Some(instructions);
            }
        }
    }

    state.storage.update_activity(&mut activity).await?;

    state.broadcaster.broadcast(DomainEvent::new(
        EventKind::ActivityUpdated,
        json!({ "id": activity.id, "status": activity.status }),
    ));

    Ok(Json(activity))
}

#[instrument(skip(state))]
pub async fn delete_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_id(&id)?;
    if state.storage.delete_activity(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("activity", &id))
    }
}

/// PUT /activities/:id/status - transition an activity's status.
///
/// Applies the lifecycle invariants, appends an audit-trail entry, then
/// fires the best-effort side effects (broadcast, WhatsApp notification).
#[instrument(skip(state, request))]
pub async fn update_activity_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<Activity>, ApiError> {
    check_id(&id)?;
    let mut activity = state
        .storage
        .get_activity(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("activity", &id))?;

    let previous = activity.status;
    let previous_assignee = activity.assigned_to_user_id.clone();
    activity.set_status(request.status, request.resolution_notes);
    state.storage.update_activity(&mut activity).await?;

    let note = request
        .note
        .unwrap_or_else(|| format!("Status changed to {}", activity.status.as_str()));
    let update = ActivityUpdate {
        id: new_id(),
        activity_id: activity.id.clone(),
        author_id: request.author_id.clone(),
        status: Some(activity.status),
        note,
        created_at: Utc::now(),
    };
    state.storage.insert_activity_update(&update).await?;

    let mut event = DomainEvent::new(
        EventKind::ActivityUpdated,
        json!({
            "id": activity.id,
            "status": activity.status,
            "previous_status": previous,
        }),
    );
    if let Some(author) = &request.author_id {
        event = event.with_actor(author.clone());
    }
    state.broadcaster.broadcast(event);

    if previous != activity.status {
        notify_status_change(&state, &activity, previous, previous_assignee).await;
    }

    info!(
        activity_id = %activity.id,
        from = previous.as_str(),
        to = activity.status.as_str(),
        "Status updated"
    );
    Ok(Json(activity))
}

/// Best-effort WhatsApp notification for a status change. Any failure here
/// is logged and swallowed; it must never surface to the request.
async fn notify_status_change(
    state: &AppState,
    activity: &Activity,
    previous: ActivityStatus,
    previous_assignee: Option<String>,
) {
    let Some(notifier) = &state.notifier else {
        return;
    };
    // A move to Unassigned clears the assignee; tell the person who had it.
    let Some(user_id) = activity.assigned_to_user_id.clone().or(previous_assignee) else {
        return;
    };

    let user = match state.storage.get_user(&user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "Could not load assignee for notification");
            return;
        }
    };
    let Some(phone) = user.phone else {
        return;
    };

    let change = if activity.status.is_closing() {
        ChangeKind::Resolved
    } else {
        ChangeKind::StatusChanged { from: previous }
    };
    notifier.notify_detached(phone, activity, change);
}

// ============================================================================
// Activity updates (audit trail)
// ============================================================================

#[instrument(skip(state, request))]
pub async fn create_activity_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CreateUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_id(&id)?;
    if request.note.trim().is_empty() {
        return Err(ApiError::Validation("note must not be empty".into()));
    }
    if state.storage.get_activity(&id).await?.is_none() {
        return Err(ApiError::not_found("activity", &id));
    }

    let update = ActivityUpdate {
        id: new_id(),
        activity_id: id,
        author_id: request.author_id,
        status: None,
        note: request.note,
        created_at: Utc::now(),
    };
    state.storage.insert_activity_update(&update).await?;

    Ok((StatusCode::CREATED, Json(update)))
}

#[instrument(skip(state))]
pub async fn list_activity_updates(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ActivityUpdate>>, ApiError> {
    check_id(&id)?;
    if state.storage.get_activity(&id).await?.is_none() {
        return Err(ApiError::not_found("activity", &id));
    }
    Ok(Json(state.storage.list_activity_updates(&id).await?))
}

// ============================================================================
// Assignments
// ============================================================================

#[instrument(skip(state, request))]
pub async fn create_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CreateAssignmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_id(&id)?;
    check_id(&request.user_id)?;

    let mut activity = state
        .storage
        .get_activity(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("activity", &id))?;
    let user = state
        .storage
        .get_user(&request.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user", &request.user_id))?;

    if state.storage.assignment_exists(&id, &user.id).await? {
        return Err(ApiError::Conflict(format!(
            "user {} is already assigned to activity {}",
            user.id, id
        )));
    }

    let assignment = Assignment {
        id: new_id(),
        activity_id: id.clone(),
        user_id: user.id.clone(),
        instructions: request.instructions.clone(),
        created_at: Utc::now(),
    };
    state.storage.insert_assignment(&assignment).await?;

    activity.assign_user(user.id.clone(), request.instructions.clone());
    state.storage.update_activity(&mut activity).await?;

    state.broadcaster.broadcast(DomainEvent::new(
        EventKind::AssignmentChanged,
        json!({
            "activity_id": activity.id,
            "user_id": user.id,
            "status": activity.status,
            "assigned": true,
        }),
    ));

    if let (Some(notifier), Some(phone)) = (&state.notifier, user.phone.clone()) {
        notifier.notify_detached(
            phone,
            &activity,
            ChangeKind::Assigned {
                instructions: request.instructions,
            },
        );
    }

    info!(activity_id = %activity.id, user_id = %user.id, "Assignment created");
    Ok((StatusCode::CREATED, Json(assignment)))
}

#[instrument(skip(state))]
pub async fn list_assignments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Assignment>>, ApiError> {
    check_id(&id)?;
    if state.storage.get_activity(&id).await?.is_none() {
        return Err(ApiError::not_found("activity", &id));
    }
    Ok(Json(state.storage.list_assignments(&id).await?))
}

#[instrument(skip(state))]
pub async fn delete_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_id(&id)?;
    let assignment = state
        .storage
        .get_assignment(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("assignment", &id))?;
    state.storage.delete_assignment(&id).await?;

    // Removing the active assignee resets the activity to Unassigned.
    if let Some(mut activity) = state.storage.get_activity(&assignment.activity_id).await? {
        if activity.assigned_to_user_id.as_deref() == Some(assignment.user_id.as_str()) {
            activity.clear_assignee();
            state.storage.update_activity(&mut activity).await?;
        }

        state.broadcaster.broadcast(DomainEvent::new(
            EventKind::AssignmentChanged,
            json!({
                "activity_id": activity.id,
                "user_id": assignment.user_id,
                "status": activity.status,
                "assigned": false,
            }),
        ));
    }

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// LLM configurations
// ============================================================================

#[instrument(skip(state, request))]
pub async fn create_llm_config(
    State(state): State<AppState>,
    Json(request): Json<LlmConfigRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if ProviderId::parse(&request.provider).is_none() {
        return Err(ApiError::Validation(format!(
            "unknown provider: {}",
            request.provider
        )));
    }
    if request.api_key.trim().is_empty() {
        return Err(ApiError::Validation("api_key must not be empty".into()));
    }

    let config = LlmConfig {
        id: new_id(),
        provider: request.provider,
        model: request.model,
        api_key: request.api_key,
        is_active: request.is_active,
        is_default: false,
        created_at: Utc::now(),
    };
    state.storage.insert_llm_config(&config).await?;

    info!(config_id = %config.id, provider = %config.provider, "LLM config created");
    Ok((StatusCode::CREATED, Json(config.masked())))
}

#[instrument(skip(state))]
pub async fn list_llm_configs(
    State(state): State<AppState>,
) -> Result<Json<Vec<LlmConfigView>>, ApiError> {
    let configs = state.storage.list_llm_configs().await?;
    Ok(Json(configs.iter().map(LlmConfig::masked).collect()))
}

#[instrument(skip(state))]
pub async fn get_llm_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LlmConfigView>, ApiError> {
    check_id(&id)?;
    let config = state
        .storage
        .get_llm_config(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("llm config", &id))?;
    Ok(Json(config.masked()))
}

#[instrument(skip(state, request))]
pub async fn update_llm_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<LlmConfigRequest>,
) -> Result<Json<LlmConfigView>, ApiError> {
    check_id(&id)?;
    if ProviderId::parse(&request.provider).is_none() {
        return Err(ApiError::Validation(format!(
            "unknown provider: {}",
            request.provider
        )));
    }

    if request.api_key.trim().is_empty() {
        return Err(ApiError::Validation("api_key must not be empty".into()));
    }

    let mut config = state
        .storage
        .get_llm_config(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("llm config", &id))?;

    config.provider = request.provider;
    config.model = request.model;
    config.api_key = request.api_key;
    config.is_active = request.is_active;
    state.storage.update_llm_config(&config).await?;

    Ok(Json(config.masked()))
}

#[instrument(skip(state))]
pub async fn delete_llm_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_id(&id)?;
    if state.storage.delete_llm_config(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("llm config", &id))
    }
}

/// PUT /llm-configs/:id/default - mark one configuration as the default.
///
/// The previous default, if any, is cleared in the same transaction.
#[instrument(skip(state))]
pub async fn set_default_llm_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_id(&id)?;
    if state.storage.set_default_llm_config(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("llm config", &id))
    }
}

// ============================================================================
// Parsing, presence, events
// ============================================================================

/// POST /activities/parse - free text to a structured activity draft.
///
/// Uses the provider fallback chain; with no usable provider, or on any
/// provider failure, the response degrades to the rule-based parser rather
/// than failing.
#[instrument(skip(state, request))]
pub async fn parse_activity(
    State(state): State<AppState>,
    Json(request): Json<ParseRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::Validation("text must not be empty".into()));
    }

    let requested = match request.provider.as_deref() {
        None => None,
        Some(name) => Some(ProviderId::parse(name).ok_or_else(|| {
            ApiError::Validation(format!("unknown provider: {}", name))
        })?),
    };

    let (draft, source) = providers::draft_activity(&state.storage, &request.text, requested)
        .await?;

    Ok(Json(json!({ "draft": draft, "source": source.as_str() })))
}

/// POST /presence - broadcast a presence change to connected clients.
#[instrument(skip(state, request))]
pub async fn post_presence(
    State(state): State<AppState>,
    Json(request): Json<PresenceRequest>,
) -> Result<StatusCode, ApiError> {
    if request.state != "online" && request.state != "offline" {
        return Err(ApiError::Validation(format!(
            "state must be 'online' or 'offline', got '{}'",
            request.state
        )));
    }

    let mut event = DomainEvent::new(
        EventKind::PresenceUpdated,
        json!({
            "user_id": request.user_id,
            "name": request.name,
            "state": request.state,
        }),
    );
    if let Some(user_id) = &request.user_id {
        event = event.with_actor(user_id.clone());
    }
    state.broadcaster.broadcast(event);

    Ok(StatusCode::ACCEPTED)
}

/// GET /events - the live event stream.
///
/// Each frame is `data: <JSON event>`. The first event on every connection
/// is `connected`; heartbeats follow on a fixed interval. Disconnection
/// surfaces as a failed push and the broadcaster drops the connection.
#[instrument(skip(state))]
pub async fn get_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.broadcaster.register(tx);

    let stream =
        UnboundedReceiverStream::new(rx).map(|event| Ok(Event::default().data(event.to_json())));
    Sse::new(stream)
}
