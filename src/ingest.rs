//! HTTP ingest for trigger events.
//!
//! The CRM pushes lifecycle events here; each accepted event is handed to
//! the enrollment manager (or the reply reactivator) and answered with
//! `204 No Content`. Handler failures are logged and answered with `500`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use dripflow_core::types::{TriggerEvent, TriggerPayload};
use dripflow_engine::{EnrollmentManager, ReplyReactivator};

#[derive(Clone)]
pub struct AppState {
    pub enrollment: Arc<EnrollmentManager>,
    pub reactivator: Arc<ReplyReactivator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events/contact-created", post(contact_created))
        .route("/events/tag-applied", post(tag_applied))
        .route("/events/origin-assigned", post(origin_assigned))
        .route("/events/keyword", post(keyword))
        .route("/events/reply", post(reply))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Fields shared by every trigger route.
#[derive(Debug, Deserialize)]
struct EventBase {
    contact_id: String,
    connection_id: String,
    #[serde(default)]
    conversation_id: Option<String>,
}

impl EventBase {
    fn into_event(self, payload: TriggerPayload) -> TriggerEvent {
        TriggerEvent {
            contact_id: self.contact_id,
            connection_id: self.connection_id,
            conversation_id: self.conversation_id,
            payload,
        }
    }
}

async fn dispatch(state: &AppState, event: TriggerEvent) -> StatusCode {
    match state.enrollment.handle_event(&event).await {
        Ok(enrolled) => {
            if !enrolled.is_empty() {
                tracing::info!(
                    "Contact {} enrolled into {} sequence(s)",
                    event.contact_id,
                    enrolled.len()
                );
            }
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            tracing::error!("Event for contact {} failed: {e}", event.contact_id);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn contact_created(State(state): State<AppState>, Json(base): Json<EventBase>) -> StatusCode {
    dispatch(&state, base.into_event(TriggerPayload::ContactCreated)).await
}

#[derive(Debug, Deserialize)]
struct TagApplied {
    #[serde(flatten)]
    base: EventBase,
    tag_id: String,
}

async fn tag_applied(State(state): State<AppState>, Json(body): Json<TagApplied>) -> StatusCode {
    let event = body
        .base
        .into_event(TriggerPayload::TagApplied { tag_id: body.tag_id });
    dispatch(&state, event).await
}

#[derive(Debug, Deserialize)]
struct OriginAssigned {
    #[serde(flatten)]
    base: EventBase,
    origin_id: String,
}

async fn origin_assigned(
    State(state): State<AppState>,
    Json(body): Json<OriginAssigned>,
) -> StatusCode {
    let event = body
        .base
        .into_event(TriggerPayload::OriginAssigned { origin_id: body.origin_id });
    dispatch(&state, event).await
}

#[derive(Debug, Deserialize)]
struct KeywordMessage {
    #[serde(flatten)]
    base: EventBase,
    text: String,
}

async fn keyword(State(state): State<AppState>, Json(body): Json<KeywordMessage>) -> StatusCode {
    let event = body
        .base
        .into_event(TriggerPayload::KeywordMatched { text: body.text });
    dispatch(&state, event).await
}

#[derive(Debug, Deserialize)]
struct Reply {
    contact_id: String,
}

async fn reply(State(state): State<AppState>, Json(body): Json<Reply>) -> StatusCode {
    match state.reactivator.on_reply(&body.contact_id).await {
        Ok(restarted) => {
            if restarted > 0 {
                tracing::info!(
                    "Reply from {} restarted {restarted} subscription(s)",
                    body.contact_id
                );
            }
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            tracing::error!("Reply from {} failed: {e}", body.contact_id);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
