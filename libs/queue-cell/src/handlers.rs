use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::NaiveDate;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::{ActorRole, AuthorizationScope, SYSTEM_ACTOR};
use shared_utils::extractor::caller_context;

use crate::models::{
    CreateQueueEntryRequest, PaymentCallback, QueueAction, QueueKey, QueueViewQuery,
};
use crate::services::engine::QueueEngine;
use crate::services::notifier::{message_stream, QueueEventHub, QueueEventReceiver};

fn ensure_queue_access(scope: &AuthorizationScope, doctor_id: Uuid) -> Result<(), AppError> {
    if scope.allows_doctor(doctor_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not allowed to access this doctor's queue".to_string()))
    }
}

/// Patients may join any queue; staff and doctors are limited by scope.
#[axum::debug_handler]
pub async fn create_queue_entry(
    State(engine): State<Arc<QueueEngine>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateQueueEntryRequest>,
) -> Result<Json<Value>, AppError> {
    let (actor, scope) = caller_context(&user)?;
    if actor.role != ActorRole::Patient {
        ensure_queue_access(&scope, request.doctor_id)?;
    }

    let entry = engine.create_entry(request, &actor).await?;

    Ok(Json(json!({
        "success": true,
        "entry": entry
    })))
}

#[axum::debug_handler]
pub async fn transition_queue_entry(
    State(engine): State<Arc<QueueEngine>>,
    Path(entry_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(action): Json<QueueAction>,
) -> Result<Json<Value>, AppError> {
    if matches!(action, QueueAction::PaymentSucceeded | QueueAction::PaymentFailed) {
        return Err(AppError::BadRequest(
            "Payment results are reported through the payment callback".to_string(),
        ));
    }

    let (actor, scope) = caller_context(&user)?;
    let entry = engine.get_entry(entry_id).await?;
    ensure_queue_access(&scope, entry.doctor_id)?;

    let updated = engine.transition(entry_id, action, &actor).await?;

    Ok(Json(json!({
        "success": true,
        "entry": updated
    })))
}

/// Payment provider callback, relayed by a staff or service account.
#[axum::debug_handler]
pub async fn record_payment(
    State(engine): State<Arc<QueueEngine>>,
    Path(entry_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(callback): Json<PaymentCallback>,
) -> Result<Json<Value>, AppError> {
    let (actor, scope) = caller_context(&user)?;
    if scope != AuthorizationScope::All {
        return Err(AppError::Forbidden(
            "Only staff accounts may report payment results".to_string(),
        ));
    }

    info!("Payment result for queue entry {} relayed by {}", entry_id, actor);
    let updated = engine
        .transition(entry_id, callback.into_action(), &SYSTEM_ACTOR)
        .await?;

    Ok(Json(json!({
        "success": true,
        "entry": updated
    })))
}

#[axum::debug_handler]
pub async fn get_queue_view(
    State(engine): State<Arc<QueueEngine>>,
    Path((doctor_id, service_day)): Path<(Uuid, NaiveDate)>,
    Query(query): Query<QueueViewQuery>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let (_, scope) = caller_context(&user)?;
    ensure_queue_access(&scope, doctor_id)?;

    let view = engine
        .get_queue_view(doctor_id, service_day, query.focus()?)
        .await?;

    Ok(Json(json!(view)))
}

#[axum::debug_handler]
pub async fn get_queue_entry(
    State(engine): State<Arc<QueueEngine>>,
    Path(entry_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let (_, scope) = caller_context(&user)?;
    let entry = engine.get_entry(entry_id).await?;
    ensure_queue_access(&scope, entry.doctor_id)?;

    Ok(Json(json!(entry)))
}

fn event_stream(receiver: QueueEventReceiver) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = message_stream(receiver)
        .map(|message| Ok::<_, Infallible>(Event::default().event("queue_update").data(message)));

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Live updates for one doctor's day as server-sent events.
#[axum::debug_handler]
pub async fn stream_queue_events(
    State(events): State<QueueEventHub>,
    Path((doctor_id, service_day)): Path<(Uuid, NaiveDate)>,
    Extension(user): Extension<User>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (actor, scope) = caller_context(&user)?;
    ensure_queue_access(&scope, doctor_id)?;

    let key = QueueKey::new(doctor_id, service_day);
    let receiver = events.subscribe(key).await;
    info!("{} following queue {}", actor, key);

    Ok(event_stream(receiver))
}

/// Every queue's updates, for front-desk and monitoring screens.
#[axum::debug_handler]
pub async fn stream_all_queue_events(
    State(events): State<QueueEventHub>,
    Extension(user): Extension<User>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (actor, scope) = caller_context(&user)?;
    if scope != AuthorizationScope::All {
        return Err(AppError::Forbidden(
            "Only staff accounts may follow every queue".to_string(),
        ));
    }

    info!("{} following all queues", actor);
    Ok(event_stream(events.subscribe_global()))
}
