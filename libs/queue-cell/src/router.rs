use std::sync::Arc;

use axum::{
    extract::FromRef,
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{
    create_queue_entry, get_queue_entry, get_queue_view, record_payment, stream_all_queue_events,
    stream_queue_events, transition_queue_entry,
};
use crate::services::engine::QueueEngine;
use crate::services::notifier::QueueEventHub;

/// Handlers extract the engine or the event hub from it.
#[derive(Clone)]
pub struct QueueState {
    pub engine: Arc<QueueEngine>,
    pub events: QueueEventHub,
}

impl FromRef<QueueState> for Arc<QueueEngine> {
    fn from_ref(state: &QueueState) -> Self {
        Arc::clone(&state.engine)
    }
}

impl FromRef<QueueState> for QueueEventHub {
    fn from_ref(state: &QueueState) -> Self {
        state.events.clone()
    }
}

/// `events` must be the hub the engine publishes to.
pub fn queue_routes(
    config: Arc<AppConfig>,
    engine: Arc<QueueEngine>,
    events: QueueEventHub,
) -> Router {
    let protected_routes = Router::new()
        .route("/entries", post(create_queue_entry))
        .route("/entries/{entry_id}", get(get_queue_entry))
        .route("/entries/{entry_id}/transitions", post(transition_queue_entry))
        .route("/entries/{entry_id}/payment", post(record_payment))
        .route("/doctors/{doctor_id}/days/{day}", get(get_queue_view))
        .route("/doctors/{doctor_id}/days/{day}/events", get(stream_queue_events))
        .route("/events", get(stream_all_queue_events))
        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(QueueState { engine, events })
}
