use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::availability::AvailabilityService;

pub fn availability_routes(config: Arc<AppConfig>, service: Arc<AvailabilityService>) -> Router {
    let public_routes = Router::new().route(
        "/doctors/{doctor_id}/slots",
        get(handlers::get_available_slots_public),
    );

    let protected_routes = Router::new()
        .route(
            "/doctors/{doctor_id}/configuration",
            get(handlers::get_slot_configuration).put(handlers::update_slot_configuration),
        )
        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(service)
}
