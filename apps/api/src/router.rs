use std::sync::Arc;

use axum::{routing::get, Router};

use availability_cell::{availability_routes, AvailabilityService};
use queue_cell::{queue_routes, QueueEngine, QueueEventHub};
use shared_config::AppConfig;

pub fn create_router(
    config: Arc<AppConfig>,
    availability: Arc<AvailabilityService>,
    queue: Arc<QueueEngine>,
    queue_events: QueueEventHub,
) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest("/availability", availability_routes(config.clone(), availability))
        .nest("/queue", queue_routes(config, queue, queue_events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use queue_cell::InMemoryQueueStore;
    use tower::ServiceExt;

    fn app() -> Router {
        let config = Arc::new(AppConfig::default());
        let availability = Arc::new(AvailabilityService::new(&config));
        let events = QueueEventHub::new();
        let queue = Arc::new(QueueEngine::new(
            Arc::new(InMemoryQueueStore::new()),
            Arc::new(events.clone()),
        ));
        create_router(config, availability, queue, events)
    }

    #[tokio::test]
    async fn root_reports_liveness() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cells_are_mounted_under_their_prefixes() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/queue/entries/00000000-0000-0000-0000-000000000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/availability/doctors/00000000-0000-0000-0000-000000000000/slots")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
