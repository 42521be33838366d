use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use availability_cell::AvailabilityService;
use queue_cell::{InMemoryQueueStore, QueueEngine, QueueEventHub, QueueStore, RedisQueueStore};
use shared_config::AppConfig;

async fn queue_store(config: &AppConfig) -> anyhow::Result<Arc<dyn QueueStore>> {
    match config.redis_url.as_deref() {
        Some(url) => {
            let store = RedisQueueStore::new(url)
                .await
                .context("Failed to connect the Redis queue store")?;
            info!("Queue entries stored in Redis");
            Ok(Arc::new(store))
        }
        None => {
            info!("Queue entries kept in process memory");
            Ok(Arc::new(InMemoryQueueStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic scheduling API server");

    let config = Arc::new(AppConfig::from_env());

    let availability = Arc::new(AvailabilityService::new(&config));
    let queue_events = QueueEventHub::new();
    let queue = Arc::new(QueueEngine::new(
        queue_store(&config).await?,
        Arc::new(queue_events.clone()),
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router::create_router(config.clone(), availability, queue, queue_events)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
