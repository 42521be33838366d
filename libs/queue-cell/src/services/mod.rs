pub mod engine;
pub mod notifier;
pub mod redis_store;
pub mod state_machine;
pub mod store;
pub mod view;

pub use engine::QueueEngine;
pub use notifier::{QueueEventHub, QueueNotifier};
pub use redis_store::RedisQueueStore;
pub use store::{InMemoryQueueStore, QueueStore, WriteOutcome};
