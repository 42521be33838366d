use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::models::{QueueEvent, QueueKey};

pub type QueueEventSender = broadcast::Sender<String>;
pub type QueueEventReceiver = broadcast::Receiver<String>;

/// Receives an event after each committed queue write. Failures are logged
/// by the caller and never undo the write.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueNotifier: Send + Sync {
    async fn notify(&self, event: QueueEvent) -> Result<(), QueueError>;
}

/// Fan-out of queue events to live consoles, one channel per doctor and day
/// plus a global feed for monitoring.
#[derive(Clone)]
pub struct QueueEventHub {
    channels: Arc<RwLock<HashMap<QueueKey, QueueEventSender>>>,
    global_sender: QueueEventSender,
}

impl QueueEventHub {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(1000);

        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            global_sender,
        }
    }

    /// Joins one queue's channel. Channels nobody listens to any more are dropped first.
    pub async fn subscribe(&self, key: QueueKey) -> QueueEventReceiver {
        let mut channels = self.channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
        channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(100).0)
            .subscribe()
    }

    pub fn subscribe_global(&self) -> QueueEventReceiver {
        self.global_sender.subscribe()
    }
}

/// Messages from a subscription until its channel closes. A subscriber that
/// falls behind skips what it missed.
pub fn message_stream(receiver: QueueEventReceiver) -> impl Stream<Item = String> {
    stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(message) => return Some((message, receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Queue event subscriber lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

impl Default for QueueEventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueNotifier for QueueEventHub {
    async fn notify(&self, event: QueueEvent) -> Result<(), QueueError> {
        let key = QueueKey::new(event.doctor_id, event.service_day);
        let message = serde_json::to_string(&event)?;

        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(&key) {
                // No receivers left is not an error for the writer.
                if sender.send(message).is_err() {
                    debug!("No live subscribers for queue {}", key);
                }
            }
        }

        let global_message = serde_json::json!({
            "type": "queue_update",
            "queue": key.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
            "data": event
        })
        .to_string();

        if self.global_sender.send(global_message).is_err() {
            debug!("No global queue subscribers");
        }

        debug!("Published {} for queue entry {}", event.action, event.entry_id);
        Ok(())
    }
}
