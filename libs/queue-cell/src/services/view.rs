use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::QueueError;
use crate::models::{QueueEntry, QueueFocus, QueueKey, QueueStatus, QueueView};

/// Splits one day's entries into previous / current / next.
///
/// `entries` must be ordered by sequence number. With a focus, `current` is the
/// focused entry as stored and it is left out of the other partitions; the
/// entry it displaced from `current` moves to `in_consultation`.
pub fn build_view(
    key: QueueKey,
    entries: Vec<QueueEntry>,
    focus: Option<QueueFocus>,
) -> Result<QueueView, QueueError> {
    let mut previous = Vec::new();
    let mut current = None;
    let mut next = Vec::new();
    let mut focused = None;

    for entry in entries {
        if focus.is_some_and(|focus| focus.matches(&entry)) {
            focused = Some(entry);
            continue;
        }

        if entry.status.is_terminal() {
            previous.push(entry);
        } else if entry.status == QueueStatus::InConsultation {
            current = Some(entry);
        } else if entry.status.is_waiting() {
            next.push(entry);
        }
    }

    let mut in_consultation = None;
    if let Some(focus) = focus {
        let entry = focused.ok_or_else(|| match focus {
            QueueFocus::Sequence(sequence) => {
                QueueError::EntryNotFound(format!("#{} in queue {}", sequence, key))
            }
            QueueFocus::Entry(id) => QueueError::entry_not_found(id),
        })?;
        in_consultation = current.replace(entry);
    }

    Ok(QueueView {
        doctor_id: key.doctor_id,
        service_day: key.service_day,
        waiting_count: next.len(),
        previous,
        current,
        next,
        in_consultation,
    })
}

#[derive(Default)]
struct CachedQueue {
    generation: u64,
    view: Option<QueueView>,
}

/// Unfocused views per doctor and day.
///
/// Every write bumps the queue's generation; a view computed before the bump
/// is never stored.
#[derive(Default)]
pub struct QueueViewCache {
    queues: RwLock<HashMap<QueueKey, CachedQueue>>,
}

impl QueueViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: QueueKey) -> Option<QueueView> {
        let queues = self.queues.read().await;
        queues.get(&key).and_then(|cached| cached.view.clone())
    }

    /// Generation to pass to [`QueueViewCache::put`] once the view is built.
    pub async fn generation(&self, key: QueueKey) -> u64 {
        let queues = self.queues.read().await;
        queues.get(&key).map_or(0, |cached| cached.generation)
    }

    pub async fn put(&self, key: QueueKey, generation: u64, view: QueueView) {
        let mut queues = self.queues.write().await;
        let cached = queues.entry(key).or_default();
        if cached.generation == generation {
            cached.view = Some(view);
        }
    }

    pub async fn evict(&self, key: QueueKey) {
        let mut queues = self.queues.write().await;
        let cached = queues.entry(key).or_default();
        cached.generation += 1;
        cached.view = None;
    }
}
