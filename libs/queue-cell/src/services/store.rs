use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::QueueError;
use crate::models::{QueueEntry, QueueKey, QueueStatus};

/// Result of a compare-and-set write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Applied(QueueEntry),
    NotFound,
    /// The stored status no longer matches what the caller read.
    Stale(QueueStatus),
    /// Another entry of the same doctor and day is already in consultation.
    ActiveConflict,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persists a new entry, overwriting its `sequence_number` with the next
    /// value for its doctor and day.
    async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry, QueueError>;

    async fn get(&self, entry_id: Uuid) -> Result<Option<QueueEntry>, QueueError>;

    /// Every entry of the queue, ordered by sequence number.
    async fn list_for_day(&self, key: QueueKey) -> Result<Vec<QueueEntry>, QueueError>;

    /// Replaces the stored entry with `updated` if its status is still `expected`.
    ///
    /// Moving into `IN_CONSULTATION` is refused while any other entry of the
    /// same queue holds that status. The check and the write happen atomically.
    async fn compare_and_set(
        &self,
        expected: QueueStatus,
        updated: QueueEntry,
    ) -> Result<WriteOutcome, QueueError>;
}

#[derive(Default)]
struct InMemoryState {
    entries: HashMap<Uuid, QueueEntry>,
    sequences: HashMap<QueueKey, u32>,
}

/// Process-local store. Every write holds the single write lock.
#[derive(Default)]
pub struct InMemoryQueueStore {
    state: RwLock<InMemoryState>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, mut entry: QueueEntry) -> Result<QueueEntry, QueueError> {
        let mut state = self.state.write().await;

        if state.entries.contains_key(&entry.id) {
            return Err(QueueError::Storage(format!("queue entry {} already exists", entry.id)));
        }

        let sequence = state.sequences.entry(entry.queue_key()).or_insert(0);
        *sequence += 1;
        entry.sequence_number = *sequence;

        state.entries.insert(entry.id, entry.clone());
        debug!("Stored queue entry {} as #{}", entry.id, entry.sequence_number);

        Ok(entry)
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        let state = self.state.read().await;
        Ok(state.entries.get(&entry_id).cloned())
    }

    async fn list_for_day(&self, key: QueueKey) -> Result<Vec<QueueEntry>, QueueError> {
        let state = self.state.read().await;
        let mut entries: Vec<QueueEntry> = state
            .entries
            .values()
            .filter(|entry| entry.queue_key() == key)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.sequence_number);
        Ok(entries)
    }

    async fn compare_and_set(
        &self,
        expected: QueueStatus,
        updated: QueueEntry,
    ) -> Result<WriteOutcome, QueueError> {
        let mut state = self.state.write().await;

        let current = match state.entries.get(&updated.id) {
            Some(entry) => entry.status,
            None => return Ok(WriteOutcome::NotFound),
        };

        if current != expected {
            return Ok(WriteOutcome::Stale(current));
        }

        if updated.status == QueueStatus::InConsultation && expected != QueueStatus::InConsultation {
            let key = updated.queue_key();
            let occupied = state.entries.values().any(|entry| {
                entry.id != updated.id
                    && entry.status == QueueStatus::InConsultation
                    && entry.queue_key() == key
            });
            if occupied {
                return Ok(WriteOutcome::ActiveConflict);
            }
        }

        state.entries.insert(updated.id, updated.clone());
        Ok(WriteOutcome::Applied(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    use crate::models::PatientSnapshot;

    fn entry(key: QueueKey, status: QueueStatus) -> QueueEntry {
        let now = Utc::now();
        QueueEntry {
            id: Uuid::new_v4(),
            appointment_id: None,
            doctor_id: key.doctor_id,
            service_day: key.service_day,
            patient: PatientSnapshot {
                name: "Walk-in".to_string(),
                age: None,
                gender: None,
                contact: None,
            },
            sequence_number: 0,
            status,
            prescription: None,
            title: None,
            notes: None,
            booked_by: "desk".to_string(),
            completed_by: None,
            updated_by: "desk".to_string(),
            created_at: now,
            updated_at: now,
            called_at: None,
            consultation_started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    fn key() -> QueueKey {
        QueueKey::new(Uuid::new_v4(), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())
    }

    #[tokio::test]
    async fn sequences_are_per_doctor_and_day() {
        let store = InMemoryQueueStore::new();
        let monday = key();
        let tuesday = QueueKey::new(monday.doctor_id, monday.service_day.succ_opt().unwrap());

        let first = store.insert(entry(monday, QueueStatus::Booked)).await.unwrap();
        let second = store.insert(entry(monday, QueueStatus::Booked)).await.unwrap();
        let other_day = store.insert(entry(tuesday, QueueStatus::Booked)).await.unwrap();

        assert_eq!(first.sequence_number, 1);
        assert_eq!(second.sequence_number, 2);
        assert_eq!(other_day.sequence_number, 1);

        let listed = store.list_for_day(monday).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
    }

    #[tokio::test]
    async fn stale_expected_status_is_reported() {
        let store = InMemoryQueueStore::new();
        let stored = store.insert(entry(key(), QueueStatus::Booked)).await.unwrap();

        let mut updated = stored.clone();
        updated.status = QueueStatus::InConsultation;

        let outcome = store.compare_and_set(QueueStatus::Called, updated).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Stale(QueueStatus::Booked));
        assert_eq!(store.get(stored.id).await.unwrap().unwrap().status, QueueStatus::Booked);
    }

    #[tokio::test]
    async fn second_active_consultation_is_refused() {
        let store = InMemoryQueueStore::new();
        let queue = key();
        let first = store.insert(entry(queue, QueueStatus::Called)).await.unwrap();
        let second = store.insert(entry(queue, QueueStatus::Called)).await.unwrap();

        let mut active = first.clone();
        active.status = QueueStatus::InConsultation;
        assert!(matches!(
            store.compare_and_set(QueueStatus::Called, active).await.unwrap(),
            WriteOutcome::Applied(_)
        ));

        let mut blocked = second.clone();
        blocked.status = QueueStatus::InConsultation;
        assert_eq!(
            store.compare_and_set(QueueStatus::Called, blocked).await.unwrap(),
            WriteOutcome::ActiveConflict
        );
    }

    #[tokio::test]
    async fn missing_entry_is_reported() {
        let store = InMemoryQueueStore::new();
        let outcome = store
            .compare_and_set(QueueStatus::Booked, entry(key(), QueueStatus::Called))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::NotFound);
    }
}
