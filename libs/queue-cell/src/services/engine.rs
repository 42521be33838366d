use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_models::Actor;

use crate::error::QueueError;
use crate::models::{
    CreateQueueEntryRequest, QueueAction, QueueEntry, QueueEvent, QueueFocus, QueueKey, QueueView,
};
use crate::services::notifier::QueueNotifier;
use crate::services::state_machine::{apply_action, initial_status};
use crate::services::store::{QueueStore, WriteOutcome};
use crate::services::view::{build_view, QueueViewCache};

pub struct QueueEngine {
    store: Arc<dyn QueueStore>,
    notifier: Arc<dyn QueueNotifier>,
    views: QueueViewCache,
}

impl QueueEngine {
    pub fn new(store: Arc<dyn QueueStore>, notifier: Arc<dyn QueueNotifier>) -> Self {
        Self {
            store,
            notifier,
            views: QueueViewCache::new(),
        }
    }

    pub async fn create_entry(
        &self,
        request: CreateQueueEntryRequest,
        actor: &Actor,
    ) -> Result<QueueEntry, QueueError> {
        request.validate()?;

        let now = Utc::now();
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            appointment_id: request.appointment_id,
            doctor_id: request.doctor_id,
            service_day: request.service_day,
            patient: request.patient,
            sequence_number: 0,
            status: initial_status(request.requires_payment),
            prescription: None,
            title: None,
            notes: None,
            booked_by: actor.id.to_string(),
            completed_by: None,
            updated_by: actor.id.to_string(),
            created_at: now,
            updated_at: now,
            called_at: None,
            consultation_started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        };

        let entry = self.store.insert(entry).await?;
        self.views.evict(entry.queue_key()).await;

        info!(
            "Queue entry {} created as #{} for doctor {} on {} by {}",
            entry.id, entry.sequence_number, entry.doctor_id, entry.service_day, actor
        );
        self.publish(&entry, "create");

        Ok(entry)
    }

    /// Applies `action` to the stored entry.
    ///
    /// The write only lands if the entry still has the status it was read
    /// with; otherwise the caller gets `InvalidQueueTransition` for the status
    /// actually stored.
    pub async fn transition(
        &self,
        entry_id: Uuid,
        action: QueueAction,
        actor: &Actor,
    ) -> Result<QueueEntry, QueueError> {
        let entry = self.get_entry(entry_id).await?;
        let updated = apply_action(&entry, &action, actor, Utc::now())?;

        let outcome = self.store.compare_and_set(entry.status, updated).await?;

        let updated = match outcome {
            WriteOutcome::Applied(updated) => updated,
            WriteOutcome::NotFound => return Err(QueueError::entry_not_found(entry_id)),
            WriteOutcome::Stale(actual) => {
                debug!(
                    "Queue entry {} moved from {} to {} before {}",
                    entry_id, entry.status, actual, action
                );
                return Err(QueueError::InvalidQueueTransition {
                    from: actual,
                    action: action.name().to_string(),
                });
            }
            WriteOutcome::ActiveConflict => {
                warn!(
                    "Clock-in of queue entry {} refused: doctor {} already has a patient in consultation",
                    entry_id, entry.doctor_id
                );
                return Err(QueueError::ConcurrentConsultationConflict);
            }
        };

        self.views.evict(updated.queue_key()).await;

        info!(
            "Queue entry {} {} -> {} ({}) by {}",
            entry_id, entry.status, updated.status, action, actor
        );
        self.publish(&updated, action.name());

        Ok(updated)
    }

    pub async fn get_entry(&self, entry_id: Uuid) -> Result<QueueEntry, QueueError> {
        self.store
            .get(entry_id)
            .await?
            .ok_or_else(|| QueueError::entry_not_found(entry_id))
    }

    pub async fn get_queue_view(
        &self,
        doctor_id: Uuid,
        service_day: NaiveDate,
        focus: Option<QueueFocus>,
    ) -> Result<QueueView, QueueError> {
        let key = QueueKey::new(doctor_id, service_day);

        if focus.is_some() {
            let entries = self.store.list_for_day(key).await?;
            return build_view(key, entries, focus);
        }

        if let Some(view) = self.views.get(key).await {
            debug!("Serving cached view for queue {}", key);
            return Ok(view);
        }

        let generation = self.views.generation(key).await;
        let entries = self.store.list_for_day(key).await?;
        let view = build_view(key, entries, None)?;
        self.views.put(key, generation, view.clone()).await;

        Ok(view)
    }

    fn publish(&self, entry: &QueueEntry, action: &str) {
        let notifier = Arc::clone(&self.notifier);
        let event = QueueEvent::from_entry(entry, action);

        tokio::spawn(async move {
            let entry_id = event.entry_id;
            if let Err(e) = notifier.notify(event).await {
                warn!("Failed to publish queue event for entry {}: {}", entry_id, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    use crate::models::{PatientSnapshot, QueueStatus};
    use crate::services::notifier::MockQueueNotifier;
    use crate::services::store::InMemoryQueueStore;
    use shared_models::ActorRole;

    fn request(doctor_id: Uuid) -> CreateQueueEntryRequest {
        CreateQueueEntryRequest {
            doctor_id,
            service_day: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            appointment_id: None,
            patient: PatientSnapshot {
                name: "Chidi Eze".to_string(),
                age: Some(41),
                gender: Some("male".to_string()),
                contact: None,
            },
            requires_payment: false,
        }
    }

    fn desk() -> Actor {
        Actor::new("desk-1", ActorRole::Receptionist)
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_the_write() {
        let (sent, mut received) = mpsc::unbounded_channel();
        let mut notifier = MockQueueNotifier::new();
        notifier.expect_notify().times(2).returning(move |event| {
            let _ = sent.send(event.action.clone());
            Err(QueueError::Storage("broker unavailable".to_string()))
        });

        let engine = QueueEngine::new(Arc::new(InMemoryQueueStore::new()), Arc::new(notifier));

        let entry = engine.create_entry(request(Uuid::new_v4()), &desk()).await.unwrap();
        let called = engine
            .transition(entry.id, QueueAction::Call, &desk())
            .await
            .unwrap();

        assert_eq!(called.status, QueueStatus::Called);
        assert_eq!(received.recv().await.as_deref(), Some("create"));
        assert_eq!(received.recv().await.as_deref(), Some("call"));
    }

    #[tokio::test]
    async fn rejected_transition_publishes_nothing() {
        let mut notifier = MockQueueNotifier::new();
        notifier.expect_notify().times(1).returning(|_| Ok(()));

        let engine = QueueEngine::new(Arc::new(InMemoryQueueStore::new()), Arc::new(notifier));
        let entry = engine.create_entry(request(Uuid::new_v4()), &desk()).await.unwrap();

        assert_matches!(
            engine.transition(entry.id, QueueAction::ClockIn, &desk()).await,
            Err(QueueError::InvalidQueueTransition { from: QueueStatus::Booked, .. })
        );

        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn cached_view_is_refreshed_after_writes() {
        let mut notifier = MockQueueNotifier::new();
        notifier.expect_notify().returning(|_| Ok(()));

        let engine = QueueEngine::new(Arc::new(InMemoryQueueStore::new()), Arc::new(notifier));
        let doctor_id = Uuid::new_v4();
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        let first = engine.create_entry(request(doctor_id), &desk()).await.unwrap();
        assert_eq!(engine.get_queue_view(doctor_id, day, None).await.unwrap().waiting_count, 1);

        engine.create_entry(request(doctor_id), &desk()).await.unwrap();
        assert_eq!(engine.get_queue_view(doctor_id, day, None).await.unwrap().waiting_count, 2);

        engine.transition(first.id, QueueAction::Call, &desk()).await.unwrap();
        engine.transition(first.id, QueueAction::ClockIn, &desk()).await.unwrap();

        let view = engine.get_queue_view(doctor_id, day, None).await.unwrap();
        assert_eq!(view.current.map(|entry| entry.id), Some(first.id));
        assert_eq!(view.waiting_count, 1);
    }
}
