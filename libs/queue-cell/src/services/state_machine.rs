use chrono::{DateTime, Utc};

use shared_models::Actor;

use crate::error::QueueError;
use crate::models::{QueueAction, QueueEntry, QueueStatus};

pub fn initial_status(requires_payment: bool) -> QueueStatus {
    if requires_payment {
        QueueStatus::PaymentPending
    } else {
        QueueStatus::Booked
    }
}

/// The status `action` moves an entry to, or `InvalidQueueTransition` if the
/// action is not allowed from `from`.
pub fn next_status(from: QueueStatus, action: &QueueAction) -> Result<QueueStatus, QueueError> {
    use QueueStatus::*;

    if from.is_final() {
        return Err(QueueError::InvalidQueueTransition {
            from,
            action: action.name().to_string(),
        });
    }

    let to = match (from, action) {
        (PaymentPending, QueueAction::PaymentSucceeded) => Booked,
        (PaymentPending, QueueAction::PaymentFailed) => PaymentFailed,
        (Booked, QueueAction::Call) => Called,
        (Skipped, QueueAction::Recall) => Called,
        (Called, QueueAction::ClockIn) => InConsultation,
        (Booked | Called, QueueAction::Skip) => Skipped,
        (InConsultation, QueueAction::Complete { .. }) => Completed,
        (Booked | Called | Skipped, QueueAction::Cancel { .. }) => Cancelled,
        _ => {
            return Err(QueueError::InvalidQueueTransition {
                from,
                action: action.name().to_string(),
            })
        }
    };

    Ok(to)
}

/// Produces the updated entry for `action` without touching storage.
pub fn apply_action(
    entry: &QueueEntry,
    action: &QueueAction,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<QueueEntry, QueueError> {
    let status = next_status(entry.status, action)?;

    let mut updated = entry.clone();
    updated.status = status;
    updated.updated_by = actor.id.to_string();
    updated.updated_at = now;

    match action {
        QueueAction::Call | QueueAction::Recall => updated.called_at = Some(now),
        QueueAction::ClockIn => updated.consultation_started_at = Some(now),
        QueueAction::Complete {
            prescription,
            title,
            notes,
        } => {
            let prescription = non_blank(prescription);
            let title = non_blank(title);
            let notes = non_blank(notes);

            if prescription.is_none() && title.is_none() && notes.is_none() {
                return Err(QueueError::MissingConsultationOutcome);
            }

            updated.prescription = prescription;
            updated.title = title;
            updated.notes = notes;
            updated.completed_by = Some(actor.id.to_string());
            updated.completed_at = Some(now);
        }
        QueueAction::Cancel { reason } => {
            updated.cancellation_reason = non_blank(reason);
            updated.cancelled_at = Some(now);
        }
        QueueAction::PaymentSucceeded | QueueAction::PaymentFailed | QueueAction::Skip => {}
    }

    Ok(updated)
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
