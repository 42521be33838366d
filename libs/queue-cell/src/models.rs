use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

// ==============================================================================
// STATUS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    PaymentPending,
    PaymentFailed,
    Booked,
    Called,
    InConsultation,
    Skipped,
    Cancelled,
    Completed,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 8] = [
        QueueStatus::PaymentPending,
        QueueStatus::PaymentFailed,
        QueueStatus::Booked,
        QueueStatus::Called,
        QueueStatus::InConsultation,
        QueueStatus::Skipped,
        QueueStatus::Cancelled,
        QueueStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::PaymentPending => "PAYMENT_PENDING",
            QueueStatus::PaymentFailed => "PAYMENT_FAILED",
            QueueStatus::Booked => "BOOKED",
            QueueStatus::Called => "CALLED",
            QueueStatus::InConsultation => "IN_CONSULTATION",
            QueueStatus::Skipped => "SKIPPED",
            QueueStatus::Cancelled => "CANCELLED",
            QueueStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Cancelled)
    }

    /// Terminal states plus `PAYMENT_FAILED`, which has no way out either.
    pub fn is_final(&self) -> bool {
        self.is_terminal() || *self == QueueStatus::PaymentFailed
    }

    /// Entries still waiting to be seen.
    pub fn is_waiting(&self) -> bool {
        matches!(self, QueueStatus::Booked | QueueStatus::Called | QueueStatus::Skipped)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// ENTRY
// ==============================================================================

/// Patient details captured at booking time. Later profile edits do not touch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSnapshot {
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub doctor_id: Uuid,
    pub service_day: NaiveDate,
    pub patient: PatientSnapshot,
    /// Assigned by the store; strictly increasing per doctor and service day.
    pub sequence_number: u32,
    pub status: QueueStatus,
    pub prescription: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub booked_by: String,
    pub completed_by: Option<String>,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub consultation_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl QueueEntry {
    pub fn queue_key(&self) -> QueueKey {
        QueueKey::new(self.doctor_id, self.service_day)
    }
}

/// A single doctor's queue on one service day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub doctor_id: Uuid,
    pub service_day: NaiveDate,
}

impl QueueKey {
    pub fn new(doctor_id: Uuid, service_day: NaiveDate) -> Self {
        Self {
            doctor_id,
            service_day,
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.doctor_id, self.service_day)
    }
}

// ==============================================================================
// ACTIONS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QueueAction {
    PaymentSucceeded,
    PaymentFailed,
    Call,
    ClockIn,
    Skip,
    Recall,
    Complete {
        #[serde(default)]
        prescription: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        notes: Option<String>,
    },
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl QueueAction {
    pub fn name(&self) -> &'static str {
        match self {
            QueueAction::PaymentSucceeded => "payment_succeeded",
            QueueAction::PaymentFailed => "payment_failed",
            QueueAction::Call => "call",
            QueueAction::ClockIn => "clock_in",
            QueueAction::Skip => "skip",
            QueueAction::Recall => "recall",
            QueueAction::Complete { .. } => "complete",
            QueueAction::Cancel { .. } => "cancel",
        }
    }
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQueueEntryRequest {
    pub doctor_id: Uuid,
    pub service_day: NaiveDate,
    #[serde(default)]
    pub appointment_id: Option<Uuid>,
    pub patient: PatientSnapshot,
    #[serde(default)]
    pub requires_payment: bool,
}

impl CreateQueueEntryRequest {
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.patient.name.trim().is_empty() {
            return Err(QueueError::ValidationError(
                "patient name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCallback {
    pub succeeded: bool,
}

impl PaymentCallback {
    pub fn into_action(self) -> QueueAction {
        if self.succeeded {
            QueueAction::PaymentSucceeded
        } else {
            QueueAction::PaymentFailed
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueViewQuery {
    pub focus_sequence: Option<u32>,
    pub focus_entry: Option<Uuid>,
}

impl QueueViewQuery {
    pub fn focus(&self) -> Result<Option<QueueFocus>, QueueError> {
        match (self.focus_sequence, self.focus_entry) {
            (Some(_), Some(_)) => Err(QueueError::ValidationError(
                "use either focus_sequence or focus_entry, not both".to_string(),
            )),
            (Some(sequence), None) => Ok(Some(QueueFocus::Sequence(sequence))),
            (None, Some(entry_id)) => Ok(Some(QueueFocus::Entry(entry_id))),
            (None, None) => Ok(None),
        }
    }
}

// ==============================================================================
// READ MODEL
// ==============================================================================

/// Pins `current` to a specific entry instead of whoever is in consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFocus {
    Sequence(u32),
    Entry(Uuid),
}

impl QueueFocus {
    pub fn matches(&self, entry: &QueueEntry) -> bool {
        match self {
            QueueFocus::Sequence(sequence) => entry.sequence_number == *sequence,
            QueueFocus::Entry(id) => entry.id == *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueView {
    pub doctor_id: Uuid,
    pub service_day: NaiveDate,
    pub previous: Vec<QueueEntry>,
    pub current: Option<QueueEntry>,
    pub next: Vec<QueueEntry>,
    pub waiting_count: usize,
    /// The entry actually in consultation, when a focus has taken its place in `current`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_consultation: Option<QueueEntry>,
}

/// Published after every committed write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub entry_id: Uuid,
    pub doctor_id: Uuid,
    pub service_day: NaiveDate,
    pub sequence_number: u32,
    pub status: QueueStatus,
    pub action: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

impl QueueEvent {
    pub fn from_entry(entry: &QueueEntry, action: &str) -> Self {
        Self {
            entry_id: entry.id,
            doctor_id: entry.doctor_id,
            service_day: entry.service_day,
            sequence_number: entry.sequence_number,
            status: entry.status,
            action: action.to_string(),
            actor: entry.updated_by.clone(),
            timestamp: entry.updated_at,
        }
    }
}
