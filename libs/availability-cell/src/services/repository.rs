use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::Appointment;

use crate::error::AvailabilityError;
use crate::models::SlotConfiguration;

const SLOT_CONFIGURATIONS: &str = "/rest/v1/doctor_slot_configurations";
const APPOINTMENTS: &str = "/rest/v1/appointments";

/// Storage the availability service reads slot configurations and bookings from.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn get_slot_configuration(
        &self,
        doctor_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Option<SlotConfiguration>, AvailabilityError>;

    async fn save_slot_configuration(
        &self,
        config: &SlotConfiguration,
        auth_token: &str,
    ) -> Result<SlotConfiguration, AvailabilityError>;

    /// Non-cancelled appointments for the doctor with `from <= date < to`.
    async fn get_appointments(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, AvailabilityError>;
}

pub struct SupabaseScheduleRepository {
    supabase: SupabaseClient,
}

impl SupabaseScheduleRepository {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }
}

#[async_trait]
impl ScheduleRepository for SupabaseScheduleRepository {
    async fn get_slot_configuration(
        &self,
        doctor_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Option<SlotConfiguration>, AvailabilityError> {
        debug!("Fetching slot configuration for doctor: {}", doctor_id);

        let path = format!("{}?doctor_id=eq.{}&limit=1", SLOT_CONFIGURATIONS, doctor_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await?;

        match result.into_iter().next() {
            Some(row) => {
                let corrupt = |reason: String| {
                    warn!("Slot configuration for doctor {} is unusable: {}", doctor_id, reason);
                    AvailabilityError::CorruptConfiguration { doctor_id, reason }
                };

                let config: SlotConfiguration =
                    serde_json::from_value(row).map_err(|e| corrupt(e.to_string()))?;
                config.validate().map_err(|e| corrupt(e.to_string()))?;

                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    async fn save_slot_configuration(
        &self,
        config: &SlotConfiguration,
        auth_token: &str,
    ) -> Result<SlotConfiguration, AvailabilityError> {
        debug!("Saving slot configuration for doctor: {}", config.doctor_id);

        let body = serde_json::to_value(config)
            .map_err(|e| AvailabilityError::Repository(e.to_string()))?;
        let path = format!("{}?on_conflict=doctor_id", SLOT_CONFIGURATIONS);

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                &path,
                Some(auth_token),
                Some(body),
                Some(SupabaseClient::upsert_representation()),
            )
            .await?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::Repository("Failed to save slot configuration".to_string()))?;

        serde_json::from_value(row).map_err(|e| AvailabilityError::Repository(e.to_string()))
    }

    async fn get_appointments(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, AvailabilityError> {
        let path = format!(
            "{}?doctor_id=eq.{}&date=gte.{}&date=lt.{}&status=neq.cancelled&order=date.asc",
            APPOINTMENTS,
            doctor_id,
            from.to_rfc3339_opts(SecondsFormat::Secs, true),
            to.to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await?;

        let appointments = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AvailabilityError::Repository(format!("malformed appointment row: {}", e)))?;

        debug!("Found {} appointments for doctor {}", appointments.len(), doctor_id);
        Ok(appointments)
    }
}
