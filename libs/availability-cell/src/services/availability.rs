use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::Actor;

use crate::error::AvailabilityError;
use crate::models::{
    AvailabilityResult, DateSelector, SlotConfiguration, UpdateSlotConfigurationRequest,
};
use crate::services::engine::compute_availability;
use crate::services::repository::{ScheduleRepository, SupabaseScheduleRepository};

pub struct AvailabilityService {
    repository: Arc<dyn ScheduleRepository>,
    max_range_days: u32,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            repository: Arc::new(SupabaseScheduleRepository::new(config)),
            max_range_days: config.max_availability_range_days,
        }
    }

    pub fn with_repository(repository: Arc<dyn ScheduleRepository>, max_range_days: u32) -> Self {
        Self {
            repository,
            max_range_days,
        }
    }

    /// Available slots for every selected day.
    ///
    /// The selector is resolved before any storage access so malformed input
    /// never reaches the database.
    pub async fn get_available_slots(
        &self,
        doctor_id: Uuid,
        selector: &DateSelector,
        auth_token: Option<&str>,
    ) -> Result<AvailabilityResult, AvailabilityError> {
        let dates = selector.resolve(self.max_range_days)?;

        let config = self
            .repository
            .get_slot_configuration(doctor_id, auth_token)
            .await?
            .ok_or(AvailabilityError::ConfigurationMissing(doctor_id))?;

        let (first, last) = match (dates.iter().min(), dates.iter().max()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(AvailabilityError::MissingDateSelector),
        };

        // Local days can start up to a day either side of UTC midnight.
        let appointments = self
            .repository
            .get_appointments(
                doctor_id,
                start_of_day(first - Duration::days(1)),
                start_of_day(last + Duration::days(2)),
                auth_token,
            )
            .await?;

        debug!(
            "Computing availability for doctor {} over {} dates with {} appointments",
            doctor_id,
            dates.len(),
            appointments.len()
        );

        let result = compute_availability(&config, &dates, &appointments)?;

        info!(
            "Doctor {} has {} available slots across {} dates",
            doctor_id, result.summary.total_available_slots, result.summary.total_dates
        );

        Ok(result)
    }

    pub async fn get_slot_configuration(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<SlotConfiguration, AvailabilityError> {
        self.repository
            .get_slot_configuration(doctor_id, Some(auth_token))
            .await?
            .ok_or(AvailabilityError::ConfigurationMissing(doctor_id))
    }

    pub async fn update_slot_configuration(
        &self,
        doctor_id: Uuid,
        request: UpdateSlotConfigurationRequest,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<SlotConfiguration, AvailabilityError> {
        let config = request.into_configuration(doctor_id, &actor.id);

        if let Err(e) = config.validate() {
            warn!("Rejected slot configuration for doctor {}: {}", doctor_id, e);
            return Err(e);
        }

        let saved = self.repository.save_slot_configuration(&config, auth_token).await?;
        info!("Slot configuration for doctor {} updated by {}", doctor_id, actor);

        Ok(saved)
    }
}

fn start_of_day(date: NaiveDate) -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}
