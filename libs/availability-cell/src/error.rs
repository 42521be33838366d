use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("No slot configuration found for doctor {0}")]
    ConfigurationMissing(Uuid),

    #[error("Invalid date format '{0}', expected YYYY-MM-DD")]
    InvalidDateFormat(String),

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("Either 'dates' or both 'from' and 'to' must be provided")]
    MissingDateSelector,

    #[error("Invalid slot configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Stored slot configuration for doctor {doctor_id} is unusable: {reason}")]
    CorruptConfiguration { doctor_id: Uuid, reason: String },

    #[error("Schedule storage error: {0}")]
    Repository(String),
}

impl From<anyhow::Error> for AvailabilityError {
    fn from(err: anyhow::Error) -> Self {
        AvailabilityError::Repository(err.to_string())
    }
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::ConfigurationMissing(_) => AppError::NotFound(err.to_string()),
            AvailabilityError::InvalidDateFormat(_)
            | AvailabilityError::InvalidDateRange(_)
            | AvailabilityError::MissingDateSelector => AppError::BadRequest(err.to_string()),
            AvailabilityError::InvalidConfiguration(_) => AppError::ValidationError(err.to_string()),
            AvailabilityError::CorruptConfiguration { .. } => AppError::Internal(err.to_string()),
            AvailabilityError::Repository(msg) => AppError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn request_and_storage_faults_map_to_different_statuses() {
        let rejected: AppError = AvailabilityError::InvalidConfiguration("duration".to_string()).into();
        assert_eq!(rejected.status_code().as_u16(), 400);

        let corrupt: AppError = AvailabilityError::CorruptConfiguration {
            doctor_id: Uuid::new_v4(),
            reason: "duration".to_string(),
        }
        .into();
        assert_matches!(corrupt, AppError::Internal(_));
        assert_eq!(corrupt.status_code().as_u16(), 500);
    }
}
