use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::caller_context;

use crate::models::{AvailabilityQuery, DateSelector, UpdateSlotConfigurationRequest};
use crate::services::availability::AvailabilityService;

// ==============================================================================
// PUBLIC HANDLERS (NO AUTHENTICATION REQUIRED)
// ==============================================================================

#[axum::debug_handler]
pub async fn get_available_slots_public(
    State(service): State<Arc<AvailabilityService>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let selector = DateSelector::from_query(&query)?;
    let result = service.get_available_slots(doctor_id, &selector, None).await?;

    Ok(Json(json!(result)))
}

// ==============================================================================
// PROTECTED HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_slot_configuration(
    State(service): State<Arc<AvailabilityService>>,
    Path(doctor_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let (_, scope) = caller_context(&user)?;
    if !scope.allows_doctor(doctor_id) {
        return Err(AppError::Forbidden(
            "Not allowed to view this doctor's configuration".to_string(),
        ));
    }

    let config = service.get_slot_configuration(doctor_id, auth.token()).await?;

    Ok(Json(json!(config)))
}

#[axum::debug_handler]
pub async fn update_slot_configuration(
    State(service): State<Arc<AvailabilityService>>,
    Path(doctor_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateSlotConfigurationRequest>,
) -> Result<Json<Value>, AppError> {
    let (actor, scope) = caller_context(&user)?;

    if !scope.allows_doctor(doctor_id) {
        return Err(AppError::Forbidden(
            "Not allowed to modify this doctor's configuration".to_string(),
        ));
    }

    let config = service
        .update_slot_configuration(doctor_id, request, &actor, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "configuration": config,
        "message": "Slot configuration updated"
    })))
}
