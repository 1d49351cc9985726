use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AvailabilityQuery, BulkCreateSlotsRequest, CreateSlotRequest, DeleteOutcome, ProviderSlotsQuery,
    UpdateSlotRequest,
};
use crate::router::SlotState;

// ==============================================================================
// PROVIDER HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_slot(
    State(state): State<SlotState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateSlotRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let slot = state.service.create_slot(&user, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "slot": slot,
            "message": "Slot created successfully"
        })),
    ))
}

#[axum::debug_handler]
pub async fn bulk_create_slots(
    State(state): State<SlotState>,
    Extension(user): Extension<User>,
    Json(request): Json<BulkCreateSlotsRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let slots = state.service.bulk_create_slots(&user, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "count": slots.len(),
            "slots": slots
        })),
    ))
}

#[axum::debug_handler]
pub async fn update_slot(
    State(state): State<SlotState>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<UpdateSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let slot = state.service.update_slot(&user, slot_id, request).await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot,
        "message": "Slot updated successfully"
    })))
}

#[axum::debug_handler]
pub async fn delete_slot(
    State(state): State<SlotState>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.service.delete_slot(&user, slot_id).await?;

    let message = match outcome {
        DeleteOutcome::Deactivated => "Slot has bookings and was deactivated",
        DeleteOutcome::Deleted => "Slot deleted",
    };
    Ok(Json(json!({
        "success": true,
        "outcome": outcome,
        "message": message
    })))
}

#[axum::debug_handler]
pub async fn list_my_slots(
    State(state): State<SlotState>,
    Extension(user): Extension<User>,
    Query(query): Query<ProviderSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state.service.list_provider_slots(&user, query).await?;

    Ok(Json(json!({
        "success": true,
        "count": slots.len(),
        "slots": slots
    })))
}

// ==============================================================================
// SHARED READ HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_slot(
    State(state): State<SlotState>,
    Extension(_user): Extension<User>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let slot = state.service.get_slot(slot_id).await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<SlotState>,
    Extension(_user): Extension<User>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state.availability.find_available(&query).await?;

    Ok(Json(json!({
        "success": true,
        "count": slots.len(),
        "slots": slots
    })))
}
