use axum::{routing::get, Router};

use slot_cell::{slot_routes, SlotState};

pub fn create_router(slots: SlotState) -> Router {
    Router::new()
        .route("/", get(|| async { "CareSlot API is running!" }))
        .nest("/slots", slot_routes(slots))
}
