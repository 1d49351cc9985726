// libs/slot-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::availability::AvailabilityService;
use crate::services::slots::SlotService;
use crate::store::{self, SlotStore};

#[derive(Clone)]
pub struct SlotState {
    pub config: Arc<AppConfig>,
    pub service: Arc<SlotService>,
    pub availability: Arc<AvailabilityService>,
}

impl SlotState {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn SlotStore>) -> Self {
        Self {
            service: Arc::new(SlotService::new(&config, Arc::clone(&store))),
            availability: Arc::new(AvailabilityService::new(store)),
            config,
        }
    }

    /// State over the store selected by configuration.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let store = store::from_config(&config);
        Self::new(config, store)
    }
}

pub fn slot_routes(state: SlotState) -> Router {
    // Every slot operation requires an authenticated caller
    Router::new()
        .route("/", post(handlers::create_slot))
        .route("/bulk", post(handlers::bulk_create_slots))
        .route("/availability", get(handlers::get_availability))
        .route("/mine", get(handlers::list_my_slots))
        .route(
            "/{slot_id}",
            get(handlers::get_slot)
                .put(handlers::update_slot)
                .delete(handlers::delete_slot),
        )
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
