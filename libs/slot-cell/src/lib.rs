pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;
pub mod time;

pub use error::SlotError;
pub use models::*;
pub use router::{slot_routes, SlotState};
pub use services::availability::AvailabilityService;
pub use services::slots::SlotService;
pub use store::{SlotStore, SlotTransaction, StoreError};
