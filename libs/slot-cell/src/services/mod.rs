pub mod access;
pub mod availability;
pub mod merge;
pub mod overlap;
pub mod slots;
pub mod transaction;
pub mod validation;
