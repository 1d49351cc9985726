use thiserror::Error;
use uuid::Uuid;

use shared_models::error::{AppError, FieldError};

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SlotError {
    #[error("Validation failed for {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    OverlapConflict(String),

    #[error("Slot {0} belongs to another provider")]
    Ownership(Uuid),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    CapacityProtection(String),

    #[error("Window {0} is fully booked")]
    WindowFull(String),

    #[error("Provider already has {limit} active slots on {date}")]
    LimitExceeded { limit: usize, date: String },

    #[error("Slot not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SlotError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        SlotError::Validation(vec![FieldError::new(field, message)])
    }

    /// Attributes an error to one item of a batch request.
    pub fn for_item(self, prefix: &str) -> Self {
        match self {
            SlotError::Validation(errors) => SlotError::Validation(
                errors
                    .into_iter()
                    .map(|e| FieldError::new(format!("{}{}", prefix, e.field), e.message))
                    .collect(),
            ),
            SlotError::Forbidden(message) => SlotError::Forbidden(format!("{}: {}", prefix.trim_end_matches('.'), message)),
            other => other,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SlotError::Store(e) if e.is_transient())
    }
}

impl From<SlotError> for AppError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::Validation(errors) => AppError::ValidationError(errors),
            SlotError::OverlapConflict(message) => AppError::Conflict {
                code: "SLOT_OVERLAP",
                message,
            },
            SlotError::CapacityProtection(message) => AppError::Conflict {
                code: "CAPACITY_PROTECTED",
                message,
            },
            e @ SlotError::WindowFull(_) => AppError::Conflict {
                code: "WINDOW_FULL",
                message: e.to_string(),
            },
            e @ SlotError::LimitExceeded { .. } => AppError::Conflict {
                code: "SLOT_LIMIT_EXCEEDED",
                message: e.to_string(),
            },
            e @ SlotError::Ownership(_) => AppError::Forbidden(e.to_string()),
            SlotError::Forbidden(message) => AppError::Forbidden(message),
            e @ SlotError::NotFound(_) => AppError::NotFound(e.to_string()),
            SlotError::Store(e) if e.is_transient() => AppError::Unavailable(e.to_string()),
            SlotError::Store(StoreError::DuplicateKey(_)) => AppError::Conflict {
                code: "SLOT_OVERLAP",
                message: "A slot with the same time range already exists".to_string(),
            },
            SlotError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}
