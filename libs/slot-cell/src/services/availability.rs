// libs/slot-cell/src/services/availability.rs
use std::sync::Arc;

use tracing::{debug, instrument};

use shared_models::error::FieldError;

use crate::error::SlotError;
use crate::models::{AvailabilityQuery, AvailableSlot, AvailableWindow, EntityType, Slot, SlotFilter};
use crate::store::SlotStore;
use crate::time::{parse_slot_date, time_to_minutes, MinuteSpan};

/// Read-only view of bookable capacity. Runs without a transaction and
/// reflects whatever the store has committed at read time.
pub struct AvailabilityService {
    store: Arc<dyn SlotStore>,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn find_available(&self, query: &AvailabilityQuery) -> Result<Vec<AvailableSlot>, SlotError> {
        let (filter, range) = parse_query(query)?;

        let slots = self.store.find(&filter).await?;
        let available: Vec<AvailableSlot> = slots
            .iter()
            .filter_map(|slot| available_windows(slot, range.as_ref()))
            .collect();

        debug!(
            "{} of {} active slot(s) have open windows",
            available.len(),
            slots.len()
        );
        Ok(available)
    }
}

fn parse_query(query: &AvailabilityQuery) -> Result<(SlotFilter, Option<MinuteSpan>), SlotError> {
    let mut errors = Vec::new();

    let entity_type = match query.entity_type.as_deref() {
        Some(raw) => match raw.parse::<EntityType>() {
            Ok(t) => Some(t),
            Err(e) => {
                errors.push(FieldError::new("entity_type", e));
                None
            }
        },
        None => None,
    };

    let date = match query.date.as_deref() {
        Some(raw) => {
            let parsed = parse_slot_date(raw);
            if parsed.is_none() {
                errors.push(FieldError::new("date", "must be a YYYY-MM-DD date or RFC 3339 timestamp"));
            }
            parsed
        }
        None => None,
    };

    for (name, value) in [("start_time", &query.start_time), ("end_time", &query.end_time)] {
        if let Some(raw) = value {
            if time_to_minutes(raw).is_none() {
                errors.push(FieldError::new(name, "must be a 24-hour HH:MM time"));
            }
        }
    }

    let range = match (&query.start_time, &query.end_time) {
        (Some(start), Some(end)) if errors.is_empty() => {
            let span = MinuteSpan::parse(start, end);
            if span.is_none() {
                errors.push(FieldError::new("end_time", "must be after start_time"));
            }
            span
        }
        // A lone bound does not narrow the search.
        _ => None,
    };

    if !errors.is_empty() {
        return Err(SlotError::Validation(errors));
    }

    let filter = SlotFilter {
        provider_id: query.provider_id,
        location_id: query.location_id,
        entity_type,
        date,
        active_only: true,
    };
    Ok((filter, range))
}

/// Open windows of an active slot that fall in `range`, or `None` when nothing is left.
fn available_windows(slot: &Slot, range: Option<&MinuteSpan>) -> Option<AvailableSlot> {
    if !slot.is_active {
        return None;
    }

    let windows: Vec<AvailableWindow> = slot
        .windows()
        .iter()
        .filter(|w| w.remaining_capacity() > 0)
        .filter(|w| match (range, w.span()) {
            (Some(range), Some(span)) => span.overlaps(range),
            (Some(_), None) => false,
            (None, _) => true,
        })
        .map(AvailableWindow::from)
        .collect();

    if windows.is_empty() {
        return None;
    }

    Some(AvailableSlot {
        slot_id: slot.id,
        provider_id: slot.provider_id,
        location_id: slot.location_id,
        entity_type: slot.entity_type,
        date: slot.date,
        mode: slot.shape.mode().to_string(),
        windows,
    })
}
