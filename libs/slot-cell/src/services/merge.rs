// libs/slot-cell/src/services/merge.rs
use std::collections::{HashMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use crate::error::SlotError;
use crate::models::{Slot, SlotShape, Window, WindowKey};
use crate::services::overlap::{first_self_overlap, spans};
use crate::services::validation::{SlotPatch, WindowSpec};
use crate::time::{day_start, MinuteSpan};

/// Applies a validated patch to the stored slot, protecting booked capacity.
/// Returns the next revision; overlap with other slots is checked by the caller.
pub fn apply_patch(current: &Slot, patch: &SlotPatch, updated_by: Uuid) -> Result<Slot, SlotError> {
    let mut next = current.clone();

    if let Some(specs) = &patch.time_slots {
        next.shape = SlotShape::MultiWindow {
            time_slots: merge_windows(current.windows(), specs)?,
        };
    } else if patch.touches_legacy_range() {
        next.shape = SlotShape::Legacy(patch_legacy(current, patch)?);
    }

    if let Some(date) = patch.date {
        next.date = day_start(date);
    }
    if let Some(is_active) = patch.is_active {
        next.is_active = is_active;
    }
    if let Some(days) = patch.advance_booking_days {
        next.advance_booking_days = days;
    }
    if let Some(metadata) = &patch.metadata {
        next.metadata = metadata.clone();
    }

    next.updated_by = updated_by;
    next.updated_at = Utc::now();
    Ok(next)
}

/// Replaces the window list. Booked counts follow windows by their exact time
/// range; a window that still holds bookings cannot be removed or shrunk below them.
fn merge_windows(existing: &[Window], specs: &[WindowSpec]) -> Result<Vec<Window>, SlotError> {
    let booked_by_key: HashMap<WindowKey, u32> = existing.iter().map(|w| (w.key(), w.booked)).collect();

    let mut merged = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        let key = WindowKey {
            start_time: spec.start_time.clone(),
            end_time: spec.end_time.clone(),
        };
        let booked = spec
            .booked
            .or_else(|| booked_by_key.get(&key).copied())
            .unwrap_or(0);

        if spec.capacity < booked {
            return Err(SlotError::CapacityProtection(format!(
                "time_slots[{}] capacity {} is below the {} place(s) already booked in {}",
                i, spec.capacity, booked, key
            )));
        }

        merged.push(Window {
            start_time: spec.start_time.clone(),
            end_time: spec.end_time.clone(),
            capacity: spec.capacity,
            booked,
        });
    }

    let kept: HashSet<WindowKey> = merged.iter().map(Window::key).collect();
    if let Some(dropped) = existing.iter().find(|w| w.booked > 0 && !kept.contains(&w.key())) {
        return Err(SlotError::CapacityProtection(format!(
            "Window {} has {} booking(s) and cannot be removed",
            dropped.key(),
            dropped.booked
        )));
    }

    if let Some((a, b)) = first_self_overlap(&spans(&merged)) {
        return Err(SlotError::invalid(
            "time_slots",
            format!("windows {} and {} overlap", a, b),
        ));
    }

    Ok(merged)
}

fn patch_legacy(current: &Slot, patch: &SlotPatch) -> Result<Window, SlotError> {
    let SlotShape::Legacy(window) = &current.shape else {
        return Err(SlotError::invalid(
            "time_slots",
            "multi-window slots cannot be converted back to a single range; send time_slots instead",
        ));
    };

    let start_time = patch.start_time.clone().unwrap_or_else(|| window.start_time.clone());
    let end_time = patch.end_time.clone().unwrap_or_else(|| window.end_time.clone());
    let capacity = patch.capacity.unwrap_or(window.capacity);

    if MinuteSpan::parse(&start_time, &end_time).is_none() {
        return Err(SlotError::invalid("end_time", "must be after start_time"));
    }
    if capacity < window.booked {
        return Err(SlotError::CapacityProtection(format!(
            "Capacity {} is below the {} place(s) already booked",
            capacity, window.booked
        )));
    }

    Ok(Window {
        start_time,
        end_time,
        capacity,
        booked: window.booked,
    })
}
