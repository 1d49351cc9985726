//! Request validation. Every check runs even after an earlier one fails so that
//! clients get the complete list of offending fields in one response.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use shared_models::error::FieldError;

use crate::models::{CreateSlotRequest, EntityType, SlotShape, UpdateSlotRequest, Window, WindowInput};
use crate::services::overlap::first_self_overlap;
use crate::time::{parse_slot_date, time_to_minutes, MinuteSpan};

/// Ten years; also keeps the value inside the `integer` column.
pub const MAX_ADVANCE_BOOKING_DAYS: u32 = 3650;

/// A window as the client described it. `booked` is only honoured on update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub start_time: String,
    pub end_time: String,
    pub capacity: u32,
    pub booked: Option<u32>,
}

impl WindowSpec {
    pub fn span(&self) -> Option<MinuteSpan> {
        MinuteSpan::parse(&self.start_time, &self.end_time)
    }
}

/// A validated create request.
#[derive(Debug, Clone)]
pub struct SlotDraft {
    pub entity_type: EntityType,
    pub date: NaiveDate,
    pub shape: SlotShape,
    pub advance_booking_days: u32,
    pub metadata: Map<String, Value>,
}

/// A validated update request.
#[derive(Debug, Clone, Default)]
pub struct SlotPatch {
    pub date: Option<NaiveDate>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub capacity: Option<u32>,
    pub is_active: Option<bool>,
    pub advance_booking_days: Option<u32>,
    pub metadata: Option<Map<String, Value>>,
    pub time_slots: Option<Vec<WindowSpec>>,
}

impl SlotPatch {
    pub fn touches_legacy_range(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some() || self.capacity.is_some()
    }
}

struct Fields<'a> {
    prefix: &'a str,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    fn new(prefix: &'a str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .push(FieldError::new(format!("{}{}", self.prefix, field), message));
    }

    fn clock(&mut self, field: &str, value: &str) -> Option<String> {
        if time_to_minutes(value).is_some() {
            Some(value.to_string())
        } else {
            self.push(field, "must be a 24-hour HH:MM time");
            None
        }
    }

    fn capacity(&mut self, field: &str, value: i64) -> Option<u32> {
        if value < 1 {
            self.push(field, "must be at least 1");
            return None;
        }
        match u32::try_from(value) {
            Ok(capacity) => Some(capacity),
            Err(_) => {
                self.push(field, "is too large");
                None
            }
        }
    }

    fn future_date(&mut self, field: &str, value: &str, today: NaiveDate) -> Option<NaiveDate> {
        match parse_slot_date(value) {
            Some(date) if date < today => {
                self.push(field, "cannot be in the past");
                None
            }
            Some(date) => Some(date),
            None => {
                self.push(field, "must be a YYYY-MM-DD date or RFC 3339 timestamp");
                None
            }
        }
    }

    fn advance_days(&mut self, value: i64) -> Option<u32> {
        match u32::try_from(value) {
            Ok(days) if days <= MAX_ADVANCE_BOOKING_DAYS => Some(days),
            Err(_) if value < 0 => {
                self.push("advance_booking_days", "cannot be negative");
                None
            }
            _ => {
                self.push(
                    "advance_booking_days",
                    format!("cannot exceed {} days", MAX_ADVANCE_BOOKING_DAYS),
                );
                None
            }
        }
    }

    fn metadata(&mut self, value: &Value) -> Option<Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map.clone()),
            Value::Null => Some(Map::new()),
            _ => {
                self.push("metadata", "must be a JSON object");
                None
            }
        }
    }

    /// Checks the time range of one window and reports `end_time` when it is not after `start_time`.
    fn range(&mut self, prefix: &str, start: &str, end: &str) -> Option<(String, String)> {
        let start_time = self.clock(&format!("{prefix}start_time"), start);
        let end_time = self.clock(&format!("{prefix}end_time"), end);
        let (start_time, end_time) = (start_time?, end_time?);

        if MinuteSpan::parse(&start_time, &end_time).is_none() {
            self.push(&format!("{prefix}end_time"), "must be after start_time");
            return None;
        }
        Some((start_time, end_time))
    }

    fn windows(&mut self, inputs: &[WindowInput]) -> Option<Vec<WindowSpec>> {
        if inputs.is_empty() {
            self.push("time_slots", "must contain at least one window");
            return None;
        }

        let before = self.errors.len();
        let mut specs = Vec::with_capacity(inputs.len());

        for (i, input) in inputs.iter().enumerate() {
            let prefix = format!("time_slots[{i}].");
            let range = self.range(&prefix, &input.start_time, &input.end_time);
            let capacity = self.capacity(&format!("{prefix}capacity"), input.capacity);

            let booked = match input.booked {
                None => None,
                Some(b) if b < 0 => {
                    self.push(&format!("{prefix}booked"), "cannot be negative");
                    None
                }
                Some(b) => match (u32::try_from(b), capacity) {
                    (Ok(b), Some(cap)) if b <= cap => Some(b),
                    (_, Some(_)) => {
                        self.push(&format!("{prefix}booked"), "cannot exceed capacity");
                        None
                    }
                    _ => None,
                },
            };

            if let (Some((start_time, end_time)), Some(capacity)) = (range, capacity) {
                specs.push(WindowSpec {
                    start_time,
                    end_time,
                    capacity,
                    booked,
                });
            }
        }

        if self.errors.len() > before {
            return None;
        }

        let spans: Vec<MinuteSpan> = specs.iter().filter_map(WindowSpec::span).collect();
        if let Some((a, b)) = first_self_overlap(&spans) {
            self.push("time_slots", format!("windows {} and {} overlap", a, b));
            return None;
        }
        Some(specs)
    }

    fn finish<T>(self, value: impl FnOnce() -> Option<T>) -> Result<T, Vec<FieldError>> {
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        // Every `None` above pushed an error, so this only fails on a logic slip.
        value().ok_or_else(|| vec![FieldError::new(self.prefix, "invalid request")])
    }
}

/// Validates a create request. `prefix` is prepended to every reported field
/// (e.g. `slots[2].` for bulk items).
pub fn validate_create(
    request: &CreateSlotRequest,
    prefix: &str,
    today: NaiveDate,
    default_advance_booking_days: u32,
) -> Result<SlotDraft, Vec<FieldError>> {
    let mut fields = Fields::new(prefix);

    let entity_type = match request.entity_type.as_deref() {
        Some(raw) => match raw.parse::<EntityType>() {
            Ok(entity_type) => Some(entity_type),
            Err(e) => {
                fields.push("entity_type", e);
                None
            }
        },
        None => {
            fields.push("entity_type", "is required");
            None
        }
    };

    let date = match request.date.as_deref() {
        Some(raw) => fields.future_date("date", raw, today),
        None => {
            fields.push("date", "is required");
            None
        }
    };

    let has_legacy = request.start_time.is_some() || request.end_time.is_some() || request.capacity.is_some();
    let shape = match (&request.time_slots, has_legacy) {
        (Some(_), true) => {
            fields.push(
                "time_slots",
                "cannot be combined with start_time, end_time or capacity",
            );
            None
        }
        (Some(inputs), false) => fields.windows(inputs).map(|specs| SlotShape::MultiWindow {
            time_slots: specs
                .into_iter()
                .map(|spec| Window::new(&spec.start_time, &spec.end_time, spec.capacity))
                .collect(),
        }),
        (None, _) => {
            let mut missing = false;
            for (name, present) in [
                ("start_time", request.start_time.is_some()),
                ("end_time", request.end_time.is_some()),
                ("capacity", request.capacity.is_some()),
            ] {
                if !present {
                    fields.push(name, "is required unless time_slots is provided");
                    missing = true;
                }
            }

            let range = match (&request.start_time, &request.end_time) {
                (Some(start), Some(end)) => fields.range("", start, end),
                _ => None,
            };
            let capacity = request.capacity.and_then(|c| fields.capacity("capacity", c));

            match (missing, range, capacity) {
                (false, Some((start, end)), Some(capacity)) => {
                    Some(SlotShape::Legacy(Window::new(&start, &end, capacity)))
                }
                _ => None,
            }
        }
    };

    let advance_booking_days = match request.advance_booking_days {
        Some(days) => fields.advance_days(days),
        None => Some(default_advance_booking_days),
    };

    let metadata = match &request.metadata {
        Some(value) => fields.metadata(value),
        None => Some(Map::new()),
    };

    fields.finish(|| {
        Some(SlotDraft {
            entity_type: entity_type?,
            date: date?,
            shape: shape?,
            advance_booking_days: advance_booking_days?,
            metadata: metadata?,
        })
    })
}

/// Validates the whitelisted fields of an update request.
pub fn validate_update(request: &UpdateSlotRequest, today: NaiveDate) -> Result<SlotPatch, Vec<FieldError>> {
    let mut fields = Fields::new("");
    let mut patch = SlotPatch {
        is_active: request.is_active,
        ..SlotPatch::default()
    };

    if let Some(raw) = request.date.as_deref() {
        patch.date = fields.future_date("date", raw, today);
    }
    if let Some(start) = request.start_time.as_deref() {
        patch.start_time = fields.clock("start_time", start);
    }
    if let Some(end) = request.end_time.as_deref() {
        patch.end_time = fields.clock("end_time", end);
    }
    if let Some(capacity) = request.capacity {
        patch.capacity = fields.capacity("capacity", capacity);
    }
    if let Some(days) = request.advance_booking_days {
        patch.advance_booking_days = fields.advance_days(days);
    }
    if let Some(value) = &request.metadata {
        patch.metadata = fields.metadata(value);
    }
    if let Some(inputs) = &request.time_slots {
        if request.touches_legacy_range() {
            fields.push(
                "time_slots",
                "cannot be combined with start_time, end_time or capacity",
            );
        } else {
            patch.time_slots = fields.windows(inputs);
        }
    }

    // Both ends supplied: order can be checked without the stored slot.
    if let (Some(start), Some(end)) = (&patch.start_time, &patch.end_time) {
        if MinuteSpan::parse(start, end).is_none() {
            fields.push("end_time", "must be after start_time");
        }
    }

    fields.finish(|| Some(patch))
}
