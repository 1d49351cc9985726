// libs/slot-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::time::MinuteSpan;

// ==============================================================================
// CORE SLOT MODELS
// ==============================================================================

/// Service category a slot offers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    #[serde(rename = "OPD")]
    Opd,
    #[serde(rename = "IPD")]
    Ipd,
    #[serde(rename = "LAB")]
    Lab,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Opd => write!(f, "OPD"),
            EntityType::Ipd => write!(f, "IPD"),
            EntityType::Lab => write!(f, "LAB"),
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPD" => Ok(EntityType::Opd),
            "IPD" => Ok(EntityType::Ipd),
            "LAB" => Ok(EntityType::Lab),
            other => Err(format!("'{}' is not one of OPD, IPD, LAB", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRole {
    Hospital,
    Doctor,
    Lab,
}

impl ProviderRole {
    /// Which entity types this kind of provider may offer.
    pub fn allowed_entity_types(&self) -> &'static [EntityType] {
        match self {
            ProviderRole::Hospital => &[EntityType::Opd, EntityType::Ipd],
            ProviderRole::Doctor => &[EntityType::Opd],
            ProviderRole::Lab => &[EntityType::Lab],
        }
    }

    pub fn can_offer(&self, entity_type: EntityType) -> bool {
        self.allowed_entity_types().contains(&entity_type)
    }
}

impl fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderRole::Hospital => write!(f, "hospital"),
            ProviderRole::Doctor => write!(f, "doctor"),
            ProviderRole::Lab => write!(f, "lab"),
        }
    }
}

impl FromStr for ProviderRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hospital" => Ok(ProviderRole::Hospital),
            "doctor" => Ok(ProviderRole::Doctor),
            "lab" => Ok(ProviderRole::Lab),
            other => Err(format!("'{}' cannot offer slots", other)),
        }
    }
}

/// One bookable time range with its own counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Window {
    pub start_time: String,
    pub end_time: String,
    pub capacity: u32,
    pub booked: u32,
}

impl Window {
    pub fn new(start_time: &str, end_time: &str, capacity: u32) -> Self {
        Self {
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
            capacity,
            booked: 0,
        }
    }

    pub fn span(&self) -> Option<MinuteSpan> {
        MinuteSpan::parse(&self.start_time, &self.end_time)
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.booked)
    }

    pub fn key(&self) -> WindowKey {
        WindowKey {
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
        }
    }
}

/// Identifies a window inside a slot by its time range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub start_time: String,
    pub end_time: String,
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_time, self.end_time)
    }
}

/// The two mutually exclusive ways a slot describes its capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SlotShape {
    Legacy(Window),
    MultiWindow { time_slots: Vec<Window> },
}

impl SlotShape {
    pub fn windows(&self) -> &[Window] {
        match self {
            SlotShape::Legacy(window) => std::slice::from_ref(window),
            SlotShape::MultiWindow { time_slots } => time_slots,
        }
    }

    pub fn windows_mut(&mut self) -> &mut [Window] {
        match self {
            SlotShape::Legacy(window) => std::slice::from_mut(window),
            SlotShape::MultiWindow { time_slots } => time_slots,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, SlotShape::Legacy(_))
    }

    pub fn mode(&self) -> &'static str {
        match self {
            SlotShape::Legacy(_) => "legacy",
            SlotShape::MultiWindow { .. } => "multi_window",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub location_id: Option<Uuid>,
    pub provider_role: ProviderRole,
    pub entity_type: EntityType,
    /// Always UTC midnight of the slot's calendar day.
    pub date: DateTime<Utc>,
    #[serde(flatten)]
    pub shape: SlotShape,
    pub advance_booking_days: u32,
    pub metadata: Map<String, Value>,
    pub is_active: bool,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every committed write.
    pub version: u64,
}

impl Slot {
    pub fn day(&self) -> NaiveDate {
        self.date.date_naive()
    }

    pub fn windows(&self) -> &[Window] {
        self.shape.windows()
    }

    pub fn has_bookings(&self) -> bool {
        self.windows().iter().any(|w| w.booked > 0)
    }

    pub fn scope(&self) -> SlotScope {
        SlotScope {
            provider_id: self.provider_id,
            location_id: self.location_id,
            date: self.day(),
            entity_type: self.entity_type,
        }
    }

    pub fn day_key(&self) -> DayKey {
        DayKey {
            provider_id: self.provider_id,
            date: self.day(),
        }
    }
}

/// Windows in the same scope must never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotScope {
    pub provider_id: Uuid,
    pub location_id: Option<Uuid>,
    pub date: NaiveDate,
    pub entity_type: EntityType,
}

impl SlotScope {
    pub fn day_key(&self) -> DayKey {
        DayKey {
            provider_id: self.provider_id,
            date: self.date,
        }
    }
}

/// Unit of write locking: one provider's calendar day. Covers every scope of
/// that day and the per-day slot limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayKey {
    pub provider_id: Uuid,
    pub date: NaiveDate,
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.provider_id, self.date)
    }
}

/// Scalar filters for slot reads.
#[derive(Debug, Clone, Default)]
pub struct SlotFilter {
    pub provider_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub entity_type: Option<EntityType>,
    pub date: Option<NaiveDate>,
    pub active_only: bool,
}

impl SlotFilter {
    pub fn matches(&self, slot: &Slot) -> bool {
        self.provider_id.is_none_or(|id| slot.provider_id == id)
            && self.location_id.is_none_or(|id| slot.location_id == Some(id))
            && self.entity_type.is_none_or(|t| slot.entity_type == t)
            && self.date.is_none_or(|d| slot.day() == d)
            && (!self.active_only || slot.is_active)
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================
// Raw request bodies. Fields stay loosely typed so that every bad value can be
// reported at once by the validators instead of failing JSON extraction.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowInput {
    pub start_time: String,
    pub end_time: String,
    pub capacity: i64,
    pub booked: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSlotRequest {
    pub entity_type: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub capacity: Option<i64>,
    pub time_slots: Option<Vec<WindowInput>>,
    pub advance_booking_days: Option<i64>,
    pub metadata: Option<Value>,
    pub location_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCreateSlotsRequest {
    pub slots: Vec<CreateSlotRequest>,
}

/// Only these fields can be changed after creation; anything else in the body is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSlotRequest {
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub capacity: Option<i64>,
    pub is_active: Option<bool>,
    pub advance_booking_days: Option<i64>,
    pub metadata: Option<Value>,
    pub time_slots: Option<Vec<WindowInput>>,
}

impl UpdateSlotRequest {
    pub fn touches_legacy_range(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some() || self.capacity.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityQuery {
    pub provider_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub entity_type: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSlotsQuery {
    pub date: Option<String>,
    pub entity_type: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

// ==============================================================================
// RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableWindow {
    pub start_time: String,
    pub end_time: String,
    pub capacity: u32,
    pub booked: u32,
    pub remaining_capacity: u32,
}

impl From<&Window> for AvailableWindow {
    fn from(window: &Window) -> Self {
        Self {
            start_time: window.start_time.clone(),
            end_time: window.end_time.clone(),
            capacity: window.capacity,
            booked: window.booked,
            remaining_capacity: window.remaining_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableSlot {
    pub slot_id: Uuid,
    pub provider_id: Uuid,
    pub location_id: Option<Uuid>,
    pub entity_type: EntityType,
    pub date: DateTime<Utc>,
    pub mode: String,
    pub windows: Vec<AvailableWindow>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The slot had bookings and was deactivated instead.
    Deactivated,
    Deleted,
}
