use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Method,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{DayKey, EntityType, ProviderRole, Slot, SlotFilter, SlotScope, SlotShape, Window};
use crate::store::{SlotStore, SlotTransaction, StoreError};
use crate::time::day_start;

const SLOTS_PATH: &str = "/rest/v1/slots";

/// Flat `slots` table row. Legacy columns and `time_slots` are mutually exclusive,
/// selected by `mode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotRow {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub location_id: Option<Uuid>,
    pub provider_role: ProviderRole,
    pub entity_type: EntityType,
    pub date: DateTime<Utc>,
    pub mode: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub capacity: Option<u32>,
    pub booked: Option<u32>,
    pub time_slots: Option<Vec<Window>>,
    pub advance_booking_days: u32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub is_active: bool,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl From<&Slot> for SlotRow {
    fn from(slot: &Slot) -> Self {
        let (start_time, end_time, capacity, booked, time_slots) = match &slot.shape {
            SlotShape::Legacy(w) => (
                Some(w.start_time.clone()),
                Some(w.end_time.clone()),
                Some(w.capacity),
                Some(w.booked),
                None,
            ),
            SlotShape::MultiWindow { time_slots } => (None, None, None, None, Some(time_slots.clone())),
        };

        Self {
            id: slot.id,
            provider_id: slot.provider_id,
            location_id: slot.location_id,
            provider_role: slot.provider_role,
            entity_type: slot.entity_type,
            date: slot.date,
            mode: slot.shape.mode().to_string(),
            start_time,
            end_time,
            capacity,
            booked,
            time_slots,
            advance_booking_days: slot.advance_booking_days,
            metadata: slot.metadata.clone(),
            is_active: slot.is_active,
            created_by: slot.created_by,
            updated_by: slot.updated_by,
            created_at: slot.created_at,
            updated_at: slot.updated_at,
            version: slot.version,
        }
    }
}

impl TryFrom<SlotRow> for Slot {
    type Error = StoreError;

    fn try_from(row: SlotRow) -> Result<Self, Self::Error> {
        let shape = match row.mode.as_str() {
            "legacy" => match (row.start_time, row.end_time, row.capacity) {
                (Some(start_time), Some(end_time), Some(capacity)) => SlotShape::Legacy(Window {
                    start_time,
                    end_time,
                    capacity,
                    booked: row.booked.unwrap_or(0),
                }),
                _ => {
                    return Err(StoreError::Corrupt(format!(
                        "legacy slot {} is missing its time range or capacity",
                        row.id
                    )))
                }
            },
            "multi_window" => SlotShape::MultiWindow {
                time_slots: row.time_slots.ok_or_else(|| {
                    StoreError::Corrupt(format!("multi-window slot {} has no time_slots", row.id))
                })?,
            },
            other => {
                return Err(StoreError::Corrupt(format!(
                    "slot {} has unknown mode '{}'",
                    row.id, other
                )))
            }
        };

        Ok(Slot {
            id: row.id,
            provider_id: row.provider_id,
            location_id: row.location_id,
            provider_role: row.provider_role,
            entity_type: row.entity_type,
            date: day_start(row.date.date_naive()),
            shape,
            advance_booking_days: row.advance_booking_days,
            metadata: row.metadata,
            is_active: row.is_active,
            created_by: row.created_by,
            updated_by: row.updated_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

fn into_slots(rows: Vec<SlotRow>) -> Result<Vec<Slot>, StoreError> {
    rows.into_iter().map(Slot::try_from).collect()
}

fn eq(column: &str, value: impl ToString) -> String {
    format!("{}=eq.{}", column, urlencoding::encode(&value.to_string()))
}

fn day_filter(day: &DayKey) -> Vec<String> {
    vec![
        eq("provider_id", day.provider_id),
        eq("date", day_start(day.date).to_rfc3339()),
        "is_active=eq.true".to_string(),
    ]
}

fn scope_filter(scope: &SlotScope) -> Vec<String> {
    let mut parts = day_filter(&scope.day_key());
    parts.push(eq("entity_type", scope.entity_type));
    parts.push(match scope.location_id {
        Some(location_id) => eq("location_id", location_id),
        None => "location_id=is.null".to_string(),
    });
    parts
}

fn return_representation() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

/// Slot store backed by a Supabase `slots` table through PostgREST.
///
/// PostgREST cannot hold a transaction open across requests. Each commit is
/// one statement, updates are guarded by `version=eq.N`, and the
/// `slots_legacy_scope_key` partial unique index rejects duplicate active
/// legacy slots.
pub struct PostgrestSlotStore {
    supabase: Arc<SupabaseClient>,
}

fn select_path(filters: &[String]) -> String {
    let mut params = vec!["select=*"];
    params.extend(filters.iter().map(String::as_str));
    params.push("order=date.asc,created_at.asc");
    format!("{}?{}", SLOTS_PATH, params.join("&"))
}

impl PostgrestSlotStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(supabase: &SupabaseClient, filters: &[String]) -> Result<Vec<Slot>, StoreError> {
        let path = select_path(filters);
        let rows: Vec<SlotRow> = supabase.request(Method::GET, &path, None, None).await?;
        into_slots(rows)
    }
}

#[async_trait]
impl SlotStore for PostgrestSlotStore {
    fn supports_transactions(&self) -> bool {
        false
    }

    async fn get(&self, id: Uuid) -> Result<Option<Slot>, StoreError> {
        let slots = Self::select(&self.supabase, &[eq("id", id)]).await?;
        Ok(slots.into_iter().next())
    }

    async fn find(&self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError> {
        let mut parts = Vec::new();
        if let Some(provider_id) = filter.provider_id {
            parts.push(eq("provider_id", provider_id));
        }
        if let Some(location_id) = filter.location_id {
            parts.push(eq("location_id", location_id));
        }
        if let Some(entity_type) = filter.entity_type {
            parts.push(eq("entity_type", entity_type));
        }
        if let Some(date) = filter.date {
            parts.push(eq("date", day_start(date).to_rfc3339()));
        }
        if filter.active_only {
            parts.push("is_active=eq.true".to_string());
        }
        Self::select(&self.supabase, &parts).await
    }

    async fn begin(&self, days: &[DayKey]) -> Result<Box<dyn SlotTransaction>, StoreError> {
        debug!("Opened PostgREST slot transaction over {} day(s) without locks", days.len());
        Ok(Box::new(PostgrestTransaction {
            supabase: Arc::clone(&self.supabase),
            overlay: HashMap::new(),
            inserts: Vec::new(),
            updates: Vec::new(),
        }))
    }
}

enum Statement {
    Replace(Slot),
    Remove { id: Uuid, version: u64 },
}

pub struct PostgrestTransaction {
    supabase: Arc<SupabaseClient>,
    overlay: HashMap<Uuid, Option<Slot>>,
    inserts: Vec<Slot>,
    updates: Vec<Statement>,
}

impl PostgrestTransaction {
    fn merge<F>(&self, committed: Vec<Slot>, keep: F) -> Vec<Slot>
    where
        F: Fn(&Slot) -> bool,
    {
        let staged = self.overlay.values().flatten().filter(|slot| keep(*slot)).cloned();
        committed
            .into_iter()
            .filter(|slot| !self.overlay.contains_key(&slot.id))
            .chain(staged)
            .collect()
    }

    async fn run_update(&self, statement: Statement) -> Result<Vec<Slot>, StoreError> {
        match statement {
            Statement::Replace(mut slot) => {
                let read_version = slot.version;
                slot.version += 1;
                slot.updated_at = Utc::now();
                let body = serde_json::to_value(SlotRow::from(&slot))
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                let path = format!("{}?{}&{}", SLOTS_PATH, eq("id", slot.id), eq("version", read_version));

                let rows: Vec<SlotRow> = self
                    .supabase
                    .request_with_headers(Method::PATCH, &path, None, Some(body), Some(return_representation()))
                    .await?;
                if rows.is_empty() {
                    return Err(StoreError::WriteConflict(slot.id));
                }
                into_slots(rows)
            }
            Statement::Remove { id, version } => {
                let path = format!("{}?{}&{}", SLOTS_PATH, eq("id", id), eq("version", version));
                let rows: Vec<SlotRow> = self
                    .supabase
                    .request_with_headers(Method::DELETE, &path, None, None, Some(return_representation()))
                    .await?;
                if rows.is_empty() {
                    return Err(StoreError::WriteConflict(id));
                }
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl SlotTransaction for PostgrestTransaction {
    async fn get(&mut self, id: Uuid) -> Result<Option<Slot>, StoreError> {
        if let Some(staged) = self.overlay.get(&id) {
            return Ok(staged.clone());
        }
        let slots = PostgrestSlotStore::select(&self.supabase, &[eq("id", id)]).await?;
        Ok(slots.into_iter().next())
    }

    async fn active_in_scope(
        &mut self,
        scope: &SlotScope,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Slot>, StoreError> {
        let committed = PostgrestSlotStore::select(&self.supabase, &scope_filter(scope)).await?;
        Ok(self
            .merge(committed, |slot| slot.is_active && slot.scope() == *scope)
            .into_iter()
            .filter(|slot| Some(slot.id) != exclude)
            .collect())
    }

    async fn count_active_on_day(
        &mut self,
        day: &DayKey,
        exclude: Option<Uuid>,
    ) -> Result<usize, StoreError> {
        let committed = PostgrestSlotStore::select(&self.supabase, &day_filter(day)).await?;
        Ok(self
            .merge(committed, |slot| slot.is_active && slot.day_key() == *day)
            .iter()
            .filter(|slot| Some(slot.id) != exclude)
            .count())
    }

    fn insert(&mut self, slot: Slot) {
        self.overlay.insert(slot.id, Some(slot.clone()));
        self.inserts.push(slot);
    }

    fn replace(&mut self, slot: Slot) {
        self.overlay.insert(slot.id, Some(slot.clone()));
        self.updates.push(Statement::Replace(slot));
    }

    fn remove(&mut self, slot: &Slot) {
        self.overlay.insert(slot.id, None);
        self.updates.push(Statement::Remove {
            id: slot.id,
            version: slot.version,
        });
    }

    async fn commit(self: Box<Self>) -> Result<Vec<Slot>, StoreError> {
        let mut this = *self;

        // Only one statement per commit keeps it atomic.
        match (this.inserts.is_empty(), this.updates.len()) {
            (true, 0) => Ok(Vec::new()),
            (true, 1) => {
                let statement = this.updates.remove(0);
                this.run_update(statement).await
            }
            (false, 0) => {
                let rows: Vec<SlotRow> = this
                    .inserts
                    .iter()
                    .map(|slot| {
                        let mut row = SlotRow::from(slot);
                        row.version = 1;
                        row
                    })
                    .collect();
                let body = serde_json::to_value(&rows).map_err(|e| StoreError::Backend(e.to_string()))?;

                let created: Vec<SlotRow> = this
                    .supabase
                    .request_with_headers(Method::POST, SLOTS_PATH, None, Some(body), Some(return_representation()))
                    .await?;
                debug!("Inserted {} slot row(s)", created.len());
                into_slots(created)
            }
            (_, updates) => {
                warn!(
                    "Refusing PostgREST commit with {} insert(s) and {} update(s)",
                    this.inserts.len(),
                    updates
                );
                Err(StoreError::Backend(
                    "a PostgREST commit must be a single statement".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn multi_window_slot() -> Slot {
        let provider_id = Uuid::new_v4();
        let now = Utc::now();
        Slot {
            id: Uuid::new_v4(),
            provider_id,
            location_id: Some(Uuid::new_v4()),
            provider_role: ProviderRole::Hospital,
            entity_type: EntityType::Ipd,
            date: day_start(NaiveDate::from_ymd_opt(2030, 1, 2).unwrap()),
            shape: SlotShape::MultiWindow {
                time_slots: vec![Window::new("09:00", "09:30", 2), Window::new("09:30", "10:00", 2)],
            },
            advance_booking_days: 14,
            metadata: Map::new(),
            is_active: true,
            created_by: provider_id,
            updated_by: provider_id,
            created_at: now,
            updated_at: now,
            version: 3,
        }
    }

    #[test]
    fn multi_window_rows_leave_legacy_columns_empty() {
        let slot = multi_window_slot();
        let row = SlotRow::from(&slot);
        assert_eq!(row.mode, "multi_window");
        assert!(row.start_time.is_none() && row.capacity.is_none());
        assert_eq!(row.time_slots.as_ref().map(Vec::len), Some(2));

        let back = Slot::try_from(row).unwrap();
        assert_eq!(back, slot);
    }

    #[test]
    fn legacy_row_without_range_is_corrupt() {
        let mut row = SlotRow::from(&multi_window_slot());
        row.mode = "legacy".to_string();
        assert!(matches!(Slot::try_from(row), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn select_path_has_no_empty_segments() {
        assert_eq!(
            select_path(&[]),
            "/rest/v1/slots?select=*&order=date.asc,created_at.asc"
        );
        assert_eq!(
            select_path(&["is_active=eq.true".to_string(), "entity_type=eq.LAB".to_string()]),
            "/rest/v1/slots?select=*&is_active=eq.true&entity_type=eq.LAB&order=date.asc,created_at.asc"
        );
    }

    #[test]
    fn scope_filter_matches_null_location() {
        let scope = SlotScope {
            provider_id: Uuid::nil(),
            location_id: None,
            date: NaiveDate::from_ymd_opt(2030, 1, 2).unwrap(),
            entity_type: EntityType::Opd,
        };
        let filters = scope_filter(&scope);
        assert!(filters.contains(&"location_id=is.null".to_string()));
        assert!(filters.contains(&"entity_type=eq.OPD".to_string()));
        assert!(filters.contains(&"date=eq.2030-01-02T00%3A00%3A00%2B00%3A00".to_string()));
    }
}
