// libs/slot-cell/src/services/slots.rs
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::FieldError;

use crate::error::SlotError;
use crate::models::{
    BulkCreateSlotsRequest, CreateSlotRequest, DayKey, DeleteOutcome, EntityType, ProviderSlotsQuery, Slot,
    SlotFilter, SlotScope, UpdateSlotRequest, Window, WindowKey,
};
use crate::services::access::Provider;
use crate::services::merge::apply_patch;
use crate::services::overlap::{first_collision, spans};
use crate::services::transaction::TransactionRunner;
use crate::services::validation::{validate_create, validate_update, SlotDraft, SlotPatch};
use crate::store::{SlotStore, SlotTransaction, StoreError};
use crate::time::{day_start, parse_slot_date, today_utc};

#[derive(Debug, Clone)]
pub struct SlotLimits {
    pub max_slots_per_day: usize,
    pub default_advance_booking_days: u32,
    pub max_bulk_slots: usize,
}

impl From<&AppConfig> for SlotLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_slots_per_day: config.max_slots_per_day,
            default_advance_booking_days: config.default_advance_booking_days,
            max_bulk_slots: config.max_bulk_slots,
        }
    }
}

/// Slot lifecycle and the booking counter contract.
pub struct SlotService {
    store: Arc<dyn SlotStore>,
    runner: TransactionRunner,
    limits: SlotLimits,
}

impl SlotService {
    pub fn new(config: &AppConfig, store: Arc<dyn SlotStore>) -> Self {
        if !store.supports_transactions() {
            warn!(
                "Slot store has no transaction support: concurrent multi-window creates in one scope \
                 are only caught by the pre-commit overlap check"
            );
        }

        Self {
            store,
            runner: TransactionRunner::new(config.transaction_max_retries),
            limits: SlotLimits::from(config),
        }
    }

    pub fn with_runner(mut self, runner: TransactionRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn store(&self) -> &Arc<dyn SlotStore> {
        &self.store
    }

    // ==============================================================================
    // CREATE
    // ==============================================================================

    #[instrument(skip(self, user, request), fields(user_id = %user.id))]
    pub async fn create_slot(&self, user: &User, request: CreateSlotRequest) -> Result<Slot, SlotError> {
        let provider = Provider::from_user(user)?;
        provider.ensure_verified()?;

        let draft = validate_create(&request, "", today_utc(), self.limits.default_advance_booking_days)
            .map_err(SlotError::Validation)?;
        provider.ensure_can_offer(draft.entity_type)?;
        let location_id = provider.resolve_location(request.location_id)?;

        let slot = self.new_slot(&provider, location_id, draft);
        self.precheck(&[&slot]).await?;

        let created = self
            .runner
            .run("create_slot", || self.try_insert(std::slice::from_ref(&slot)))
            .await?;

        let slot = created
            .into_iter()
            .next()
            .ok_or_else(|| SlotError::Store(StoreError::Backend("insert returned no rows".to_string())))?;
        info!(
            "Created {} slot {} for provider {} on {}",
            slot.shape.mode(),
            slot.id,
            slot.provider_id,
            slot.day()
        );
        Ok(slot)
    }

    #[instrument(skip(self, user, request), fields(user_id = %user.id, count = request.slots.len()))]
    pub async fn bulk_create_slots(
        &self,
        user: &User,
        request: BulkCreateSlotsRequest,
    ) -> Result<Vec<Slot>, SlotError> {
        let provider = Provider::from_user(user)?;
        provider.ensure_verified()?;

        if request.slots.is_empty() {
            return Err(SlotError::invalid("slots", "must contain at least one slot"));
        }
        if request.slots.len() > self.limits.max_bulk_slots {
            return Err(SlotError::invalid(
                "slots",
                format!("cannot contain more than {} slots", self.limits.max_bulk_slots),
            ));
        }

        let today = today_utc();
        let mut errors: Vec<FieldError> = Vec::new();
        let mut drafts = Vec::with_capacity(request.slots.len());
        for (i, item) in request.slots.iter().enumerate() {
            match validate_create(item, &format!("slots[{i}]."), today, self.limits.default_advance_booking_days) {
                Ok(draft) => drafts.push((draft, item.location_id)),
                Err(mut item_errors) => errors.append(&mut item_errors),
            }
        }
        if !errors.is_empty() {
            return Err(SlotError::Validation(errors));
        }

        let mut slots = Vec::with_capacity(drafts.len());
        for (i, (draft, requested_location)) in drafts.into_iter().enumerate() {
            let prefix = format!("slots[{i}].");
            provider
                .ensure_can_offer(draft.entity_type)
                .map_err(|e| e.for_item(&prefix))?;
            let location_id = provider
                .resolve_location(requested_location)
                .map_err(|e| e.for_item(&prefix))?;
            slots.push(self.new_slot(&provider, location_id, draft));
        }

        let refs: Vec<&Slot> = slots.iter().collect();
        self.precheck(&refs).await?;

        let created = self.runner.run("bulk_create_slots", || self.try_insert(&slots)).await?;
        info!("Bulk created {} slot(s) for provider {}", created.len(), provider.id);
        Ok(created)
    }

    fn new_slot(&self, provider: &Provider, location_id: Option<Uuid>, draft: SlotDraft) -> Slot {
        let now = Utc::now();
        Slot {
            id: Uuid::new_v4(),
            provider_id: provider.id,
            location_id,
            provider_role: provider.role,
            entity_type: draft.entity_type,
            date: day_start(draft.date),
            shape: draft.shape,
            advance_booking_days: draft.advance_booking_days,
            metadata: draft.metadata,
            is_active: true,
            created_by: provider.id,
            updated_by: provider.id,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Early rejection against committed state, outside any transaction. Also
    /// catches candidates that collide with each other.
    async fn precheck(&self, candidates: &[&Slot]) -> Result<(), SlotError> {
        let days: Vec<DayKey> = candidates
            .iter()
            .map(|s| s.day_key())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let filters: Vec<SlotFilter> = days
            .iter()
            .map(|day| SlotFilter {
                provider_id: Some(day.provider_id),
                date: Some(day.date),
                active_only: true,
                ..SlotFilter::default()
            })
            .collect();
        let per_day = try_join_all(filters.iter().map(|filter| self.store.find(filter))).await?;

        for (day, committed) in days.into_iter().zip(per_day) {
            let on_day: Vec<&Slot> = candidates.iter().copied().filter(|s| s.day_key() == day).collect();
            if committed.len() + on_day.len() > self.limits.max_slots_per_day {
                return Err(self.limit_exceeded(&day));
            }

            let mut seen: Vec<Slot> = Vec::new();
            for candidate in on_day {
                let scope = candidate.scope();
                let in_scope: Vec<Slot> = committed
                    .iter()
                    .chain(seen.iter())
                    .filter(|s| s.scope() == scope && s.id != candidate.id)
                    .cloned()
                    .collect();
                if let Some(collision) = first_collision(&spans(candidate.windows()), &in_scope) {
                    return Err(SlotError::OverlapConflict(collision.describe()));
                }
                seen.push(candidate.clone());
            }
        }
        Ok(())
    }

    /// One transactional attempt at inserting `slots`; the authoritative checks.
    async fn try_insert(&self, slots: &[Slot]) -> Result<Vec<Slot>, SlotError> {
        let days: Vec<DayKey> = slots.iter().map(Slot::day_key).collect();
        let mut tx = self.store.begin(&days).await?;

        for slot in slots {
            self.check_day_limit(tx.as_mut(), &slot.day_key(), None).await?;
            self.check_scope(tx.as_mut(), &slot.scope(), slot, None).await?;
            tx.insert(slot.clone());
        }

        commit(tx).await
    }

    async fn check_day_limit(
        &self,
        tx: &mut dyn SlotTransaction,
        day: &DayKey,
        exclude: Option<Uuid>,
    ) -> Result<(), SlotError> {
        let active = tx.count_active_on_day(day, exclude).await?;
        if active >= self.limits.max_slots_per_day {
            return Err(self.limit_exceeded(day));
        }
        Ok(())
    }

    async fn check_scope(
        &self,
        tx: &mut dyn SlotTransaction,
        scope: &SlotScope,
        candidate: &Slot,
        exclude: Option<Uuid>,
    ) -> Result<(), SlotError> {
        let existing = tx.active_in_scope(scope, exclude).await?;
        if let Some(collision) = first_collision(&spans(candidate.windows()), &existing) {
            debug!("Rejecting slot {}: {}", candidate.id, collision.describe());
            return Err(SlotError::OverlapConflict(collision.describe()));
        }
        Ok(())
    }

    fn limit_exceeded(&self, day: &DayKey) -> SlotError {
        SlotError::LimitExceeded {
            limit: self.limits.max_slots_per_day,
            date: day.date.to_string(),
        }
    }

    // ==============================================================================
    // UPDATE / DELETE
    // ==============================================================================

    #[instrument(skip(self, user, request), fields(user_id = %user.id))]
    pub async fn update_slot(
        &self,
        user: &User,
        slot_id: Uuid,
        request: UpdateSlotRequest,
    ) -> Result<Slot, SlotError> {
        let provider = Provider::from_user(user)?;
        let patch = validate_update(&request, today_utc()).map_err(SlotError::Validation)?;

        let current = self.fetch(slot_id).await?;
        provider.ensure_owner(&current)?;

        let preview = apply_patch(&current, &patch, provider.id)?;
        if preview.is_active {
            self.precheck_update(&preview).await?;
        }

        let updated = self
            .runner
            .run("update_slot", || self.try_update(&provider, slot_id, &patch))
            .await?;
        info!("Updated slot {} (version {})", updated.id, updated.version);
        Ok(updated)
    }

    async fn precheck_update(&self, preview: &Slot) -> Result<(), SlotError> {
        let others: Vec<Slot> = self
            .store
            .find(&SlotFilter {
                provider_id: Some(preview.provider_id),
                date: Some(preview.day()),
                entity_type: Some(preview.entity_type),
                active_only: true,
                ..SlotFilter::default()
            })
            .await?
            .into_iter()
            .filter(|s| s.scope() == preview.scope() && s.id != preview.id)
            .collect();

        match first_collision(&spans(preview.windows()), &others) {
            Some(collision) => Err(SlotError::OverlapConflict(collision.describe())),
            None => Ok(()),
        }
    }

    async fn try_update(&self, provider: &Provider, slot_id: Uuid, patch: &SlotPatch) -> Result<Slot, SlotError> {
        let current = self.fetch(slot_id).await?;
        provider.ensure_owner(&current)?;

        let target = DayKey {
            provider_id: current.provider_id,
            date: patch.date.unwrap_or_else(|| current.day()),
        };
        let mut tx = self.store.begin(&[current.day_key(), target]).await?;

        let fresh = tx.get(slot_id).await?.ok_or(SlotError::NotFound(slot_id))?;
        if fresh.day() != current.day() {
            // Moved to another day since the locks were chosen.
            return Err(StoreError::WriteConflict(slot_id).into());
        }

        let next = apply_patch(&fresh, patch, provider.id)?;
        if next.is_active {
            if next.day() != fresh.day() || !fresh.is_active {
                self.check_day_limit(tx.as_mut(), &next.day_key(), Some(slot_id)).await?;
            }
            self.check_scope(tx.as_mut(), &next.scope(), &next, Some(slot_id)).await?;
        }

        tx.replace(next);
        commit(tx)
            .await?
            .into_iter()
            .next()
            .ok_or(SlotError::NotFound(slot_id))
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn delete_slot(&self, user: &User, slot_id: Uuid) -> Result<DeleteOutcome, SlotError> {
        let provider = Provider::from_user(user)?;
        let outcome = self
            .runner
            .run("delete_slot", || self.try_delete(&provider, slot_id))
            .await?;
        info!("Slot {} {:?}", slot_id, outcome);
        Ok(outcome)
    }

    async fn try_delete(&self, provider: &Provider, slot_id: Uuid) -> Result<DeleteOutcome, SlotError> {
        let current = self.fetch(slot_id).await?;
        provider.ensure_owner(&current)?;

        let mut tx = self.store.begin(&[current.day_key()]).await?;
        let fresh = tx.get(slot_id).await?.ok_or(SlotError::NotFound(slot_id))?;

        let outcome = if fresh.has_bookings() {
            if fresh.is_active {
                let mut next = fresh.clone();
                next.is_active = false;
                next.updated_by = provider.id;
                next.updated_at = Utc::now();
                tx.replace(next);
            }
            DeleteOutcome::Deactivated
        } else {
            tx.remove(&fresh);
            DeleteOutcome::Deleted
        };

        commit(tx).await?;
        Ok(outcome)
    }

    // ==============================================================================
    // READS
    // ==============================================================================

    pub async fn get_slot(&self, slot_id: Uuid) -> Result<Slot, SlotError> {
        self.fetch(slot_id).await
    }

    pub async fn list_provider_slots(&self, user: &User, query: ProviderSlotsQuery) -> Result<Vec<Slot>, SlotError> {
        let provider = Provider::from_user(user)?;

        let mut errors = Vec::new();
        let date = query.date.as_deref().and_then(|raw| {
            let parsed = parse_slot_date(raw);
            if parsed.is_none() {
                errors.push(FieldError::new("date", "must be a YYYY-MM-DD date or RFC 3339 timestamp"));
            }
            parsed
        });
        let entity_type = query
            .entity_type
            .as_deref()
            .and_then(|raw| match raw.parse::<EntityType>() {
                Ok(t) => Some(t),
                Err(e) => {
                    errors.push(FieldError::new("entity_type", e));
                    None
                }
            });
        if !errors.is_empty() {
            return Err(SlotError::Validation(errors));
        }

        let slots = self
            .store
            .find(&SlotFilter {
                provider_id: Some(provider.id),
                date,
                entity_type,
                active_only: !query.include_inactive,
                ..SlotFilter::default()
            })
            .await?;
        debug!("Provider {} has {} matching slot(s)", provider.id, slots.len());
        Ok(slots)
    }

    async fn fetch(&self, slot_id: Uuid) -> Result<Slot, SlotError> {
        self.store.get(slot_id).await?.ok_or(SlotError::NotFound(slot_id))
    }

    // ==============================================================================
    // BOOKING CONTRACT
    // ==============================================================================

    /// Takes one place in a window. Called by the booking flow before it
    /// confirms an appointment.
    #[instrument(skip(self))]
    pub async fn reserve_window(&self, slot_id: Uuid, start_time: &str, end_time: &str) -> Result<Window, SlotError> {
        let key = WindowKey {
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
        };
        let window = self
            .runner
            .run("reserve_window", || self.try_adjust(slot_id, &key, Adjustment::Reserve))
            .await?;
        info!(
            "Reserved {} on slot {} ({}/{})",
            key, slot_id, window.booked, window.capacity
        );
        Ok(window)
    }

    /// Gives a place back, e.g. after a cancellation. Never goes below zero.
    #[instrument(skip(self))]
    pub async fn release_window(&self, slot_id: Uuid, start_time: &str, end_time: &str) -> Result<Window, SlotError> {
        let key = WindowKey {
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
        };
        let window = self
            .runner
            .run("release_window", || self.try_adjust(slot_id, &key, Adjustment::Release))
            .await?;
        info!(
            "Released {} on slot {} ({}/{})",
            key, slot_id, window.booked, window.capacity
        );
        Ok(window)
    }

    async fn try_adjust(&self, slot_id: Uuid, key: &WindowKey, adjustment: Adjustment) -> Result<Window, SlotError> {
        let current = self.fetch(slot_id).await?;
        let mut tx = self.store.begin(&[current.day_key()]).await?;
        let mut slot = tx.get(slot_id).await?.ok_or(SlotError::NotFound(slot_id))?;

        if adjustment == Adjustment::Reserve {
            ensure_bookable(&slot)?;
        }

        let window = slot
            .shape
            .windows_mut()
            .iter_mut()
            .find(|w| w.start_time == key.start_time && w.end_time == key.end_time)
            .ok_or_else(|| SlotError::invalid("time_slot", format!("slot {} has no window {}", slot_id, key)))?;

        match adjustment {
            Adjustment::Reserve => {
                if window.booked >= window.capacity {
                    return Err(SlotError::WindowFull(key.to_string()));
                }
                window.booked += 1;
            }
            Adjustment::Release => {
                if window.booked == 0 {
                    debug!("Window {} of slot {} has nothing to release", key, slot_id);
                    return Ok(window.clone());
                }
                window.booked -= 1;
            }
        }
        let adjusted = window.clone();

        tx.replace(slot);
        commit(tx).await?;
        Ok(adjusted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjustment {
    Reserve,
    Release,
}

fn ensure_bookable(slot: &Slot) -> Result<(), SlotError> {
    if !slot.is_active {
        return Err(SlotError::Forbidden(format!("Slot {} is not accepting bookings", slot.id)));
    }

    let today = today_utc();
    // A horizon past the calendar's end leaves the slot open-ended.
    let horizon = today.checked_add_signed(Duration::days(i64::from(slot.advance_booking_days)));
    let day = slot.day();
    if day < today || horizon.is_some_and(|horizon| day > horizon) {
        return Err(SlotError::Forbidden(format!(
            "Slot {} on {} is outside the {}-day booking window",
            slot.id, day, slot.advance_booking_days
        )));
    }
    Ok(())
}

/// Commits and reports a unique-index rejection the same way as a detected overlap.
async fn commit(tx: Box<dyn SlotTransaction>) -> Result<Vec<Slot>, SlotError> {
    tx.commit().await.map_err(|e| match e {
        StoreError::DuplicateKey(detail) => {
            warn!("Unique index rejected slot write: {}", detail);
            SlotError::OverlapConflict("A slot with the same time range already exists".to_string())
        }
        other => SlotError::Store(other),
    })
}
