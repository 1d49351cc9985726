use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{DayKey, EntityType, Slot, SlotFilter, SlotScope, SlotShape};
use crate::store::{SlotStore, SlotTransaction, StoreError};

/// Idle day locks are dropped once the lock table grows past this size.
const LOCK_TABLE_PRUNE_THRESHOLD: usize = 4096;

/// Uniqueness key for active legacy slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LegacyKey {
    provider_id: Uuid,
    location_id: Option<Uuid>,
    date: NaiveDate,
    start_time: String,
    end_time: String,
    entity_type: EntityType,
}

impl LegacyKey {
    fn of(slot: &Slot) -> Option<Self> {
        match &slot.shape {
            SlotShape::Legacy(window) if slot.is_active => Some(Self {
                provider_id: slot.provider_id,
                location_id: slot.location_id,
                date: slot.day(),
                start_time: window.start_time.clone(),
                end_time: window.end_time.clone(),
                entity_type: slot.entity_type,
            }),
            _ => None,
        }
    }
}

#[derive(Default)]
struct SlotTable {
    slots: HashMap<Uuid, Slot>,
    legacy_index: HashMap<LegacyKey, Uuid>,
}

impl SlotTable {
    fn upsert(&mut self, slot: Slot) -> Result<Option<Slot>, StoreError> {
        let key = LegacyKey::of(&slot);
        if let Some(key) = &key {
            if let Some(owner) = self.legacy_index.get(key) {
                if *owner != slot.id {
                    return Err(StoreError::DuplicateKey(format!(
                        "active legacy slot {}-{} already exists for provider {} on {}",
                        key.start_time, key.end_time, key.provider_id, key.date
                    )));
                }
            }
        }

        let id = slot.id;
        let previous = self.slots.insert(id, slot);
        if let Some(old_key) = previous.as_ref().and_then(LegacyKey::of) {
            self.unindex(&old_key, id);
        }
        if let Some(key) = key {
            self.legacy_index.insert(key, id);
        }
        Ok(previous)
    }

    fn delete(&mut self, id: Uuid) -> Option<Slot> {
        let removed = self.slots.remove(&id);
        if let Some(key) = removed.as_ref().and_then(LegacyKey::of) {
            self.unindex(&key, id);
        }
        removed
    }

    fn unindex(&mut self, key: &LegacyKey, id: Uuid) {
        if self.legacy_index.get(key) == Some(&id) {
            self.legacy_index.remove(key);
        }
    }

    /// Puts `id` back to how it was before a failed commit touched it.
    fn restore(&mut self, id: Uuid, previous: Option<Slot>) {
        self.delete(id);
        if let Some(slot) = previous {
            if let Some(key) = LegacyKey::of(&slot) {
                self.legacy_index.insert(key, id);
            }
            self.slots.insert(id, slot);
        }
    }
}

enum StagedWrite {
    Insert(Slot),
    Replace(Slot),
    Remove { id: Uuid, version: u64 },
}

/// Process-local slot store.
///
/// With transactions enabled every transaction holds the mutex of each
/// provider day it covers, so check-then-write sequences on the same day are
/// serialized. Without them, commits are still atomic and version checked but
/// reads are not isolated.
pub struct InMemorySlotStore {
    table: Arc<RwLock<SlotTable>>,
    day_locks: DashMap<DayKey, Arc<Mutex<()>>>,
    transactional: bool,
    lock_timeout: Duration,
}

impl InMemorySlotStore {
    pub fn new(transactional: bool, lock_timeout_ms: u64) -> Self {
        Self {
            table: Arc::new(RwLock::new(SlotTable::default())),
            day_locks: DashMap::new(),
            transactional,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
        }
    }

    async fn lock_days(&self, days: &[DayKey]) -> Result<Vec<OwnedMutexGuard<()>>, StoreError> {
        if self.day_locks.len() > LOCK_TABLE_PRUNE_THRESHOLD {
            self.day_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        // Sorted acquisition order keeps multi-day transactions deadlock free.
        let mut days = days.to_vec();
        days.sort();
        days.dedup();

        let mut guards = Vec::with_capacity(days.len());
        for day in &days {
            let lock = self
                .day_locks
                .entry(*day)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();

            let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
                .await
                .map_err(|_| {
                    warn!("Timed out after {:?} waiting for day lock {}", self.lock_timeout, day);
                    StoreError::Timeout(day.to_string())
                })?;
            guards.push(guard);
        }
        Ok(guards)
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    fn supports_transactions(&self) -> bool {
        self.transactional
    }

    async fn get(&self, id: Uuid) -> Result<Option<Slot>, StoreError> {
        Ok(self.table.read().await.slots.get(&id).cloned())
    }

    async fn find(&self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError> {
        let table = self.table.read().await;
        let mut slots: Vec<Slot> = table
            .slots
            .values()
            .filter(|slot| filter.matches(slot))
            .cloned()
            .collect();
        slots.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));
        Ok(slots)
    }

    async fn begin(&self, days: &[DayKey]) -> Result<Box<dyn SlotTransaction>, StoreError> {
        let guards = if self.transactional {
            self.lock_days(days).await?
        } else {
            Vec::new()
        };
        debug!("Opened slot transaction over {} day(s)", days.len());

        Ok(Box::new(MemoryTransaction {
            table: Arc::clone(&self.table),
            _guards: guards,
            overlay: HashMap::new(),
            writes: Vec::new(),
        }))
    }
}

pub struct MemoryTransaction {
    table: Arc<RwLock<SlotTable>>,
    _guards: Vec<OwnedMutexGuard<()>>,
    /// Staged view of touched documents; `None` marks a staged removal.
    overlay: HashMap<Uuid, Option<Slot>>,
    writes: Vec<StagedWrite>,
}

impl MemoryTransaction {
    async fn visible<F>(&self, keep: F) -> Vec<Slot>
    where
        F: Fn(&Slot) -> bool,
    {
        let table = self.table.read().await;
        let committed = table
            .slots
            .values()
            .filter(|slot| !self.overlay.contains_key(&slot.id))
            .filter(|slot| keep(*slot))
            .cloned();
        let staged = self.overlay.values().flatten().filter(|slot| keep(*slot)).cloned();
        committed.chain(staged).collect()
    }

    fn apply(table: &mut SlotTable, write: StagedWrite) -> Result<(Uuid, Option<Slot>, Option<Slot>), StoreError> {
        let now = Utc::now();
        match write {
            StagedWrite::Insert(mut slot) => {
                if table.slots.contains_key(&slot.id) {
                    return Err(StoreError::DuplicateKey(format!("slot {} already exists", slot.id)));
                }
                slot.version = 1;
                let id = slot.id;
                let previous = table.upsert(slot.clone())?;
                Ok((id, previous, Some(slot)))
            }
            StagedWrite::Replace(mut slot) => {
                let current = table.slots.get(&slot.id).map(|s| s.version);
                if current != Some(slot.version) {
                    return Err(StoreError::WriteConflict(slot.id));
                }
                slot.version += 1;
                slot.updated_at = now;
                let id = slot.id;
                let previous = table.upsert(slot.clone())?;
                Ok((id, previous, Some(slot)))
            }
            StagedWrite::Remove { id, version } => {
                let current = table.slots.get(&id).map(|s| s.version);
                if current != Some(version) {
                    return Err(StoreError::WriteConflict(id));
                }
                let previous = table.delete(id);
                Ok((id, previous, None))
            }
        }
    }
}

#[async_trait]
impl SlotTransaction for MemoryTransaction {
    async fn get(&mut self, id: Uuid) -> Result<Option<Slot>, StoreError> {
        if let Some(staged) = self.overlay.get(&id) {
            return Ok(staged.clone());
        }
        Ok(self.table.read().await.slots.get(&id).cloned())
    }

    async fn active_in_scope(
        &mut self,
        scope: &SlotScope,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Slot>, StoreError> {
        Ok(self
            .visible(|slot| slot.is_active && slot.scope() == *scope && Some(slot.id) != exclude)
            .await)
    }

    async fn count_active_on_day(
        &mut self,
        day: &DayKey,
        exclude: Option<Uuid>,
    ) -> Result<usize, StoreError> {
        Ok(self
            .visible(|slot| slot.is_active && slot.day_key() == *day && Some(slot.id) != exclude)
            .await
            .len())
    }

    fn insert(&mut self, slot: Slot) {
        self.overlay.insert(slot.id, Some(slot.clone()));
        self.writes.push(StagedWrite::Insert(slot));
    }

    fn replace(&mut self, slot: Slot) {
        self.overlay.insert(slot.id, Some(slot.clone()));
        self.writes.push(StagedWrite::Replace(slot));
    }

    fn remove(&mut self, slot: &Slot) {
        self.overlay.insert(slot.id, None);
        self.writes.push(StagedWrite::Remove {
            id: slot.id,
            version: slot.version,
        });
    }

    async fn commit(self: Box<Self>) -> Result<Vec<Slot>, StoreError> {
        let this = *self;
        let mut table = this.table.write().await;

        let mut undo: Vec<(Uuid, Option<Slot>)> = Vec::with_capacity(this.writes.len());
        let mut committed = Vec::new();

        for write in this.writes {
            match Self::apply(&mut table, write) {
                Ok((id, previous, current)) => {
                    undo.push((id, previous));
                    committed.extend(current);
                }
                Err(e) => {
                    for (id, previous) in undo.into_iter().rev() {
                        table.restore(id, previous);
                    }
                    debug!("Rolled back slot transaction: {}", e);
                    return Err(e);
                }
            }
        }

        debug!("Committed {} slot write(s)", committed.len());
        Ok(committed)
    }
}
