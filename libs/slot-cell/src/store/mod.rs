//! Slot persistence.
//!
//! A [`SlotStore`] hands out [`SlotTransaction`]s scoped to a set of provider
//! days. Reads inside a transaction see committed state overlaid with the
//! transaction's own staged writes; nothing becomes visible to other readers
//! until [`SlotTransaction::commit`] succeeds.

pub mod memory;
pub mod postgrest;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use shared_config::{AppConfig, SlotStoreBackend};
use shared_database::supabase::{DatabaseError, SupabaseClient};

use crate::models::{DayKey, Slot, SlotFilter, SlotScope};

pub use memory::InMemorySlotStore;
pub use postgrest::PostgrestSlotStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique index rejected the write.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The document changed since it was read.
    #[error("Write conflict on slot {0}")]
    WriteConflict(Uuid),

    #[error("Timed out waiting for lock on {0}")]
    Timeout(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Corrupt slot record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Errors worth retrying the whole attempt for.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::WriteConflict(_))
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        if err.is_unique_violation() {
            StoreError::DuplicateKey(err.to_string())
        } else if let DatabaseError::Decode(e) = err {
            StoreError::Corrupt(e.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Whether a transaction isolates its reads and writes from concurrent ones.
    /// Stores without this guarantee only offer single-statement commits and
    /// optimistic version checks.
    fn supports_transactions(&self) -> bool;

    async fn get(&self, id: Uuid) -> Result<Option<Slot>, StoreError>;

    async fn find(&self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError>;

    /// Opens a transaction covering the given provider days. Transactional
    /// stores hold a lock on every day until the transaction is committed or dropped.
    async fn begin(&self, days: &[DayKey]) -> Result<Box<dyn SlotTransaction>, StoreError>;
}

#[async_trait]
pub trait SlotTransaction: Send {
    async fn get(&mut self, id: Uuid) -> Result<Option<Slot>, StoreError>;

    /// Active slots in `scope`, optionally skipping one document.
    async fn active_in_scope(
        &mut self,
        scope: &SlotScope,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Slot>, StoreError>;

    /// Number of active slots a provider has on a day, across all scopes.
    async fn count_active_on_day(
        &mut self,
        day: &DayKey,
        exclude: Option<Uuid>,
    ) -> Result<usize, StoreError>;

    fn insert(&mut self, slot: Slot);

    /// Stages a new revision of an existing slot. `slot.version` must be the
    /// version that was read; the store bumps it on commit.
    fn replace(&mut self, slot: Slot);

    /// Stages removal of the given revision.
    fn remove(&mut self, slot: &Slot);

    /// Applies every staged write at once, or none of them.
    async fn commit(self: Box<Self>) -> Result<Vec<Slot>, StoreError>;
}

/// Builds the configured backend.
pub fn from_config(config: &AppConfig) -> Arc<dyn SlotStore> {
    match config.slot_store {
        SlotStoreBackend::Memory => {
            info!(
                "Using in-memory slot store (transactions: {})",
                config.transactions_enabled
            );
            Arc::new(InMemorySlotStore::new(
                config.transactions_enabled,
                config.lock_timeout_ms,
            ))
        }
        SlotStoreBackend::Supabase => {
            if !config.is_supabase_configured() {
                warn!("SLOT_STORE=supabase but Supabase credentials are missing");
            }
            info!("Using PostgREST slot store at {}", config.supabase_url);
            Arc::new(PostgrestSlotStore::new(Arc::new(SupabaseClient::new(config))))
        }
    }
}
