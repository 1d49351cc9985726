use std::env;
use std::str::FromStr;
use tracing::warn;

/// Where slot documents are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStoreBackend {
    /// Process-local store with real multi-document transactions.
    Memory,
    /// Supabase PostgREST table; no multi-document transactions.
    Supabase,
}

impl FromStr for SlotStoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(SlotStoreBackend::Memory),
            "supabase" | "postgrest" => Ok(SlotStoreBackend::Supabase),
            other => Err(format!("unknown slot store backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub slot_store: SlotStoreBackend,
    pub transactions_enabled: bool,
    pub max_slots_per_day: usize,
    pub default_advance_booking_days: u32,
    pub max_bulk_slots: usize,
    pub transaction_max_retries: u32,
    pub lock_timeout_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            port: parse_or_default("PORT", 3000),
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            slot_store: parse_or_default("SLOT_STORE", SlotStoreBackend::Memory),
            transactions_enabled: parse_or_default("SLOT_TRANSACTIONS", true),
            max_slots_per_day: parse_or_default("MAX_SLOTS_PER_DAY", 50),
            default_advance_booking_days: parse_or_default("DEFAULT_ADVANCE_BOOKING_DAYS", 30),
            max_bulk_slots: parse_or_default("MAX_BULK_SLOTS", 100),
            transaction_max_retries: parse_or_default("TRANSACTION_MAX_RETRIES", 3),
            lock_timeout_ms: parse_or_default("SLOT_LOCK_TIMEOUT_MS", 5000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        if self.supabase_jwt_secret.is_empty() {
            return false;
        }
        match self.slot_store {
            SlotStoreBackend::Memory => true,
            SlotStoreBackend::Supabase => self.is_supabase_configured(),
        }
    }

    pub fn is_supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {:?}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
