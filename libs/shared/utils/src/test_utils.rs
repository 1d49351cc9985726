use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::{AppConfig, SlotStoreBackend};
use shared_models::auth::{HospitalData, User};

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub slot_store: SlotStoreBackend,
    pub transactions_enabled: bool,
    pub max_slots_per_day: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            slot_store: SlotStoreBackend::Memory,
            transactions_enabled: true,
            max_slots_per_day: 50,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            port: 0,
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            slot_store: self.slot_store,
            transactions_enabled: self.transactions_enabled,
            max_slots_per_day: self.max_slots_per_day,
            default_advance_booking_days: 30,
            max_bulk_slots: 100,
            transaction_max_retries: 3,
            lock_timeout_ms: 2000,
        }
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub is_verified: bool,
    pub hospital_data: Option<HospitalData>,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
            is_verified: false,
            hospital_data: None,
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
            is_verified: true,
            hospital_data: None,
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn lab(email: &str) -> Self {
        Self::new(email, "lab")
    }

    pub fn patient(email: &str) -> Self {
        Self {
            is_verified: false,
            ..Self::new(email, "patient")
        }
    }

    pub fn hospital(email: &str) -> Self {
        Self {
            hospital_data: Some(HospitalData::default()),
            ..Self::new(email, "hospital")
        }
    }

    pub fn chain_hospital(branch_ids: Vec<String>) -> Self {
        Self {
            hospital_data: Some(HospitalData {
                is_chain: true,
                parent_hospital_id: None,
                branch_ids,
            }),
            ..Self::new("chain@example.com", "hospital")
        }
    }

    pub fn hospital_branch(parent_id: &str) -> Self {
        Self {
            hospital_data: Some(HospitalData {
                is_chain: true,
                parent_hospital_id: Some(parent_id.to_string()),
                branch_ids: Vec::new(),
            }),
            ..Self::new("branch@example.com", "hospital")
        }
    }

    pub fn unverified(mut self) -> Self {
        self.is_verified = false;
        self
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            is_verified: self.is_verified,
            hospital_data: self.hospital_data.clone(),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }

    fn app_metadata(&self) -> Value {
        json!({
            "is_verified": self.is_verified,
            "hospital_data": self.hospital_data,
        })
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "app_metadata": user.app_metadata(),
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }
}

/// Row shapes as PostgREST returns them for the `slots` table.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn legacy_slot_row(id: &str, provider_id: &str, date: &str, start: &str, end: &str) -> Value {
        json!({
            "id": id,
            "provider_id": provider_id,
            "location_id": null,
            "provider_role": "doctor",
            "entity_type": "OPD",
            "date": format!("{}T00:00:00+00:00", date),
            "mode": "legacy",
            "start_time": start,
            "end_time": end,
            "capacity": 5,
            "booked": 0,
            "time_slots": null,
            "advance_booking_days": 30,
            "metadata": {},
            "is_active": true,
            "created_by": provider_id,
            "updated_by": provider_id,
            "created_at": "2026-01-01T00:00:00+00:00",
            "updated_at": "2026-01-01T00:00:00+00:00",
            "version": 1
        })
    }

    pub fn unique_violation() -> Value {
        json!({
            "code": "23505",
            "details": "Key already exists.",
            "hint": null,
            "message": "duplicate key value violates unique constraint \"slots_legacy_scope_key\""
        })
    }
}
