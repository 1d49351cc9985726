use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// How a hospital account is organised. Only hospital accounts carry this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HospitalData {
    #[serde(default)]
    pub is_chain: bool,
    /// Set on branch accounts: the chain parent that manages this branch.
    #[serde(default)]
    pub parent_hospital_id: Option<String>,
    /// Set on chain parents: the branch accounts they manage.
    #[serde(default)]
    pub branch_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub hospital_data: Option<HospitalData>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}
