use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OtpCode {
    pub id: u64,
    pub user_id: Uuid,
    pub email: String,
    pub encrypted_code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub attempt_count: u32,
    pub ip: String,
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct NewOtpCode {
    pub user_id: Uuid,
    pub email: String,
    pub encrypted_code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip: String,
    pub session_id: String,
}

/// Snapshot of the most recent code for a `(user, session)` pair.
#[derive(Debug, Clone, Serialize)]
pub struct OtpStatus {
    pub exists: bool,
    pub used: bool,
    pub expired: bool,
    pub seconds_remaining: i64,
    pub attempts_remaining: u32,
}

/// Result of a single verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpVerification {
    Valid,
    Invalid { remaining: u32 },
    Expired,
    Exhausted,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}
