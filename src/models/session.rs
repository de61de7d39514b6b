use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::attempt::RiskTier;
use crate::risk::RiskAssessment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    None,
    Otp,
    OtpKba,
}

/// Ephemeral per-login session owned by the coordinator. Destroyed on logout
/// or after the idle timeout.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub session_id: String,
    pub user_id: Uuid,
    pub username: String,
    pub tier: RiskTier,
    pub risk_score: f64,
    pub needs_verification: bool,
    pub verification_type: VerificationType,
    pub otp_verified: bool,
    pub assessment: Option<RiskAssessment>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl AuthSession {
    pub fn is_verified(&self) -> bool {
        !self.needs_verification
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub username: String,
    pub risk_tier: RiskTier,
    pub risk_label: String,
    pub risk_score: f64,
    pub recent_logins: Vec<super::AttemptSummary>,
}
