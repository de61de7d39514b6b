use chrono::{DateTime, FixedOffset, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Fixed presentation offset (WIB, UTC+7). Storage and computation stay in UTC.
pub const DISPLAY_OFFSET_SECS: i32 = 7 * 3600;

/// Render a stored UTC timestamp in the local display timezone.
pub fn format_display_time(ts: DateTime<Utc>) -> String {
    let offset = FixedOffset::east_opt(DISPLAY_OFFSET_SECS).expect("valid fixed offset");
    ts.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S WIB").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn level(self) -> u8 {
        match self {
            RiskTier::Low => 0,
            RiskTier::Medium => 1,
            RiskTier::High => 2,
        }
    }

    pub fn from_level(level: u8) -> Self {
        match level {
            0 => RiskTier::Low,
            1 => RiskTier::Medium,
            _ => RiskTier::High,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskTier::Low => "Low",
            RiskTier::Medium => "Medium",
            RiskTier::High => "High",
        }
    }
}

impl Serialize for RiskTier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.level())
    }
}

impl<'de> Deserialize<'de> for RiskTier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let level = u8::deserialize(deserializer)?;
        if level > 2 {
            return Err(de::Error::custom(format!("invalid risk tier {}", level)));
        }
        Ok(RiskTier::from_level(level))
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub id: u64,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub browser: String,
    pub os: String,
    pub device_type: String,
    pub success: bool,
    pub risk_score: f64,
    pub risk_tier: RiskTier,
    pub asn: u32,
    pub region: String,
    pub if_score: f64,
    pub rule_score: f64,
    pub combined_score: f64,
}

#[derive(Debug, Clone)]
pub struct NewLoginAttempt {
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub browser: String,
    pub os: String,
    pub device_type: String,
    pub success: bool,
    pub risk_score: f64,
    pub risk_tier: RiskTier,
    pub asn: u32,
    pub region: String,
    pub if_score: f64,
    pub rule_score: f64,
    pub combined_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserBehavior {
    pub user_id: Uuid,
    pub last_login: Option<DateTime<Utc>>,
    pub success_count: u32,
    pub failed_count: u32,
}

impl UserBehavior {
    pub fn new(user_id: Uuid) -> Self {
        UserBehavior {
            user_id,
            last_login: None,
            success_count: 0,
            failed_count: 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AttemptSummary {
    pub timestamp: String,
    pub ip: String,
    pub browser: String,
    pub os: String,
    pub device_type: String,
    pub risk_tier: RiskTier,
}

impl From<&LoginAttempt> for AttemptSummary {
    fn from(attempt: &LoginAttempt) -> Self {
        AttemptSummary {
            timestamp: format_display_time(attempt.timestamp),
            ip: attempt.ip.clone(),
            browser: attempt.browser.clone(),
            os: attempt.os.clone(),
            device_type: attempt.device_type.clone(),
            risk_tier: attempt.risk_tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tier_levels_round_trip() {
        for tier in [RiskTier::Low, RiskTier::Medium, RiskTier::High] {
            assert_eq!(RiskTier::from_level(tier.level()), tier);
        }
        assert_eq!(RiskTier::from_level(7), RiskTier::High);
    }

    #[test]
    fn test_display_time_uses_wib_offset() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 17, 30, 0).unwrap();
        assert_eq!(format_display_time(ts), "2024-03-02 00:30:00 WIB");
    }
}
