use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::errors::AuthError;
use crate::models::{
    LoginAttempt, NewLoginAttempt, NewOtpCode, NewUser, OtpCode, User, UserBehavior,
};

// In-memory backend for testing/development.
//
// Attempts and behavior counters live behind one lock so a login either
// commits both writes or neither.
pub struct MemoryDb {
    users: Mutex<HashMap<Uuid, User>>,
    history: Mutex<HistoryState>,
    otp: Mutex<OtpState>,
}

#[derive(Default)]
struct HistoryState {
    attempts: Vec<LoginAttempt>,
    behavior: HashMap<Uuid, UserBehavior>,
    next_id: u64,
}

#[derive(Default)]
struct OtpState {
    codes: Vec<OtpCode>,
    next_id: u64,
}

impl MemoryDb {
    pub fn new() -> Self {
        MemoryDb {
            users: Mutex::new(HashMap::new()),
            history: Mutex::new(HistoryState::default()),
            otp: Mutex::new(OtpState::default()),
        }
    }

    // User methods
    pub async fn create_user(&self, user: NewUser) -> Result<User, AuthError> {
        let user = User {
            id: user.id,
            username: user.username,
            password_hash: user.password_hash,
            email: user.email,
            kba_question: user.kba_question,
            kba_answer: user.kba_answer,
            created_at: Utc::now(),
        };

        {
            let mut users = self.users.lock().unwrap();
            users.insert(user.id, user.clone());
        }
        {
            let mut history = self.history.lock().unwrap();
            history
                .behavior
                .entry(user.id)
                .or_insert_with(|| UserBehavior::new(user.id));
        }

        Ok(user)
    }

    pub async fn find_user_by_id(&self, id: Uuid) -> Result<User, AuthError> {
        let users = self.users.lock().unwrap();
        users.get(&id).cloned().ok_or(AuthError::UserNotFound)
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<User, AuthError> {
        let users = self.users.lock().unwrap();
        users
            .values()
            .find(|user| user.username == username)
            .cloned()
            .ok_or(AuthError::UserNotFound)
    }

    pub async fn user_exists_by_username(&self, username: &str) -> Result<bool, AuthError> {
        let users = self.users.lock().unwrap();
        Ok(users.values().any(|user| user.username == username))
    }

    // History methods
    pub async fn append_attempt(
        &self,
        attempt: NewLoginAttempt,
    ) -> Result<LoginAttempt, AuthError> {
        let mut history = self.history.lock().unwrap();
        history.next_id += 1;
        let record = LoginAttempt {
            id: history.next_id,
            user_id: attempt.user_id,
            timestamp: attempt.timestamp,
            ip: attempt.ip,
            user_agent: attempt.user_agent,
            browser: attempt.browser,
            os: attempt.os,
            device_type: attempt.device_type,
            success: attempt.success,
            risk_score: attempt.risk_score,
            risk_tier: attempt.risk_tier,
            asn: attempt.asn,
            region: attempt.region,
            if_score: attempt.if_score,
            rule_score: attempt.rule_score,
            combined_score: attempt.combined_score,
        };

        let behavior = history
            .behavior
            .entry(record.user_id)
            .or_insert_with(|| UserBehavior::new(record.user_id));
        if record.success {
            behavior.success_count += 1;
            behavior.last_login = Some(record.timestamp);
        } else {
            behavior.failed_count += 1;
        }

        history.attempts.push(record.clone());
        Ok(record)
    }

    pub async fn recent_successful(
        &self,
        user_id: Uuid,
        up_to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LoginAttempt>, AuthError> {
        Ok(self.recent(user_id, up_to, limit, true))
    }

    pub async fn recent_all(
        &self,
        user_id: Uuid,
        up_to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LoginAttempt>, AuthError> {
        Ok(self.recent(user_id, up_to, limit, false))
    }

    fn recent(
        &self,
        user_id: Uuid,
        up_to: DateTime<Utc>,
        limit: usize,
        successful_only: bool,
    ) -> Vec<LoginAttempt> {
        let history = self.history.lock().unwrap();
        let mut matches: Vec<LoginAttempt> = history
            .attempts
            .iter()
            .filter(|a| a.user_id == user_id && a.timestamp < up_to)
            .filter(|a| !successful_only || a.success)
            .cloned()
            .collect();
        // Newest first; insertion id breaks timestamp ties
        matches.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        matches.truncate(limit);
        matches
    }

    pub async fn count_successful_by_day(
        &self,
        user_id: Uuid,
        up_to: DateTime<Utc>,
        days: i64,
    ) -> Result<BTreeMap<NaiveDate, u32>, AuthError> {
        let since = up_to - Duration::days(days);
        let history = self.history.lock().unwrap();
        let mut buckets: BTreeMap<NaiveDate, u32> = BTreeMap::new();
        for attempt in history
            .attempts
            .iter()
            .filter(|a| a.user_id == user_id && a.success)
            .filter(|a| a.timestamp >= since && a.timestamp < up_to)
        {
            *buckets.entry(attempt.timestamp.date_naive()).or_insert(0) += 1;
        }
        Ok(buckets)
    }

    pub async fn behavior(&self, user_id: Uuid) -> Result<UserBehavior, AuthError> {
        let history = self.history.lock().unwrap();
        Ok(history
            .behavior
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserBehavior::new(user_id)))
    }

    // OTP methods
    pub async fn insert_otp(&self, code: NewOtpCode) -> Result<OtpCode, AuthError> {
        let mut otp = self.otp.lock().unwrap();
        otp.next_id += 1;
        let record = OtpCode {
            id: otp.next_id,
            user_id: code.user_id,
            email: code.email,
            encrypted_code: code.encrypted_code,
            created_at: code.created_at,
            expires_at: code.expires_at,
            used: false,
            attempt_count: 0,
            ip: code.ip,
            session_id: code.session_id,
        };
        otp.codes.push(record.clone());
        Ok(record)
    }

    pub async fn latest_otp(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<Option<OtpCode>, AuthError> {
        let otp = self.otp.lock().unwrap();
        Ok(otp
            .codes
            .iter()
            .filter(|c| c.user_id == user_id && c.session_id == session_id)
            .max_by_key(|c| (c.created_at, c.id))
            .cloned())
    }

    pub async fn supersede_active_otps(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<usize, AuthError> {
        let mut otp = self.otp.lock().unwrap();
        let mut superseded = 0;
        for code in otp
            .codes
            .iter_mut()
            .filter(|c| c.user_id == user_id && c.session_id == session_id && !c.used)
        {
            code.used = true;
            superseded += 1;
        }
        Ok(superseded)
    }

    pub async fn invalidate_user_otps(&self, user_id: Uuid) -> Result<usize, AuthError> {
        let mut otp = self.otp.lock().unwrap();
        let mut invalidated = 0;
        for code in otp
            .codes
            .iter_mut()
            .filter(|c| c.user_id == user_id && !c.used)
        {
            code.used = true;
            invalidated += 1;
        }
        Ok(invalidated)
    }

    pub async fn increment_otp_attempts(&self, id: u64) -> Result<u32, AuthError> {
        let mut otp = self.otp.lock().unwrap();
        let code = otp
            .codes
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(AuthError::OtpNotFound)?;
        code.attempt_count += 1;
        Ok(code.attempt_count)
    }

    pub async fn mark_otp_used(&self, id: u64) -> Result<(), AuthError> {
        let mut otp = self.otp.lock().unwrap();
        let code = otp
            .codes
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(AuthError::OtpNotFound)?;
        code.used = true;
        Ok(())
    }

    pub async fn count_otps_since(
        &self,
        user_id: Uuid,
        ip: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, AuthError> {
        let otp = self.otp.lock().unwrap();
        Ok(otp
            .codes
            .iter()
            .filter(|c| (c.user_id == user_id || c.ip == ip) && c.created_at > since)
            .count() as u32)
    }

    pub async fn delete_expired_otps(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let mut otp = self.otp.lock().unwrap();
        let before = otp.codes.len();
        otp.codes.retain(|c| c.expires_at >= now);
        Ok(before - otp.codes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskTier;
    use chrono::TimeZone;

    fn attempt_at(
        user_id: Uuid,
        ts: DateTime<Utc>,
        success: bool,
    ) -> NewLoginAttempt {
        NewLoginAttempt {
            user_id,
            timestamp: ts,
            ip: "203.0.113.10".to_string(),
            user_agent: "test-agent".to_string(),
            browser: "Chrome".to_string(),
            os: "Windows".to_string(),
            device_type: "desktop".to_string(),
            success,
            risk_score: 0.1,
            risk_tier: RiskTier::Low,
            asn: 38496,
            region: "Bali".to_string(),
            if_score: 0.1,
            rule_score: 0.1,
            combined_score: 0.1,
        }
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_strictly_before() {
        let db = MemoryDb::new();
        let user_id = Uuid::new_v4();
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

        for i in 0..5 {
            db.append_attempt(attempt_at(user_id, base + Duration::minutes(i), true))
                .await
                .unwrap();
        }

        let up_to = base + Duration::minutes(3);
        let recent = db.recent_successful(user_id, up_to, 50).await.unwrap();
        // Strictly before up_to: minutes 0, 1, 2
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, base + Duration::minutes(2));
        assert_eq!(recent[2].timestamp, base);
    }

    #[tokio::test]
    async fn test_timestamp_ties_break_by_insertion_id() {
        let db = MemoryDb::new();
        let user_id = Uuid::new_v4();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

        let first = db.append_attempt(attempt_at(user_id, ts, true)).await.unwrap();
        let second = db.append_attempt(attempt_at(user_id, ts, true)).await.unwrap();

        let recent = db
            .recent_successful(user_id, ts + Duration::seconds(1), 50)
            .await
            .unwrap();
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].id, first.id);
    }

    #[tokio::test]
    async fn test_behavior_counters_update_with_append() {
        let db = MemoryDb::new();
        let user_id = Uuid::new_v4();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

        db.append_attempt(attempt_at(user_id, ts, true)).await.unwrap();
        db.append_attempt(attempt_at(user_id, ts + Duration::minutes(1), false))
            .await
            .unwrap();

        let behavior = db.behavior(user_id).await.unwrap();
        assert_eq!(behavior.success_count, 1);
        assert_eq!(behavior.failed_count, 1);
        assert_eq!(behavior.last_login, Some(ts));
    }

    #[tokio::test]
    async fn test_day_buckets() {
        let db = MemoryDb::new();
        let user_id = Uuid::new_v4();
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

        db.append_attempt(attempt_at(user_id, base, true)).await.unwrap();
        db.append_attempt(attempt_at(user_id, base + Duration::hours(2), true))
            .await
            .unwrap();
        db.append_attempt(attempt_at(user_id, base + Duration::days(1), true))
            .await
            .unwrap();
        // Failure does not count toward the day bucket
        db.append_attempt(attempt_at(user_id, base + Duration::days(1), false))
            .await
            .unwrap();

        let buckets = db
            .count_successful_by_day(user_id, base + Duration::days(2), 30)
            .await
            .unwrap();
        assert_eq!(buckets.get(&base.date_naive()), Some(&2));
        assert_eq!(buckets.get(&(base + Duration::days(1)).date_naive()), Some(&1));
    }

    #[tokio::test]
    async fn test_supersede_marks_only_session_codes() {
        let db = MemoryDb::new();
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let new_code = |session: &str| NewOtpCode {
            user_id,
            email: "user@example.com".to_string(),
            encrypted_code: "ciphertext".to_string(),
            created_at: now,
            expires_at: now + Duration::minutes(3),
            ip: "203.0.113.10".to_string(),
            session_id: session.to_string(),
        };

        db.insert_otp(new_code("session-a")).await.unwrap();
        db.insert_otp(new_code("session-b")).await.unwrap();

        let superseded = db.supersede_active_otps(user_id, "session-a").await.unwrap();
        assert_eq!(superseded, 1);

        let a = db.latest_otp(user_id, "session-a").await.unwrap().unwrap();
        let b = db.latest_otp(user_id, "session-b").await.unwrap().unwrap();
        assert!(a.used);
        assert!(!b.used);
    }
}
