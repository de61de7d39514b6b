use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::config::PairwiseConfig;
use crate::db::DatabaseConnection;
use crate::errors::AuthError;
use crate::features::{AttemptContext, FeatureEngine};
use crate::geo::{GeoInfo, GeoResolver};
use crate::models::{
    AttemptSummary, AuthSession, DashboardResponse, LoginForm, NewLoginAttempt, NewUser,
    OtpStatus, OtpVerification, ProfileResponse, RegisterForm, RiskTier, User,
    VerificationType, format_display_time,
};
use crate::risk::{IsolationScorer, RiskAssessment, RiskCombiner};
use crate::services::otp::OtpService;
use crate::utils::agent::parse_user_agent;
use crate::utils::password::{hash_password, verify_password};
use crate::utils::validation::{
    normalize_kba_answer, validate_email, validate_password, validate_username,
};

/// Geolocation lookups are best-effort; past this bound the login proceeds
/// with unknown network data.
const GEO_TIMEOUT: StdDuration = StdDuration::from_secs(3);

/// Where a successful credential check lands the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Verified { session_id: String },
    StepUpOtp { session_id: String },
    StepUpOtpKba { session_id: String },
}

impl LoginOutcome {
    pub fn session_id(&self) -> &str {
        match self {
            LoginOutcome::Verified { session_id }
            | LoginOutcome::StepUpOtp { session_id }
            | LoginOutcome::StepUpOtpKba { session_id } => session_id,
        }
    }
}

/// Result of submitting a code during step-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepUpProgress {
    /// Session is fully verified.
    Complete,
    /// Code accepted; the knowledge-based answer is still pending.
    OtpAccepted,
    Rejected(OtpVerification),
}

/// Drives a session through `Anonymous -> StepUp? -> Verified`, recording
/// every attempt with its scores along the way. Owns the ephemeral session
/// store; sessions idle past the TTL fall back to anonymous and lose their
/// active codes.
pub struct AuthCoordinator {
    db: Arc<DatabaseConnection>,
    features: FeatureEngine,
    scorer: Arc<IsolationScorer>,
    combiner: RiskCombiner,
    otp: Arc<OtpService>,
    geo: Arc<dyn GeoResolver>,
    sessions: Mutex<HashMap<String, AuthSession>>,
    session_ttl: Duration,
}

impl AuthCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        scorer: Arc<IsolationScorer>,
        combiner: RiskCombiner,
        otp: Arc<OtpService>,
        geo: Arc<dyn GeoResolver>,
        pairwise: PairwiseConfig,
        session_ttl_minutes: i64,
    ) -> Self {
        AuthCoordinator {
            features: FeatureEngine::new(db.clone(), pairwise),
            db,
            scorer,
            combiner,
            otp,
            geo,
            sessions: Mutex::new(HashMap::new()),
            session_ttl: Duration::minutes(session_ttl_minutes),
        }
    }

    pub async fn register(&self, form: RegisterForm) -> Result<User, AuthError> {
        if form.kba_question.trim().is_empty() || form.kba_answer.trim().is_empty() {
            return Err(AuthError::ValidationError(
                "Security question and answer are required".into(),
            ));
        }
        validate_username(&form.username)?;
        validate_email(&form.email)?;
        validate_password(&form.password)?;
        if form.password != form.confirm_password {
            return Err(AuthError::ValidationError("Passwords do not match".into()));
        }

        if self.db.user_exists_by_username(&form.username).await? {
            return Err(AuthError::UsernameExists);
        }

        let password_hash = hash_password(&form.password)?;
        let user = self
            .db
            .create_user(NewUser {
                id: Uuid::new_v4(),
                username: form.username,
                password_hash,
                email: form.email,
                kba_question: form.kba_question,
                kba_answer: normalize_kba_answer(&form.kba_answer),
            })
            .await?;

        Ok(user)
    }

    /// Authenticate credentials, score the attempt and route the session into
    /// the verification flow its tier requires.
    pub async fn login(
        &self,
        form: LoginForm,
        ip: &str,
        user_agent: &str,
    ) -> Result<LoginOutcome, AuthError> {
        let user = match self.db.find_user_by_username(&form.username).await {
            Ok(user) => user,
            Err(AuthError::UserNotFound) => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(e),
        };

        if !verify_password(&form.password, &user.password_hash)? {
            self.record_failed_attempt(&user, ip, user_agent).await?;
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        let agent = parse_user_agent(user_agent);
        let geo = self.resolve_geo(ip).await;

        let ctx = AttemptContext {
            user_id: user.id,
            timestamp: now,
            browser: agent.browser.clone(),
            os: agent.os.clone(),
            device_type: agent.device_type.clone(),
            asn: geo.asn,
            region: geo.region.clone(),
        };

        // Features read a snapshot strictly before `now`; the attempt's own
        // row is written only afterwards.
        let features = self.features.compute(&ctx).await?;
        let if_score = self.scorer.score(&features.as_array());
        let assessment = self.combiner.combine(if_score, &features);

        self.db
            .append_attempt(NewLoginAttempt {
                user_id: user.id,
                timestamp: now,
                ip: ip.to_string(),
                user_agent: user_agent.to_string(),
                browser: agent.browser,
                os: agent.os,
                device_type: agent.device_type,
                success: true,
                risk_score: assessment.combined_score,
                risk_tier: assessment.tier,
                asn: geo.asn,
                region: geo.region,
                if_score: assessment.if_score,
                rule_score: assessment.rule_score,
                combined_score: assessment.combined_score,
            })
            .await?;

        let session_id = Uuid::new_v4().to_string();
        let (needs_verification, verification_type) = match assessment.tier {
            RiskTier::Low => (false, VerificationType::None),
            RiskTier::Medium => (true, VerificationType::Otp),
            RiskTier::High => (true, VerificationType::OtpKba),
        };

        if needs_verification {
            if let Err(e) = self
                .otp
                .issue(user.id, &user.username, &user.email, ip, &session_id)
                .await
            {
                log::warn!(
                    "Could not issue verification code for {}: {}",
                    user.username,
                    e
                );
            }
        }

        let tier = assessment.tier;
        let session = AuthSession {
            session_id: session_id.clone(),
            user_id: user.id,
            username: user.username,
            tier,
            risk_score: assessment.combined_score,
            needs_verification,
            verification_type,
            otp_verified: false,
            assessment: Some(assessment),
            created_at: now,
            last_seen: now,
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), session);

        Ok(match tier {
            RiskTier::Low => LoginOutcome::Verified { session_id },
            RiskTier::Medium => LoginOutcome::StepUpOtp { session_id },
            RiskTier::High => LoginOutcome::StepUpOtpKba { session_id },
        })
    }

    async fn record_failed_attempt(
        &self,
        user: &User,
        ip: &str,
        user_agent: &str,
    ) -> Result<(), AuthError> {
        let agent = parse_user_agent(user_agent);
        self.db
            .append_attempt(NewLoginAttempt {
                user_id: user.id,
                timestamp: Utc::now(),
                ip: ip.to_string(),
                user_agent: user_agent.to_string(),
                browser: agent.browser,
                os: agent.os,
                device_type: agent.device_type,
                success: false,
                risk_score: 0.0,
                risk_tier: RiskTier::High,
                asn: 0,
                region: "Unknown".to_string(),
                if_score: 0.0,
                rule_score: 0.0,
                combined_score: 0.0,
            })
            .await?;
        Ok(())
    }

    async fn resolve_geo(&self, ip: &str) -> GeoInfo {
        let resolver = self.geo.clone();
        let ip_owned = ip.to_string();
        let lookup = tokio::task::spawn_blocking(move || resolver.lookup(&ip_owned));

        match tokio::time::timeout(GEO_TIMEOUT, lookup).await {
            Ok(Ok(Ok(info))) => info,
            Ok(Ok(Err(e))) => {
                log::debug!("Geolocation lookup failed for {}: {}", ip, e);
                GeoInfo::default()
            }
            Ok(Err(e)) => {
                log::warn!("Geolocation task failed: {}", e);
                GeoInfo::default()
            }
            Err(_) => {
                log::warn!("Geolocation lookup timed out for {}", ip);
                GeoInfo::default()
            }
        }
    }

    /// Look up a session and refresh its idle timer. An expired session is
    /// torn down together with the user's active codes.
    pub async fn touch_session(&self, session_id: &str) -> Result<AuthSession, AuthError> {
        let now = Utc::now();
        let expired_user = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get_mut(session_id) {
                None => return Err(AuthError::SessionInvalid),
                Some(session) if now - session.last_seen > self.session_ttl => {
                    let user_id = session.user_id;
                    sessions.remove(session_id);
                    Some(user_id)
                }
                Some(session) => {
                    session.last_seen = now;
                    return Ok(session.clone());
                }
            }
        };

        if let Some(user_id) = expired_user {
            self.otp.invalidate(user_id).await?;
        }
        Err(AuthError::SessionInvalid)
    }

    /// Submit a one-time code for either step-up variant.
    pub async fn verify_otp(
        &self,
        session_id: &str,
        code: &str,
    ) -> Result<StepUpProgress, AuthError> {
        let session = self.touch_session(session_id).await?;
        if !session.needs_verification {
            return Ok(StepUpProgress::Complete);
        }

        match self.otp.verify(session.user_id, session_id, code).await? {
            OtpVerification::Valid => {
                let kba_pending = session.verification_type == VerificationType::OtpKba;
                let mut sessions = self.sessions.lock().unwrap();
                if let Some(state) = sessions.get_mut(session_id) {
                    if kba_pending {
                        state.otp_verified = true;
                    } else {
                        state.needs_verification = false;
                        state.verification_type = VerificationType::None;
                    }
                }
                Ok(if kba_pending {
                    StepUpProgress::OtpAccepted
                } else {
                    StepUpProgress::Complete
                })
            }
            rejection => Ok(StepUpProgress::Rejected(rejection)),
        }
    }

    /// The security question to present during the knowledge-based stage.
    pub async fn security_question(&self, session_id: &str) -> Result<String, AuthError> {
        let session = self.touch_session(session_id).await?;
        let user = self.db.find_user_by_id(session.user_id).await?;
        Ok(user.kba_question)
    }

    /// Submit the knowledge-based answer, the final stage for high-risk
    /// sessions. Comparison is lowercased and trimmed on both sides.
    pub async fn verify_kba(&self, session_id: &str, answer: &str) -> Result<bool, AuthError> {
        let session = self.touch_session(session_id).await?;
        if session.verification_type != VerificationType::OtpKba || !session.otp_verified {
            return Err(AuthError::SessionInvalid);
        }

        let user = self.db.find_user_by_id(session.user_id).await?;
        if normalize_kba_answer(answer) != user.kba_answer {
            return Ok(false);
        }

        let mut sessions = self.sessions.lock().unwrap();
        if let Some(state) = sessions.get_mut(session_id) {
            state.needs_verification = false;
            state.verification_type = VerificationType::None;
            state.otp_verified = false;
        }
        Ok(true)
    }

    /// Re-issue the session's code, subject to the service rate limit.
    pub async fn resend_otp(&self, session_id: &str, ip: &str) -> Result<String, AuthError> {
        let session = self.touch_session(session_id).await?;
        if !session.needs_verification {
            return Err(AuthError::SessionInvalid);
        }

        let user = self.db.find_user_by_id(session.user_id).await?;
        let issued = self
            .otp
            .issue(user.id, &user.username, &user.email, ip, session_id)
            .await?;
        Ok(format!(
            "A new verification code was sent to {}. It expires at {}.",
            user.email,
            format_display_time(issued.expires_at)
        ))
    }

    pub async fn otp_status(&self, session_id: &str) -> Result<Option<OtpStatus>, AuthError> {
        let session = self.touch_session(session_id).await?;
        self.otp.status(session.user_id, session_id).await
    }

    /// Drop the session and invalidate the user's active codes.
    pub async fn logout(&self, session_id: &str) -> Result<(), AuthError> {
        let removed = self.sessions.lock().unwrap().remove(session_id);
        if let Some(session) = removed {
            self.otp.invalidate(session.user_id).await?;
        }
        Ok(())
    }

    pub async fn dashboard(&self, session_id: &str) -> Result<DashboardResponse, AuthError> {
        let session = self.touch_session(session_id).await?;
        let recent = self
            .db
            .recent_successful(session.user_id, Utc::now(), 5)
            .await?;

        Ok(DashboardResponse {
            username: session.username.clone(),
            risk_tier: session.tier,
            risk_label: session.tier.label().to_string(),
            risk_score: session.risk_score,
            recent_logins: recent.iter().map(AttemptSummary::from).collect(),
        })
    }

    pub async fn profile(&self, session_id: &str) -> Result<ProfileResponse, AuthError> {
        let session = self.touch_session(session_id).await?;
        let user = self.db.find_user_by_id(session.user_id).await?;
        let behavior = self.db.behavior(session.user_id).await?;

        let recent = self
            .db
            .recent_all(session.user_id, Utc::now(), crate::features::HISTORY_WINDOW)
            .await?;
        let avg_risk = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|a| a.risk_score).sum::<f64>() / recent.len() as f64
        };

        Ok(ProfileResponse {
            username: user.username,
            email: user.email,
            created_at: format_display_time(user.created_at),
            total_logins: behavior.success_count + behavior.failed_count,
            failed_logins: behavior.failed_count,
            avg_risk,
            last_login: behavior.last_login.map(format_display_time),
        })
    }

    /// The per-feature breakdown captured at login, for the transparency view.
    pub async fn feature_details(
        &self,
        session_id: &str,
    ) -> Result<Option<RiskAssessment>, AuthError> {
        let session = self.touch_session(session_id).await?;
        Ok(session.assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OtpConfig, RiskConfig};
    use crate::geo::StaticGeoResolver;
    use crate::models::NewLoginAttempt;
    use crate::risk::TierThresholds;
    use crate::services::email::LogMailer;

    const CHROME_ON_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    struct Harness {
        db: Arc<DatabaseConnection>,
        otp: Arc<OtpService>,
        coordinator: AuthCoordinator,
    }

    fn harness(thresholds: TierThresholds) -> Harness {
        let db = Arc::new(DatabaseConnection::new_memory());
        let otp_config = OtpConfig {
            length: 6,
            expiry_minutes: 3,
            max_attempts: 3,
            rate_limit_minutes: 5,
            encryption_key: "coordinator-test-key".to_string(),
        };
        let otp = Arc::new(OtpService::new(&otp_config, db.clone(), Arc::new(LogMailer)).unwrap());
        let risk_config = RiskConfig {
            use_weighted_rule: true,
            alpha: 0.5,
            feature_weights: Default::default(),
            lower_threshold: thresholds.lower,
            upper_threshold: thresholds.upper,
            model_artifact_path: String::new(),
            thresholds_path: None,
        };
        let coordinator = AuthCoordinator::new(
            db.clone(),
            Arc::new(IsolationScorer::fallback()),
            RiskCombiner::new(&risk_config, thresholds),
            otp.clone(),
            Arc::new(StaticGeoResolver::new(Vec::new())),
            PairwiseConfig::default(),
            30,
        );
        Harness {
            db,
            otp,
            coordinator,
        }
    }

    fn default_thresholds() -> TierThresholds {
        TierThresholds {
            lower: 0.2595,
            upper: 0.5750,
        }
    }

    fn register_form() -> RegisterForm {
        RegisterForm {
            username: "alice".to_string(),
            password: "Password123".to_string(),
            confirm_password: "Password123".to_string(),
            email: "alice@example.com".to_string(),
            kba_question: "First pet?".to_string(),
            kba_answer: " Kucing ".to_string(),
        }
    }

    fn login_form(password: &str) -> LoginForm {
        LoginForm {
            username: "alice".to_string(),
            password: password.to_string(),
        }
    }

    /// Pull the plaintext of the session's current code back out of storage.
    async fn stored_code(h: &Harness, user_id: Uuid, session_id: &str) -> String {
        let record = h.db.latest_otp(user_id, session_id).await.unwrap().unwrap();
        h.otp.decrypt_code(&record.encrypted_code).unwrap()
    }

    #[tokio::test]
    async fn test_cold_first_login_is_low_risk() {
        let h = harness(default_thresholds());
        h.coordinator.register(register_form()).await.unwrap();

        let outcome = h
            .coordinator
            .login(login_form("Password123"), "127.0.0.1", CHROME_ON_WINDOWS)
            .await
            .unwrap();

        let session_id = match &outcome {
            LoginOutcome::Verified { session_id } => session_id.clone(),
            other => panic!("expected verified session, got {:?}", other),
        };

        let session = h.coordinator.touch_session(&session_id).await.unwrap();
        assert!(session.is_verified());
        assert_eq!(session.tier, RiskTier::Low);

        // One successful history row with the cold-start scores
        let user = h.db.find_user_by_username("alice").await.unwrap();
        let rows = h.db.recent_all(user.id, Utc::now(), 50).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].success);
        let details = h
            .coordinator
            .feature_details(&session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.features.time_of_hour, 0.1);
        assert_eq!(details.features.daily_count, 0.1);
    }

    #[tokio::test]
    async fn test_wrong_password_records_high_tier_failure() {
        let h = harness(default_thresholds());
        h.coordinator.register(register_form()).await.unwrap();

        let result = h
            .coordinator
            .login(login_form("WrongPassword1"), "127.0.0.1", CHROME_ON_WINDOWS)
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));

        let user = h.db.find_user_by_username("alice").await.unwrap();
        let rows = h.db.recent_all(user.id, Utc::now(), 50).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].success);
        assert_eq!(rows[0].risk_tier, RiskTier::High);
        assert_eq!(rows[0].combined_score, 0.0);

        let behavior = h.db.behavior(user.id).await.unwrap();
        assert_eq!(behavior.failed_count, 1);
        assert_eq!(behavior.success_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_username_is_generic_failure() {
        let h = harness(default_thresholds());
        let result = h
            .coordinator
            .login(login_form("Password123"), "127.0.0.1", CHROME_ON_WINDOWS)
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_consecutive_failures_raise_failed_login_feature() {
        let h = harness(default_thresholds());
        h.coordinator.register(register_form()).await.unwrap();
        let user = h.db.find_user_by_username("alice").await.unwrap();

        // Seed one old success so the engine leaves cold start
        h.db.append_attempt(NewLoginAttempt {
            user_id: user.id,
            timestamp: Utc::now() - Duration::hours(3),
            ip: "127.0.0.1".to_string(),
            user_agent: CHROME_ON_WINDOWS.to_string(),
            browser: "Chrome".to_string(),
            os: "Windows".to_string(),
            device_type: "desktop".to_string(),
            success: true,
            risk_score: 0.0,
            risk_tier: RiskTier::Low,
            asn: 0,
            region: "Unknown".to_string(),
            if_score: 0.0,
            rule_score: 0.0,
            combined_score: 0.0,
        })
        .await
        .unwrap();

        for _ in 0..3 {
            let _ = h
                .coordinator
                .login(login_form("WrongPassword1"), "127.0.0.1", CHROME_ON_WINDOWS)
                .await;
        }

        let outcome = h
            .coordinator
            .login(login_form("Password123"), "127.0.0.1", CHROME_ON_WINDOWS)
            .await
            .unwrap();
        let details = h
            .coordinator
            .feature_details(outcome.session_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.features.failed_login, 1.0);
    }

    #[tokio::test]
    async fn test_fast_retry_maxes_time_between_feature() {
        let h = harness(default_thresholds());
        h.coordinator.register(register_form()).await.unwrap();
        let user = h.db.find_user_by_username("alice").await.unwrap();

        // A successful login 30 seconds ago
        h.db.append_attempt(NewLoginAttempt {
            user_id: user.id,
            timestamp: Utc::now() - Duration::seconds(30),
            ip: "127.0.0.1".to_string(),
            user_agent: CHROME_ON_WINDOWS.to_string(),
            browser: "Chrome".to_string(),
            os: "Windows".to_string(),
            device_type: "desktop".to_string(),
            success: true,
            risk_score: 0.0,
            risk_tier: RiskTier::Low,
            asn: 0,
            region: "Unknown".to_string(),
            if_score: 0.0,
            rule_score: 0.0,
            combined_score: 0.0,
        })
        .await
        .unwrap();

        let outcome = h
            .coordinator
            .login(login_form("Password123"), "127.0.0.1", CHROME_ON_WINDOWS)
            .await
            .unwrap();
        let details = h
            .coordinator
            .feature_details(outcome.session_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.features.time_between, 1.0);
    }

    #[tokio::test]
    async fn test_medium_tier_requires_single_otp() {
        // Force every login into the medium band
        let h = harness(TierThresholds {
            lower: -1.0,
            upper: 0.5,
        });
        h.coordinator.register(register_form()).await.unwrap();
        let user = h.db.find_user_by_username("alice").await.unwrap();

        let outcome = h
            .coordinator
            .login(login_form("Password123"), "127.0.0.1", CHROME_ON_WINDOWS)
            .await
            .unwrap();
        let session_id = match &outcome {
            LoginOutcome::StepUpOtp { session_id } => session_id.clone(),
            other => panic!("expected otp step-up, got {:?}", other),
        };

        let session = h.coordinator.touch_session(&session_id).await.unwrap();
        assert!(session.needs_verification);
        assert_eq!(session.verification_type, VerificationType::Otp);

        let wrong = h.coordinator.verify_otp(&session_id, "00000x").await.unwrap();
        assert_eq!(
            wrong,
            StepUpProgress::Rejected(OtpVerification::Invalid { remaining: 2 })
        );

        let code = stored_code(&h, user.id, &session_id).await;
        let progress = h.coordinator.verify_otp(&session_id, &code).await.unwrap();
        assert_eq!(progress, StepUpProgress::Complete);

        let session = h.coordinator.touch_session(&session_id).await.unwrap();
        assert!(session.is_verified());
    }

    #[tokio::test]
    async fn test_high_tier_requires_otp_then_kba() {
        // Force every login into the high band
        let h = harness(TierThresholds {
            lower: -1.0,
            upper: -0.5,
        });
        h.coordinator.register(register_form()).await.unwrap();
        let user = h.db.find_user_by_username("alice").await.unwrap();

        let outcome = h
            .coordinator
            .login(login_form("Password123"), "127.0.0.1", CHROME_ON_WINDOWS)
            .await
            .unwrap();
        let session_id = match &outcome {
            LoginOutcome::StepUpOtpKba { session_id } => session_id.clone(),
            other => panic!("expected otp+kba step-up, got {:?}", other),
        };

        // KBA before the code is accepted is out of order
        assert!(matches!(
            h.coordinator.verify_kba(&session_id, "kucing").await,
            Err(AuthError::SessionInvalid)
        ));

        let code = stored_code(&h, user.id, &session_id).await;
        let progress = h.coordinator.verify_otp(&session_id, &code).await.unwrap();
        assert_eq!(progress, StepUpProgress::OtpAccepted);

        // Wrong answer keeps the session unverified
        assert!(!h.coordinator.verify_kba(&session_id, "anjing").await.unwrap());
        // Comparison is case-insensitive and trimmed
        assert!(h.coordinator.verify_kba(&session_id, " KUCING ").await.unwrap());

        let session = h.coordinator.touch_session(&session_id).await.unwrap();
        assert!(session.is_verified());
    }

    #[tokio::test]
    async fn test_logout_invalidates_active_codes() {
        let h = harness(TierThresholds {
            lower: -1.0,
            upper: 0.5,
        });
        h.coordinator.register(register_form()).await.unwrap();
        let user = h.db.find_user_by_username("alice").await.unwrap();

        let outcome = h
            .coordinator
            .login(login_form("Password123"), "127.0.0.1", CHROME_ON_WINDOWS)
            .await
            .unwrap();
        let session_id = outcome.session_id().to_string();

        h.coordinator.logout(&session_id).await.unwrap();
        assert!(matches!(
            h.coordinator.touch_session(&session_id).await,
            Err(AuthError::SessionInvalid)
        ));

        let record = h.db.latest_otp(user.id, &session_id).await.unwrap().unwrap();
        assert!(record.used);
    }

    #[tokio::test]
    async fn test_idle_session_expires() {
        let db = Arc::new(DatabaseConnection::new_memory());
        let otp_config = OtpConfig {
            length: 6,
            expiry_minutes: 3,
            max_attempts: 3,
            rate_limit_minutes: 5,
            encryption_key: "coordinator-test-key".to_string(),
        };
        let otp = Arc::new(OtpService::new(&otp_config, db.clone(), Arc::new(LogMailer)).unwrap());
        let risk_config = RiskConfig {
            use_weighted_rule: true,
            alpha: 0.5,
            feature_weights: Default::default(),
            lower_threshold: 0.2595,
            upper_threshold: 0.5750,
            model_artifact_path: String::new(),
            thresholds_path: None,
        };
        // Zero-minute TTL: any elapsed idle time expires the session
        let coordinator = AuthCoordinator::new(
            db,
            Arc::new(IsolationScorer::fallback()),
            RiskCombiner::new(&risk_config, default_thresholds()),
            otp,
            Arc::new(StaticGeoResolver::new(Vec::new())),
            PairwiseConfig::default(),
            0,
        );

        coordinator.register(register_form()).await.unwrap();
        let outcome = coordinator
            .login(login_form("Password123"), "127.0.0.1", CHROME_ON_WINDOWS)
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(matches!(
            coordinator.touch_session(outcome.session_id()).await,
            Err(AuthError::SessionInvalid)
        ));
    }
}
