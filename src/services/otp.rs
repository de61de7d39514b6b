use std::sync::Arc;
use std::time::Duration as StdDuration;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::OtpConfig;
use crate::db::DatabaseConnection;
use crate::errors::AuthError;
use crate::models::{IssuedOtp, NewOtpCode, OtpStatus, OtpVerification};
use crate::services::email::Mailer;

/// Issues allowed per user or source address within the rolling rate-limit
/// window. Distinct users behind one NAT share this budget; operators who
/// need stricter isolation should front this with per-user quotas.
const MAX_ISSUES_PER_WINDOW: u32 = 3;

const NONCE_LEN: usize = 12;

/// Delivery is bounded so a slow relay cannot stall the login path.
const MAIL_TIMEOUT: StdDuration = StdDuration::from_secs(10);

pub struct OtpService {
    db: Arc<DatabaseConnection>,
    mailer: Arc<dyn Mailer>,
    cipher: Aes256Gcm,
    length: usize,
    expiry_minutes: i64,
    max_attempts: u32,
    rate_limit_minutes: i64,
}

/// Derive the 32-byte cipher key from the configured secret. Short keys are
/// padded by hashing; long keys are truncated.
fn derive_key(secret: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    let bytes = secret.as_bytes();
    if bytes.len() >= 32 {
        key.copy_from_slice(&bytes[..32]);
    } else {
        let digest = Sha256::digest(bytes);
        key.copy_from_slice(&digest);
    }
    key
}

impl OtpService {
    pub fn new(
        config: &OtpConfig,
        db: Arc<DatabaseConnection>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, AuthError> {
        if config.encryption_key.is_empty() {
            return Err(AuthError::ConfigError(
                "OTP encryption key must not be empty".to_string(),
            ));
        }
        let key = derive_key(&config.encryption_key);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        Ok(OtpService {
            db,
            mailer,
            cipher,
            length: config.length,
            expiry_minutes: config.expiry_minutes,
            max_attempts: config.max_attempts,
            rate_limit_minutes: config.rate_limit_minutes,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::rngs::OsRng;
        (0..self.length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }

    pub fn encrypt_code(&self, code: &str) -> Result<String, AuthError> {
        let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, code.as_bytes())
            .map_err(|_| AuthError::EncryptionError("code encryption failed".to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    pub fn decrypt_code(&self, encrypted: &str) -> Result<String, AuthError> {
        let payload = BASE64
            .decode(encrypted)
            .map_err(|_| AuthError::EncryptionError("malformed ciphertext".to_string()))?;
        if payload.len() <= NONCE_LEN {
            return Err(AuthError::EncryptionError(
                "ciphertext too short".to_string(),
            ));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AuthError::EncryptionError("code decryption failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| AuthError::EncryptionError("decrypted code is not UTF-8".to_string()))
    }

    /// Create, store and deliver a new code for `(user, session)`. Any prior
    /// active code for the pair is superseded. Delivery failures are logged
    /// but do not roll back issuance.
    pub async fn issue(
        &self,
        user_id: Uuid,
        username: &str,
        email: &str,
        ip: &str,
        session_id: &str,
    ) -> Result<IssuedOtp, AuthError> {
        let now = Utc::now();
        let window_start = now - Duration::minutes(self.rate_limit_minutes);
        let issued_recently = self.db.count_otps_since(user_id, ip, window_start).await?;
        if issued_recently >= MAX_ISSUES_PER_WINDOW {
            return Err(AuthError::RateLimited {
                retry_after_minutes: self.rate_limit_minutes as u64,
            });
        }

        let code = self.generate_code();
        let encrypted_code = self.encrypt_code(&code)?;
        let expires_at = now + Duration::minutes(self.expiry_minutes);

        self.db.supersede_active_otps(user_id, session_id).await?;
        self.db
            .insert_otp(NewOtpCode {
                user_id,
                email: email.to_string(),
                encrypted_code,
                created_at: now,
                expires_at,
                ip: ip.to_string(),
                session_id: session_id.to_string(),
            })
            .await?;

        self.deliver(email, username, &code).await;

        Ok(IssuedOtp { code, expires_at })
    }

    async fn deliver(&self, email: &str, username: &str, code: &str) {
        let mailer = self.mailer.clone();
        let email = email.to_string();
        let username = username.to_string();
        let code = code.to_string();
        let expiry = self.expiry_minutes;

        let send = tokio::task::spawn_blocking(move || {
            mailer.send_code(&email, &username, &code, expiry)
        });
        match tokio::time::timeout(MAIL_TIMEOUT, send).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => log::warn!("Code stored but delivery failed: {}", e),
            Ok(Err(e)) => log::warn!("Code stored but delivery task panicked: {}", e),
            Err(_) => log::warn!("Code stored but delivery timed out"),
        }
    }

    /// Check a submitted code against the latest one for `(user, session)`.
    /// The attempt counter is incremented before comparison; the code is
    /// marked used on success or exhaustion.
    pub async fn verify(
        &self,
        user_id: Uuid,
        session_id: &str,
        code: &str,
    ) -> Result<OtpVerification, AuthError> {
        let record = match self.db.latest_otp(user_id, session_id).await? {
            Some(record) => record,
            None => return Ok(OtpVerification::NotFound),
        };

        if record.used {
            return Ok(if record.attempt_count >= self.max_attempts {
                OtpVerification::Exhausted
            } else {
                OtpVerification::NotFound
            });
        }

        let now = Utc::now();
        if now > record.expires_at {
            self.db.mark_otp_used(record.id).await?;
            return Ok(OtpVerification::Expired);
        }

        if record.attempt_count >= self.max_attempts {
            self.db.mark_otp_used(record.id).await?;
            return Ok(OtpVerification::Exhausted);
        }

        let attempts = self.db.increment_otp_attempts(record.id).await?;
        let stored = self.decrypt_code(&record.encrypted_code)?;

        if stored == code {
            self.db.mark_otp_used(record.id).await?;
            return Ok(OtpVerification::Valid);
        }

        let remaining = self.max_attempts.saturating_sub(attempts);
        if remaining == 0 {
            self.db.mark_otp_used(record.id).await?;
        }
        Ok(OtpVerification::Invalid { remaining })
    }

    pub async fn status(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<Option<OtpStatus>, AuthError> {
        let record = match self.db.latest_otp(user_id, session_id).await? {
            Some(record) => record,
            None => return Ok(None),
        };

        let now = Utc::now();
        let seconds_remaining = (record.expires_at - now).num_seconds().max(0);
        Ok(Some(OtpStatus {
            exists: true,
            used: record.used,
            expired: seconds_remaining == 0,
            seconds_remaining,
            attempts_remaining: self.max_attempts.saturating_sub(record.attempt_count),
        }))
    }

    /// Mark every active code for the user as used (logout, security events).
    pub async fn invalidate(&self, user_id: Uuid) -> Result<(), AuthError> {
        let invalidated = self.db.invalidate_user_otps(user_id).await?;
        if invalidated > 0 {
            log::info!("Invalidated {} active codes for user {}", invalidated, user_id);
        }
        Ok(())
    }

    /// Delete rows whose expiry has passed. Idempotent.
    pub async fn sweep(&self) -> Result<usize, AuthError> {
        let deleted = self.db.delete_expired_otps(Utc::now()).await?;
        if deleted > 0 {
            log::info!("Removed {} expired verification codes", deleted);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::email::LogMailer;

    fn service() -> OtpService {
        service_with_expiry(3)
    }

    fn service_with_expiry(expiry_minutes: i64) -> OtpService {
        let config = OtpConfig {
            length: 6,
            expiry_minutes,
            max_attempts: 3,
            rate_limit_minutes: 5,
            encryption_key: "short-key".to_string(),
        };
        OtpService::new(
            &config,
            Arc::new(DatabaseConnection::new_memory()),
            Arc::new(LogMailer),
        )
        .unwrap()
    }

    #[test]
    fn test_derive_key_pads_and_truncates() {
        let short = derive_key("abc");
        let exact = derive_key("0123456789abcdef0123456789abcdef");
        let long = derive_key("0123456789abcdef0123456789abcdefEXTRA");
        assert_eq!(exact, long);
        assert_ne!(short, exact);
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let service = service();
        for code in ["000000", "123456", "999999"] {
            let encrypted = service.encrypt_code(code).unwrap();
            assert_eq!(service.decrypt_code(&encrypted).unwrap(), code);
        }
    }

    #[test]
    fn test_encryption_uses_fresh_nonces() {
        let service = service();
        let a = service.encrypt_code("123456").unwrap();
        let b = service.encrypt_code("123456").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_generated_codes_are_digits_of_configured_length() {
        let service = service();
        for _ in 0..20 {
            let code = service.generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_issue_then_verify() {
        let service = service();
        let user_id = Uuid::new_v4();

        let issued = service
            .issue(user_id, "alice", "alice@example.com", "203.0.113.10", "session-1")
            .await
            .unwrap();

        let outcome = service.verify(user_id, "session-1", &issued.code).await.unwrap();
        assert_eq!(outcome, OtpVerification::Valid);

        // The consumed code cannot be replayed
        let replay = service.verify(user_id, "session-1", &issued.code).await.unwrap();
        assert!(matches!(
            replay,
            OtpVerification::NotFound | OtpVerification::Exhausted
        ));
    }

    #[tokio::test]
    async fn test_three_wrong_attempts_exhaust_the_code() {
        let service = service();
        let user_id = Uuid::new_v4();

        let issued = service
            .issue(user_id, "alice", "alice@example.com", "203.0.113.10", "session-1")
            .await
            .unwrap();
        let wrong = if issued.code == "000000" { "111111" } else { "000000" };

        assert_eq!(
            service.verify(user_id, "session-1", wrong).await.unwrap(),
            OtpVerification::Invalid { remaining: 2 }
        );
        assert_eq!(
            service.verify(user_id, "session-1", wrong).await.unwrap(),
            OtpVerification::Invalid { remaining: 1 }
        );
        assert_eq!(
            service.verify(user_id, "session-1", wrong).await.unwrap(),
            OtpVerification::Invalid { remaining: 0 }
        );
        // The code is consumed; even the correct digits are rejected now
        assert_eq!(
            service.verify(user_id, "session-1", &issued.code).await.unwrap(),
            OtpVerification::Exhausted
        );

        // A fresh issue resets the state
        let reissued = service
            .issue(user_id, "alice", "alice@example.com", "203.0.113.10", "session-1")
            .await
            .unwrap();
        assert_eq!(
            service.verify(user_id, "session-1", &reissued.code).await.unwrap(),
            OtpVerification::Valid
        );
    }

    #[tokio::test]
    async fn test_issue_supersedes_prior_code() {
        let service = service();
        let user_id = Uuid::new_v4();

        let first = service
            .issue(user_id, "alice", "alice@example.com", "203.0.113.10", "session-1")
            .await
            .unwrap();
        let second = service
            .issue(user_id, "alice", "alice@example.com", "203.0.113.10", "session-1")
            .await
            .unwrap();

        if first.code != second.code {
            let outcome = service.verify(user_id, "session-1", &first.code).await.unwrap();
            assert_ne!(outcome, OtpVerification::Valid);
        }
        assert_eq!(
            service.verify(user_id, "session-1", &second.code).await.unwrap(),
            OtpVerification::Valid
        );
    }

    #[tokio::test]
    async fn test_rate_limit_applies_across_users_on_shared_ip() {
        let service = service();
        let ip = "203.0.113.10";

        for i in 0..3 {
            let user = Uuid::new_v4();
            service
                .issue(user, "user", "user@example.com", ip, &format!("session-{}", i))
                .await
                .unwrap();
        }

        let blocked = service
            .issue(Uuid::new_v4(), "user", "user@example.com", ip, "session-x")
            .await;
        assert!(matches!(blocked, Err(AuthError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected_and_marked_used() {
        let service = service_with_expiry(-1);
        let user_id = Uuid::new_v4();

        let issued = service
            .issue(user_id, "alice", "alice@example.com", "203.0.113.10", "session-1")
            .await
            .unwrap();
        assert_eq!(
            service.verify(user_id, "session-1", &issued.code).await.unwrap(),
            OtpVerification::Expired
        );

        let status = service.status(user_id, "session-1").await.unwrap().unwrap();
        assert!(status.used);
        assert!(status.expired);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let service = service_with_expiry(-1);
        let user_id = Uuid::new_v4();

        service
            .issue(user_id, "alice", "alice@example.com", "203.0.113.10", "session-1")
            .await
            .unwrap();

        assert_eq!(service.sweep().await.unwrap(), 1);
        assert_eq!(service.sweep().await.unwrap(), 0);
        assert!(service.status(user_id, "session-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_reports_remaining_attempts() {
        let service = service();
        let user_id = Uuid::new_v4();

        service
            .issue(user_id, "alice", "alice@example.com", "203.0.113.10", "session-1")
            .await
            .unwrap();
        service.verify(user_id, "session-1", "wrong!").await.unwrap();

        let status = service.status(user_id, "session-1").await.unwrap().unwrap();
        assert!(status.exists);
        assert!(!status.used);
        assert_eq!(status.attempts_remaining, 2);
        assert!(status.seconds_remaining > 0);
    }
}
