pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AuthError;
use crate::models::{
    LoginAttempt, NewLoginAttempt, NewOtpCode, NewUser, OtpCode, User, UserBehavior,
};

pub enum Database {
    Memory(memory::MemoryDb),
}

pub struct DatabaseConnection {
    db: Database,
}

impl DatabaseConnection {
    pub fn new_memory() -> Self {
        Self {
            db: Database::Memory(memory::MemoryDb::new()),
        }
    }

    // User methods
    pub async fn create_user(&self, user: NewUser) -> Result<User, AuthError> {
        match &self.db {
            Database::Memory(db) => db.create_user(user).await,
        }
    }

    pub async fn find_user_by_id(&self, id: Uuid) -> Result<User, AuthError> {
        match &self.db {
            Database::Memory(db) => db.find_user_by_id(id).await,
        }
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<User, AuthError> {
        match &self.db {
            Database::Memory(db) => db.find_user_by_username(username).await,
        }
    }

    pub async fn user_exists_by_username(&self, username: &str) -> Result<bool, AuthError> {
        match &self.db {
            Database::Memory(db) => db.user_exists_by_username(username).await,
        }
    }

    // History methods
    pub async fn append_attempt(
        &self,
        attempt: NewLoginAttempt,
    ) -> Result<LoginAttempt, AuthError> {
        match &self.db {
            Database::Memory(db) => db.append_attempt(attempt).await,
        }
    }

    pub async fn recent_successful(
        &self,
        user_id: Uuid,
        up_to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LoginAttempt>, AuthError> {
        match &self.db {
            Database::Memory(db) => db.recent_successful(user_id, up_to, limit).await,
        }
    }

    pub async fn recent_all(
        &self,
        user_id: Uuid,
        up_to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LoginAttempt>, AuthError> {
        match &self.db {
            Database::Memory(db) => db.recent_all(user_id, up_to, limit).await,
        }
    }

    pub async fn count_successful_by_day(
        &self,
        user_id: Uuid,
        up_to: DateTime<Utc>,
        days: i64,
    ) -> Result<BTreeMap<NaiveDate, u32>, AuthError> {
        match &self.db {
            Database::Memory(db) => db.count_successful_by_day(user_id, up_to, days).await,
        }
    }

    pub async fn behavior(&self, user_id: Uuid) -> Result<UserBehavior, AuthError> {
        match &self.db {
            Database::Memory(db) => db.behavior(user_id).await,
        }
    }

    // OTP methods
    pub async fn insert_otp(&self, code: NewOtpCode) -> Result<OtpCode, AuthError> {
        match &self.db {
            Database::Memory(db) => db.insert_otp(code).await,
        }
    }

    pub async fn latest_otp(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<Option<OtpCode>, AuthError> {
        match &self.db {
            Database::Memory(db) => db.latest_otp(user_id, session_id).await,
        }
    }

    pub async fn supersede_active_otps(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<usize, AuthError> {
        match &self.db {
            Database::Memory(db) => db.supersede_active_otps(user_id, session_id).await,
        }
    }

    pub async fn invalidate_user_otps(&self, user_id: Uuid) -> Result<usize, AuthError> {
        match &self.db {
            Database::Memory(db) => db.invalidate_user_otps(user_id).await,
        }
    }

    pub async fn increment_otp_attempts(&self, id: u64) -> Result<u32, AuthError> {
        match &self.db {
            Database::Memory(db) => db.increment_otp_attempts(id).await,
        }
    }

    pub async fn mark_otp_used(&self, id: u64) -> Result<(), AuthError> {
        match &self.db {
            Database::Memory(db) => db.mark_otp_used(id).await,
        }
    }

    pub async fn count_otps_since(
        &self,
        user_id: Uuid,
        ip: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, AuthError> {
        match &self.db {
            Database::Memory(db) => db.count_otps_since(user_id, ip, since).await,
        }
    }

    pub async fn delete_expired_otps(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        match &self.db {
            Database::Memory(db) => db.delete_expired_otps(now).await,
        }
    }
}

pub fn init_db(config: &Config) -> Result<Arc<DatabaseConnection>, AuthError> {
    let dsn = &config.database.dsn;
    if dsn.starts_with("memory://") {
        return Ok(Arc::new(DatabaseConnection::new_memory()));
    }
    Err(AuthError::DatabaseError(format!(
        "Unsupported database DSN scheme: {}",
        dsn
    )))
}
