use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub kba_question: String,
    /// Stored lowercased and trimmed; compared against normalized input.
    pub kba_answer: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub kba_question: String,
    pub kba_answer: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
    pub email: String,
    pub kba_question: String,
    pub kba_answer: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeForm {
    pub verification_code: String,
}

#[derive(Debug, Deserialize)]
pub struct KbaAnswerForm {
    pub kba_answer: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub username: String,
    pub email: String,
    pub created_at: String,
    pub total_logins: u32,
    pub failed_logins: u32,
    pub avg_risk: f64,
    pub last_login: Option<String>,
}
