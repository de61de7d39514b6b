use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("Username already exists")]
    UsernameExists,

    #[error("Session is invalid or has expired")]
    SessionInvalid,

    #[error("Verification code not found")]
    OtpNotFound,

    #[error("Verification code incorrect, {remaining} attempts remaining")]
    OtpInvalid { remaining: u32 },

    #[error("Verification code has expired")]
    OtpExpired,

    #[error("Too many verification attempts, request a new code")]
    OtpExhausted,

    #[error("Too many code requests, try again in {retry_after_minutes} minutes")]
    RateLimited { retry_after_minutes: u64 },

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Geolocation unavailable: {0}")]
    GeoUnavailable(String),

    #[error("Risk model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::SessionInvalid
            | Self::OtpNotFound
            | Self::OtpInvalid { .. }
            | Self::OtpExpired
            | Self::OtpExhausted => StatusCode::UNAUTHORIZED,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::UsernameExists | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::EncryptionError(_)
            | Self::GeoUnavailable(_)
            | Self::ModelUnavailable(_)
            | Self::DatabaseError(_)
            | Self::ConfigError(_)
            | Self::EmailError(_)
            | Self::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> String {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::UsernameExists => "USERNAME_EXISTS",
            Self::SessionInvalid => "SESSION_INVALID",
            Self::OtpNotFound => "OTP_NOT_FOUND",
            Self::OtpInvalid { .. } => "OTP_INVALID",
            Self::OtpExpired => "OTP_EXPIRED",
            Self::OtpExhausted => "OTP_EXHAUSTED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::EncryptionError(_) => "ENCRYPTION_ERROR",
            Self::GeoUnavailable(_) => "GEO_UNAVAILABLE",
            Self::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::EmailError(_) => "EMAIL_ERROR",
            Self::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
        .to_string()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    status_code: u16,
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        self.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_response = ErrorResponse {
            error: self.error_type(),
            message: self.to_string(),
            status_code: status_code.as_u16(),
        };
        HttpResponse::build(status_code).json(error_response)
    }
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::InternalServerError(format!("Serialization error: {}", err))
    }
}

impl From<lettre::error::Error> for AuthError {
    fn from(err: lettre::error::Error) -> Self {
        AuthError::EmailError(err.to_string())
    }
}
