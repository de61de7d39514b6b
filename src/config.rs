use std::collections::{HashMap, HashSet};
use std::env;
use std::str::FromStr;

use serde::Deserialize;

use crate::errors::AuthError;

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Data source name; the shipped backend recognizes the `memory://` scheme.
    pub dsn: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SessionConfig {
    pub ttl_minutes: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub sender: String,
    pub password: String,
    pub enabled: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OtpConfig {
    pub length: usize,
    pub expiry_minutes: i64,
    pub max_attempts: u32,
    pub rate_limit_minutes: i64,
    pub encryption_key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RiskConfig {
    pub use_weighted_rule: bool,
    pub alpha: f64,
    pub feature_weights: HashMap<String, f64>,
    pub lower_threshold: f64,
    pub upper_threshold: f64,
    pub model_artifact_path: String,
    pub thresholds_path: Option<String>,
}

/// Pairwise test mode: force every feature outside the allowlist to zero so a
/// single behavioral signal can be exercised in isolation.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PairwiseConfig {
    pub enabled: bool,
    pub feature_mask: HashSet<String>,
    /// Geo info substituted for loopback/private source addresses, as
    /// `asn,region` (e.g. `38496,Bali`).
    pub geo_override_for_local: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub smtp: SmtpConfig,
    pub otp: OtpConfig,
    pub risk: RiskConfig,
    pub pairwise: PairwiseConfig,
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, AuthError>
where
    T::Err: std::fmt::Display,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| AuthError::ConfigError(format!("{} must be a valid value: {}", name, e)))
}

impl Config {
    pub fn from_env() -> Result<Self, AuthError> {
        let feature_weights = match env::var("RISK_FEATURE_WEIGHTS") {
            Ok(raw) => serde_json::from_str::<HashMap<String, f64>>(&raw).map_err(|e| {
                AuthError::ConfigError(format!("RISK_FEATURE_WEIGHTS must be a JSON map: {}", e))
            })?,
            Err(_) => HashMap::new(),
        };

        let feature_mask = env::var("PAIRWISE_FEATURE_MASK")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<HashSet<_>>()
            })
            .unwrap_or_default();

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", "5001")?,
            },
            database: DatabaseConfig {
                dsn: env::var("DATABASE_DSN").unwrap_or_else(|_| "memory://".to_string()),
            },
            session: SessionConfig {
                ttl_minutes: parse_var("SESSION_TTL_MINUTES", "30")?,
            },
            smtp: SmtpConfig {
                host: env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
                port: parse_var("SMTP_PORT", "587")?,
                sender: env::var("SMTP_SENDER").unwrap_or_default(),
                password: env::var("SMTP_PASSWORD").unwrap_or_default(),
                enabled: parse_var("SMTP_ENABLED", "false")?,
            },
            otp: OtpConfig {
                length: parse_var("OTP_LENGTH", "6")?,
                expiry_minutes: parse_var("OTP_EXPIRY_MINUTES", "3")?,
                max_attempts: parse_var("OTP_MAX_ATTEMPTS", "3")?,
                rate_limit_minutes: parse_var("OTP_RATE_LIMIT_MINUTES", "5")?,
                encryption_key: env::var("OTP_ENCRYPTION_KEY").unwrap_or_else(|_| {
                    // Development-only key, override in production
                    "development_otp_key_please_change".to_string()
                }),
            },
            risk: RiskConfig {
                use_weighted_rule: parse_var("RISK_USE_WEIGHTED_RULE", "true")?,
                alpha: parse_var("RISK_ALPHA", "0.5")?,
                feature_weights,
                lower_threshold: parse_var("RISK_LOWER_THRESHOLD", "0.2595")?,
                upper_threshold: parse_var("RISK_UPPER_THRESHOLD", "0.5750")?,
                model_artifact_path: env::var("MODEL_ARTIFACT_PATH")
                    .unwrap_or_else(|_| "rba_isolation_forest.json".to_string()),
                thresholds_path: env::var("RISK_THRESHOLDS_PATH").ok(),
            },
            pairwise: PairwiseConfig {
                enabled: parse_var("PAIRWISE_ENABLED", "false")?,
                feature_mask,
                geo_override_for_local: env::var("PAIRWISE_GEO_OVERRIDE_FOR_LOCAL").ok(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AuthError> {
        if !(0.0..=1.0).contains(&self.risk.alpha) {
            return Err(AuthError::ConfigError(
                "RISK_ALPHA must be in [0, 1]".to_string(),
            ));
        }
        if self.risk.lower_threshold > self.risk.upper_threshold {
            return Err(AuthError::ConfigError(
                "RISK_LOWER_THRESHOLD must not exceed RISK_UPPER_THRESHOLD".to_string(),
            ));
        }
        if self.otp.length == 0 || self.otp.length > 10 {
            return Err(AuthError::ConfigError(
                "OTP_LENGTH must be between 1 and 10".to_string(),
            ));
        }
        if self.otp.encryption_key.is_empty() {
            return Err(AuthError::ConfigError(
                "OTP_ENCRYPTION_KEY must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
