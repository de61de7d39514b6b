use std::f64::consts::PI;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::PairwiseConfig;
use crate::db::DatabaseConnection;
use crate::errors::AuthError;
use crate::models::LoginAttempt;

/// Successful-history window consumed by the scoring features.
pub const HISTORY_WINDOW: usize = 50;
/// Attempts inspected by the geolocation feature.
const GEO_WINDOW: usize = 10;
/// Day buckets inspected by the daily-count feature.
const DAILY_WINDOW_DAYS: i64 = 30;
/// Days with more logins than this are dropped from the daily baseline.
const DAILY_OUTLIER_COUNT: u32 = 5;
/// Margin keeping the inter-arrival feature from comparing an attempt
/// against its own write.
const SELF_COMPARE_MARGIN_SECS: i64 = 5;
/// Consecutive failures that saturate the failed-login feature.
const FAILED_LOGIN_NORM: f64 = 3.0;

pub const FEATURE_NAMES: [&str; 8] = [
    "browser_anomaly",
    "os_anomaly",
    "device_anomaly",
    "time_of_hour_anomaly",
    "daily_count_anomaly",
    "time_between_anomaly",
    "failed_login_anomaly",
    "geo_anomaly",
];

/// The eight behavioral anomaly scores, each in [0, 1] with 1 = maximally
/// anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector {
    pub browser: f64,
    pub os: f64,
    pub device: f64,
    pub time_of_hour: f64,
    pub daily_count: f64,
    pub time_between: f64,
    pub failed_login: f64,
    pub geo: f64,
}

impl FeatureVector {
    /// Values for a user with no successful history.
    pub fn cold_start() -> Self {
        FeatureVector {
            browser: 0.0,
            os: 0.0,
            device: 0.0,
            time_of_hour: 0.1,
            daily_count: 0.1,
            time_between: 0.0,
            failed_login: 0.0,
            geo: 0.0,
        }
    }

    /// Fixed model-facing order, matching `FEATURE_NAMES`.
    pub fn as_array(&self) -> [f64; 8] {
        [
            self.browser,
            self.os,
            self.device,
            self.time_of_hour,
            self.daily_count,
            self.time_between,
            self.failed_login,
            self.geo,
        ]
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        let index = FEATURE_NAMES.iter().position(|n| *n == name)?;
        Some(self.as_array()[index])
    }

    fn set(&mut self, name: &str, value: f64) {
        match name {
            "browser_anomaly" => self.browser = value,
            "os_anomaly" => self.os = value,
            "device_anomaly" => self.device = value,
            "time_of_hour_anomaly" => self.time_of_hour = value,
            "daily_count_anomaly" => self.daily_count = value,
            "time_between_anomaly" => self.time_between = value,
            "failed_login_anomaly" => self.failed_login = value,
            "geo_anomaly" => self.geo = value,
            _ => {}
        }
    }
}

/// The attempt under evaluation. The reference timestamp is carried
/// explicitly so feature computation never reads the wall clock.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub browser: String,
    pub os: String,
    pub device_type: String,
    pub asn: u32,
    pub region: String,
}

pub struct FeatureEngine {
    db: Arc<DatabaseConnection>,
    pairwise: PairwiseConfig,
}

impl FeatureEngine {
    pub fn new(db: Arc<DatabaseConnection>, pairwise: PairwiseConfig) -> Self {
        FeatureEngine { db, pairwise }
    }

    /// Compute the feature vector for an attempt against the history
    /// snapshot strictly before `ctx.timestamp`.
    pub async fn compute(&self, ctx: &AttemptContext) -> Result<FeatureVector, AuthError> {
        let history = self
            .db
            .recent_successful(ctx.user_id, ctx.timestamp, HISTORY_WINDOW)
            .await?;

        if history.is_empty() {
            return Ok(self.apply_mask(FeatureVector::cold_start()));
        }

        let all = self
            .db
            .recent_all(ctx.user_id, ctx.timestamp, HISTORY_WINDOW)
            .await?;
        let daily = self
            .db
            .count_successful_by_day(ctx.user_id, ctx.timestamp, DAILY_WINDOW_DAYS)
            .await?;

        let today = ctx.timestamp.date_naive();
        let count_today = daily.get(&today).copied().unwrap_or(0);
        let daily_series: Vec<u32> = daily
            .iter()
            .filter(|(date, count)| **date != today && **count <= DAILY_OUTLIER_COUNT)
            .map(|(_, count)| *count)
            .collect();

        let success_times: Vec<DateTime<Utc>> =
            history.iter().map(|a| a.timestamp).collect();

        let vector = FeatureVector {
            browser: categorical_anomaly(&ctx.browser, history.iter().map(|a| a.browser.as_str())),
            os: categorical_anomaly(&ctx.os, history.iter().map(|a| a.os.as_str())),
            device: categorical_anomaly(
                &ctx.device_type,
                history.iter().map(|a| a.device_type.as_str()),
            ),
            time_of_hour: hour_anomaly(
                ctx.timestamp.hour(),
                history.iter().map(|a| a.timestamp.hour()),
            ),
            daily_count: daily_count_anomaly(count_today, &daily_series),
            time_between: time_between_anomaly(ctx.timestamp, &success_times),
            failed_login: failed_login_anomaly(consecutive_failures(&all)),
            geo: geo_anomaly(ctx.asn, &ctx.region, &history[..history.len().min(GEO_WINDOW)]),
        };

        Ok(self.apply_mask(vector))
    }

    fn apply_mask(&self, vector: FeatureVector) -> FeatureVector {
        if !self.pairwise.enabled {
            return vector;
        }
        let mut masked = vector;
        for name in FEATURE_NAMES {
            if !self.pairwise.feature_mask.contains(name) {
                masked.set(name, 0.0);
            }
        }
        masked
    }
}

/// 1 minus the share of historical values equal to the current one.
fn categorical_anomaly<'a>(current: &str, history: impl Iterator<Item = &'a str>) -> f64 {
    let mut total = 0usize;
    let mut matches = 0usize;
    for value in history {
        total += 1;
        if value == current {
            matches += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    1.0 - matches as f64 / total as f64
}

/// Cyclic similarity of the current hour against the 24-bin histogram of
/// historical login hours: cosine of the angular distance, averaged over the
/// histogram and rescaled from [-1, 1] to [0, 1].
fn hour_anomaly(current_hour: u32, history_hours: impl Iterator<Item = u32>) -> f64 {
    let current_angle = 2.0 * PI * current_hour as f64 / 24.0;
    let mut total = 0usize;
    let mut cosine_sum = 0.0;
    for hour in history_hours {
        let angle = 2.0 * PI * hour as f64 / 24.0;
        cosine_sum += (current_angle - angle).cos();
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let similarity = 0.5 * (cosine_sum / total as f64 + 1.0);
    (1.0 - similarity).clamp(0.0, 1.0)
}

/// Gaussian surprise of today's login count against the EMA baseline of the
/// trailing daily counts (outlier days already filtered out).
fn daily_count_anomaly(count_today: u32, daily_series: &[u32]) -> f64 {
    if daily_series.len() < 2 {
        return if count_today == 0 {
            0.0
        } else if count_today > DAILY_OUTLIER_COUNT {
            1.0
        } else {
            0.3
        };
    }
    if count_today == 0 {
        // First login of the day is normal
        return 0.0;
    }

    let series: Vec<f64> = daily_series.iter().map(|c| *c as f64).collect();
    let (mean, std) = ema_mean_std(&series, 0.1, 1.0, 1.0);
    shape(gaussian_anomaly(count_today as f64, mean, std))
}

/// Inter-arrival anomaly. `success_times` is the successful history, newest
/// first; entries within the self-comparison margin of `reference` are
/// ignored.
fn time_between_anomaly(reference: DateTime<Utc>, success_times: &[DateTime<Utc>]) -> f64 {
    let cutoff = reference - chrono::Duration::seconds(SELF_COMPARE_MARGIN_SECS);
    let prior: Vec<DateTime<Utc>> = success_times
        .iter()
        .copied()
        .filter(|ts| *ts <= cutoff)
        .collect();

    let latest = match prior.first() {
        Some(ts) => *ts,
        None => return 0.0,
    };
    let delta = (reference - latest).num_seconds();

    if delta < 60 {
        return 1.0;
    }
    if delta >= 7200 {
        return 0.0;
    }

    if prior.len() == 1 {
        return match delta {
            60..=299 => 0.8,
            300..=1799 => 0.6,
            1800..=3599 => 0.4,
            3600..=7199 => 0.2,
            _ => 0.1,
        };
    }

    // Inter-arrival series in chronological order
    let mut chronological: Vec<DateTime<Utc>> = prior.clone();
    chronological.reverse();
    let gaps: Vec<f64> = chronological
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_seconds() as f64)
        .collect();

    let (mean, std) = ema_mean_std(&gaps, 0.3, 3600.0, 1800.0);
    shape(gaussian_anomaly(delta as f64, mean, std))
}

/// Count of consecutive failures immediately preceding the attempt.
/// `attempts` is newest first; the scan stops at the first success.
fn consecutive_failures(attempts: &[LoginAttempt]) -> u32 {
    attempts.iter().take_while(|a| !a.success).count() as u32
}

fn failed_login_anomaly(consecutive: u32) -> f64 {
    (consecutive as f64 / FAILED_LOGIN_NORM).min(1.0)
}

/// ASN membership (weight 0.60) plus region-change rate (weight 0.40) over
/// the recent successful attempts.
fn geo_anomaly(current_asn: u32, current_region: &str, recent: &[LoginAttempt]) -> f64 {
    if recent.is_empty() {
        return 0.0;
    }

    let known_asn = recent.iter().any(|a| a.asn == current_asn);
    let asn_anomaly = if known_asn { 0.0 } else { 1.0 };

    let known_regions: Vec<&str> = recent
        .iter()
        .map(|a| a.region.as_str())
        .filter(|r| *r != "Unknown")
        .collect();
    let changes = known_regions
        .iter()
        .filter(|r| **r != current_region)
        .count();
    let region_anomaly = (changes as f64 / GEO_WINDOW as f64).min(1.0);

    (0.60 * asn_anomaly + 0.40 * region_anomaly).clamp(0.0, 1.0)
}

/// Exponentially weighted mean and standard deviation. The variance is
/// updated from the deviation against the current mean before the mean moves.
fn ema_mean_std(values: &[f64], alpha: f64, initial_std: f64, std_floor: f64) -> (f64, f64) {
    let mut mean = values[0];
    let mut variance = initial_std * initial_std;
    for &value in &values[1..] {
        let deviation = value - mean;
        variance = (1.0 - alpha) * variance + alpha * deviation * deviation;
        mean = (1.0 - alpha) * mean + alpha * value;
    }
    (mean, variance.sqrt().max(std_floor))
}

fn gaussian_anomaly(value: f64, mean: f64, std: f64) -> f64 {
    let z = ((value - mean) / std).clamp(-3.0, 3.0);
    1.0 - (-z * z / 2.0).exp()
}

/// Non-linear shaping: dampen weak signals, amplify strong ones.
fn shape(raw: f64) -> f64 {
    if raw < 0.3 {
        raw * 0.5
    } else if raw > 0.7 {
        (raw * 1.2).min(1.0)
    } else {
        raw
    }
}
