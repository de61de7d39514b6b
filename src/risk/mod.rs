pub mod combiner;
pub mod model;

pub use combiner::{RiskCombiner, TierThresholds};
pub use model::IsolationScorer;

use serde::Serialize;

use crate::features::FeatureVector;
use crate::models::RiskTier;

/// Full outcome of scoring one attempt, kept for the transparency surface.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub features: FeatureVector,
    pub if_score: f64,
    pub rule_score: f64,
    pub combined_score: f64,
    pub tier: RiskTier,
}
