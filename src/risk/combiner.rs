use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;
use crate::features::{FeatureVector, FEATURE_NAMES};
use crate::models::RiskTier;
use crate::risk::RiskAssessment;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierThresholds {
    pub lower: f64,
    pub upper: f64,
}

/// Combines the isolation score with the weighted rule score and maps the
/// result to a tier.
pub struct RiskCombiner {
    use_weighted_rule: bool,
    alpha: f64,
    weights: [f64; 8],
    thresholds: TierThresholds,
}

impl RiskCombiner {
    pub fn new(config: &RiskConfig, thresholds: TierThresholds) -> Self {
        RiskCombiner {
            use_weighted_rule: config.use_weighted_rule,
            alpha: config.alpha,
            weights: normalize_weights(&config.feature_weights),
            thresholds,
        }
    }

    pub fn combine(&self, if_score: f64, features: &FeatureVector) -> RiskAssessment {
        let (rule_score, combined_score) = if self.use_weighted_rule {
            let values = features.as_array();
            let rule: f64 = self
                .weights
                .iter()
                .zip(values.iter())
                .map(|(w, f)| w * f)
                .sum();
            (rule, self.alpha * if_score + (1.0 - self.alpha) * rule)
        } else {
            (0.0, if_score)
        };
        let combined_score = combined_score.clamp(0.0, 1.0);

        RiskAssessment {
            features: *features,
            if_score,
            rule_score,
            combined_score,
            tier: self.tier_for(combined_score),
        }
    }

    pub fn tier_for(&self, combined: f64) -> RiskTier {
        if combined <= self.thresholds.lower {
            RiskTier::Low
        } else if combined <= self.thresholds.upper {
            RiskTier::Medium
        } else {
            RiskTier::High
        }
    }
}

/// Normalize per-feature weights to sum to 1, in the fixed feature order.
/// An empty or all-zero map yields uniform weights.
pub fn normalize_weights(weights: &HashMap<String, f64>) -> [f64; 8] {
    let mut ordered = [0.0; 8];
    for (index, name) in FEATURE_NAMES.iter().enumerate() {
        ordered[index] = weights.get(*name).copied().unwrap_or(0.0).max(0.0);
    }
    let total: f64 = ordered.iter().sum();
    if total <= 0.0 {
        return [1.0 / 8.0; 8];
    }
    for weight in &mut ordered {
        *weight /= total;
    }
    ordered
}
