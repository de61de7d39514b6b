use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::config::RiskConfig;
use crate::risk::TierThresholds;

/// Euler-Mascheroni constant, for the harmonic-number approximation in the
/// isolation forest path-length correction.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// One isolation tree in array form. Internal nodes carry a split feature and
/// threshold; a node is a leaf when its `feature` entry is negative, and
/// `size` then holds the number of training samples that reached it.
#[derive(Debug, Clone, Deserialize)]
pub struct IsolationTree {
    pub feature: Vec<i32>,
    pub threshold: Vec<f64>,
    pub left: Vec<i32>,
    pub right: Vec<i32>,
    pub size: Vec<u32>,
}

impl IsolationTree {
    fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = 0usize;
        let mut depth = 0.0;
        loop {
            let feature = self.feature[node];
            if feature < 0 {
                return depth + average_path_length(self.size[node] as f64);
            }
            node = if sample[feature as usize] <= self.threshold[node] {
                self.left[node] as usize
            } else {
                self.right[node] as usize
            };
            depth += 1.0;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IsolationForest {
    pub trees: Vec<IsolationTree>,
    pub max_samples: u32,
}

impl IsolationForest {
    /// Anomaly score in (0, 1]: `2^(-E[h(x)] / c(n))`. Higher means the
    /// sample isolates faster and is therefore more anomalous.
    fn anomaly_score(&self, sample: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let mean_path: f64 = self
            .trees
            .iter()
            .map(|tree| tree.path_length(sample))
            .sum::<f64>()
            / self.trees.len() as f64;
        let normalizer = average_path_length(self.max_samples as f64);
        if normalizer <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / normalizer)
    }
}

/// Expected path length of an unsuccessful BST search over `n` samples.
fn average_path_length(n: f64) -> f64 {
    if n <= 1.0 {
        return 0.0;
    }
    if n == 2.0 {
        return 1.0;
    }
    let harmonic = (n - 1.0).ln() + EULER_GAMMA;
    2.0 * harmonic - 2.0 * (n - 1.0) / n
}

/// On-disk model artifact: the serialized forest, the model-facing feature
/// order, calibration constants, and optional default tier thresholds.
#[derive(Debug, Deserialize)]
pub struct ModelArtifact {
    pub features: Vec<String>,
    pub score_min: f64,
    pub score_max: f64,
    #[serde(default)]
    pub thresholds: Option<TierThresholds>,
    pub forest: IsolationForest,
}

/// Unsupervised scorer over the fixed eight-feature order. Immutable after
/// load; safe to share across workers without locking.
pub struct IsolationScorer {
    forest: Option<IsolationForest>,
    score_min: f64,
    score_max: f64,
    thresholds: Option<TierThresholds>,
}

impl IsolationScorer {
    /// Load the artifact, falling back to the mean-of-features scorer when it
    /// is missing or unreadable. The fallback is logged once, here.
    pub fn from_config(config: &RiskConfig) -> Self {
        let mut scorer = match Self::load_artifact(&config.model_artifact_path) {
            Ok(scorer) => scorer,
            Err(reason) => {
                log::warn!(
                    "Risk model unavailable ({}), falling back to mean-of-features scoring",
                    reason
                );
                IsolationScorer {
                    forest: None,
                    score_min: 0.0,
                    score_max: 1.0,
                    thresholds: None,
                }
            }
        };

        if let Some(path) = &config.thresholds_path {
            match Self::load_thresholds(path) {
                Ok(thresholds) => scorer.thresholds = Some(thresholds),
                Err(reason) => log::warn!("Ignoring thresholds file {}: {}", path, reason),
            }
        }

        scorer
    }

    fn load_artifact(path: &str) -> Result<Self, String> {
        let raw = fs::read_to_string(Path::new(path)).map_err(|e| e.to_string())?;
        let artifact: ModelArtifact = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        if artifact.features.len() != 8 {
            return Err(format!(
                "artifact lists {} features, expected 8",
                artifact.features.len()
            ));
        }
        log::info!(
            "Loaded isolation forest with {} trees from {}",
            artifact.forest.trees.len(),
            path
        );
        Ok(IsolationScorer {
            forest: Some(artifact.forest),
            score_min: artifact.score_min,
            score_max: artifact.score_max,
            thresholds: artifact.thresholds,
        })
    }

    fn load_thresholds(path: &str) -> Result<TierThresholds, String> {
        let raw = fs::read_to_string(Path::new(path)).map_err(|e| e.to_string())?;
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    }

    /// Tier thresholds shipped with the artifact or the companion file, if any.
    pub fn thresholds(&self) -> Option<TierThresholds> {
        self.thresholds.clone()
    }

    /// Normalized anomaly score in [0, 1] for a feature vector in the fixed
    /// model order.
    pub fn score(&self, sample: &[f64; 8]) -> f64 {
        match &self.forest {
            Some(forest) => {
                let raw = forest.anomaly_score(sample);
                let span = self.score_max - self.score_min;
                if span.abs() < f64::EPSILON {
                    return 0.5;
                }
                ((raw - self.score_min) / span).clamp(0.0, 1.0)
            }
            None => sample.iter().sum::<f64>() / sample.len() as f64,
        }
    }

    #[cfg(test)]
    pub fn fallback() -> Self {
        IsolationScorer {
            forest: None,
            score_min: 0.0,
            score_max: 1.0,
            thresholds: None,
        }
    }
}
