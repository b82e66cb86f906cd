use serde::{Deserialize, Serialize};

/// Maps forest and trend output onto an operator-facing 0-100 risk score.
///
/// `combined = forest_weight * forest + ewma_weight * ewma`, then a fixed
/// logistic curve: about 7 at 0.5, 50 at the center, 87 at 0.85.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RiskCalibrator {
    pub forest_weight: f64,
    pub ewma_weight: f64,
    /// Combined value that maps to a score of 50
    pub center: f64,
    pub steepness: f64,
}

impl Default for RiskCalibrator {
    fn default() -> Self {
        Self {
            forest_weight: 0.62,
            ewma_weight: 0.38,
            center: 0.70,
            steepness: 13.0,
        }
    }
}

impl RiskCalibrator {
    pub fn combine(&self, forest_score: f64, ewma_score: f64) -> f64 {
        self.forest_weight * forest_score + self.ewma_weight * ewma_score
    }

    pub fn calibrate(&self, combined: f64) -> u8 {
        let raw = 100.0 / (1.0 + (-self.steepness * (combined - self.center)).exp());
        if raw.is_nan() {
            return 0;
        }
        raw.clamp(0.0, 100.0).round() as u8
    }
}
