use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SmootherConfig {
    /// Weight of the newest sample
    pub alpha: f64,
    /// Value before the first sample
    pub initial: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            alpha: 0.32,
            initial: 0.5,
        }
    }
}

/// Exponential moving average over the forest's per-tick output.
///
/// Starts at a fixed prior instead of the first sample, so a single anomalous
/// first tick is softened like any other.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TrendSmoother {
    alpha: f64,
    initial: f64,
    value: f64,
    samples: u64,
}

impl TrendSmoother {
    pub fn new(alpha: f64, initial: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            initial,
            value: initial,
            samples: 0,
        }
    }

    pub fn from_config(config: &SmootherConfig) -> Self {
        Self::new(config.alpha, config.initial)
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        self.samples += 1;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn reset(&mut self) {
        self.value = self.initial;
        self.samples = 0;
    }
}

impl Default for TrendSmoother {
    fn default() -> Self {
        Self::from_config(&SmootherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_prior() {
        let smoother = TrendSmoother::default();
        assert_eq!(smoother.value(), 0.5);
    }

    #[test]
    fn test_single_step() {
        let mut smoother = TrendSmoother::default();
        let v = smoother.update(1.0);
        assert!((v - (0.32 + 0.68 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_converges_to_constant() {
        for target in [0.0, 0.37, 0.9, 1.0] {
            let mut smoother = TrendSmoother::default();
            for _ in 0..200 {
                smoother.update(target);
            }
            assert!(
                (smoother.value() - target).abs() < 1e-9,
                "did not converge to {}: {}",
                target,
                smoother.value()
            );
        }
    }

    #[test]
    fn test_reset() {
        let mut smoother = TrendSmoother::new(0.5, 0.2);
        smoother.update(1.0);
        smoother.reset();
        assert_eq!(smoother.value(), 0.2);
        assert_eq!(smoother.samples(), 0);
    }
}
