//! Metric snapshot generator
//!
//! Produces one `MetricSnapshot` per tick: the baseline with Gaussian
//! jitter, reshaped by the active scenario, then clamped to physical ranges.

use chrono::{DateTime, Duration, Utc};
use pulse_core::snapshot::NUM_METRICS;
use pulse_core::{MetricKind, MetricSnapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::scenarios::{Normal, Scenario};

/// Error rate is a percentage of requests; keep it believable
pub const MAX_ERROR_RATE: f64 = 50.0;
pub const MAX_SATURATION: f64 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Healthy values in `MetricKind::ALL` order
    pub baseline: [f64; NUM_METRICS],
    /// Standard deviation of the jitter, relative to the baseline value
    pub jitter: f64,
    pub tick_interval_ms: u64,
    /// OS entropy when unset
    pub seed: Option<u64>,
    /// Timestamp of tick 1; now when unset
    pub start: Option<DateTime<Utc>>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            baseline: [1000.0, 1.0, 100.0, 20.0],
            jitter: 0.02,
            tick_interval_ms: 5000,
            seed: None,
            start: None,
        }
    }
}

pub struct MetricSimulator {
    config: SimulatorConfig,
    scenario: Box<dyn Scenario>,
    rng: StdRng,
    start: DateTime<Utc>,
    next_tick: u64,
}

impl MetricSimulator {
    /// Healthy simulator
    pub fn new(config: SimulatorConfig) -> Self {
        Self::with_scenario(config, Box::new(Normal))
    }

    pub fn with_scenario(config: SimulatorConfig, scenario: Box<dyn Scenario>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let start = config.start.unwrap_or_else(Utc::now);
        Self {
            config,
            scenario,
            rng,
            start,
            next_tick: 1,
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn scenario(&self) -> &dyn Scenario {
        self.scenario.as_ref()
    }

    /// Tick number the next snapshot will carry
    pub fn next_tick(&self) -> u64 {
        self.next_tick
    }

    /// Generate the next snapshot
    pub fn tick(&mut self) -> MetricSnapshot {
        let tick = self.next_tick;
        self.next_tick += 1;

        let mut values = self.config.baseline;
        for v in values.iter_mut() {
            let z: f64 = self.rng.sample(StandardNormal);
            *v *= 1.0 + z * self.config.jitter;
        }

        self.scenario.apply(tick, &mut values);

        for (kind, v) in MetricKind::ALL.iter().zip(values.iter_mut()) {
            let cap = match kind {
                MetricKind::ErrorRate => MAX_ERROR_RATE,
                MetricKind::Saturation => MAX_SATURATION,
                _ => f64::INFINITY,
            };
            *v = v.clamp(0.0, cap);
        }

        let offset = Duration::milliseconds((self.config.tick_interval_ms * (tick - 1)) as i64);
        MetricSnapshot::from_values(tick, self.start + offset, values)
    }
}

impl Iterator for MetricSimulator {
    type Item = MetricSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.tick())
    }
}
