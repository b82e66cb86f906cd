//! Gradual degradation scenarios

use super::Scenario;
use pulse_core::MetricKind;
use pulse_core::snapshot::NUM_METRICS;

/// p99 grows by `per_tick` (relative) every tick after onset, up to 10x
pub struct LatencyCreep {
    pub onset: u64,
    pub per_tick: f64,
}

impl LatencyCreep {
    pub fn new(onset: u64, per_tick: f64) -> Self {
        Self { onset, per_tick }
    }
}

impl Scenario for LatencyCreep {
    fn name(&self) -> &str {
        "latency_creep"
    }

    fn onset(&self) -> Option<u64> {
        Some(self.onset)
    }

    fn apply(&mut self, tick: u64, values: &mut [f64; NUM_METRICS]) {
        if tick < self.onset {
            return;
        }
        let elapsed = (tick - self.onset + 1) as f64;
        let factor = (1.0 + self.per_tick * elapsed).min(10.0);
        values[MetricKind::P99.index()] *= factor;
        values[MetricKind::Saturation.index()] *= 1.0 + (factor - 1.0) * 0.1;
    }
}

/// Saturation climbs `per_tick` points every tick; past 80% latency follows
pub struct SaturationClimb {
    pub onset: u64,
    pub per_tick: f64,
}

impl SaturationClimb {
    pub fn new(onset: u64, per_tick: f64) -> Self {
        Self { onset, per_tick }
    }
}

impl Scenario for SaturationClimb {
    fn name(&self) -> &str {
        "saturation_climb"
    }

    fn onset(&self) -> Option<u64> {
        Some(self.onset)
    }

    fn apply(&mut self, tick: u64, values: &mut [f64; NUM_METRICS]) {
        if tick < self.onset {
            return;
        }
        let elapsed = (tick - self.onset + 1) as f64;
        let sat = values[MetricKind::Saturation.index()] + self.per_tick * elapsed;
        values[MetricKind::Saturation.index()] = sat;

        if sat > 80.0 {
            values[MetricKind::P99.index()] *= 1.0 + (sat - 80.0) / 20.0;
        }
    }
}
