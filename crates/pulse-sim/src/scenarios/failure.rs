//! Abrupt failure scenarios

use super::Scenario;
use pulse_core::MetricKind;
use pulse_core::snapshot::NUM_METRICS;

// ============================================================================
// Downstream Failure
// ============================================================================

/// A dependency goes down: callers give up, errors and tail latency explode,
/// and the service idles while waiting on timeouts.
pub struct DownstreamFailure {
    pub onset: u64,
    pub rate_factor: f64,
    pub error_rate: f64,
    pub latency_factor: f64,
    pub saturation_factor: f64,
}

impl DownstreamFailure {
    pub fn new(onset: u64) -> Self {
        Self {
            onset,
            rate_factor: 0.2,
            error_rate: 15.0,
            latency_factor: 8.0,
            saturation_factor: 0.5,
        }
    }
}

impl Scenario for DownstreamFailure {
    fn name(&self) -> &str {
        "downstream_failure"
    }

    fn onset(&self) -> Option<u64> {
        Some(self.onset)
    }

    fn apply(&mut self, tick: u64, values: &mut [f64; NUM_METRICS]) {
        if tick < self.onset {
            return;
        }
        values[MetricKind::Rate.index()] *= self.rate_factor;
        values[MetricKind::ErrorRate.index()] = self.error_rate;
        values[MetricKind::P99.index()] *= self.latency_factor;
        values[MetricKind::Saturation.index()] *= self.saturation_factor;
    }
}

// ============================================================================
// Error Burst
// ============================================================================

/// Error rate jumps to `peak` for `duration` ticks, then recovers
pub struct ErrorBurst {
    pub onset: u64,
    pub duration: u64,
    pub peak: f64,
}

impl ErrorBurst {
    pub fn new(onset: u64, duration: u64, peak: f64) -> Self {
        Self {
            onset,
            duration,
            peak,
        }
    }
}

impl Scenario for ErrorBurst {
    fn name(&self) -> &str {
        "error_burst"
    }

    fn onset(&self) -> Option<u64> {
        Some(self.onset)
    }

    fn apply(&mut self, tick: u64, values: &mut [f64; NUM_METRICS]) {
        if tick < self.onset || tick >= self.onset + self.duration {
            return;
        }
        let err = &mut values[MetricKind::ErrorRate.index()];
        *err = err.max(self.peak);
        // Retries add some latency
        values[MetricKind::P99.index()] *= 1.3;
    }
}

// ============================================================================
// Traffic Drop
// ============================================================================

/// Upstream stops sending: only the rate moves
pub struct TrafficDrop {
    pub onset: u64,
    pub factor: f64,
}

impl TrafficDrop {
    pub fn new(onset: u64, factor: f64) -> Self {
        Self { onset, factor }
    }
}

impl Scenario for TrafficDrop {
    fn name(&self) -> &str {
        "traffic_drop"
    }

    fn onset(&self) -> Option<u64> {
        Some(self.onset)
    }

    fn apply(&mut self, tick: u64, values: &mut [f64; NUM_METRICS]) {
        if tick >= self.onset {
            values[MetricKind::Rate.index()] *= self.factor;
            values[MetricKind::Saturation.index()] *= self.factor.max(0.5);
        }
    }
}
