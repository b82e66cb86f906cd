//! Simulation Scenarios
//!
//! Each scenario reshapes the jittered baseline metrics once its onset tick
//! is reached:
//! - **failure**: abrupt breakage (downstream failure, error burst, traffic drop)
//! - **degradation**: slow drift (latency creep, saturation climb)

pub mod degradation;
pub mod failure;

use pulse_core::snapshot::NUM_METRICS;

/// Tick at which anomalous scenarios start by default; leaves room for the
/// 12-tick baseline plus some normal scoring.
pub const DEFAULT_ONSET: u64 = 30;

/// Trait for simulation scenarios
///
/// `apply` is called once per tick, after baseline jitter, with the tick
/// number (1-based) and the metric values in `MetricKind::ALL` order.
pub trait Scenario: Send {
    /// Registry name of the scenario
    fn name(&self) -> &str;

    /// Reshape `values` for `tick`
    fn apply(&mut self, tick: u64, values: &mut [f64; NUM_METRICS]);

    /// First tick the scenario deviates from normal, if ever
    fn onset(&self) -> Option<u64> {
        None
    }
}

/// Healthy service, jitter only
#[derive(Debug, Clone, Default)]
pub struct Normal;

impl Scenario for Normal {
    fn name(&self) -> &str {
        "normal"
    }

    fn apply(&mut self, _tick: u64, _values: &mut [f64; NUM_METRICS]) {}
}

pub use degradation::{LatencyCreep, SaturationClimb};
pub use failure::{DownstreamFailure, ErrorBurst, TrafficDrop};

/// Create a scenario by name with default parameters
pub fn create_scenario(name: &str) -> Option<Box<dyn Scenario>> {
    create_scenario_at(name, DEFAULT_ONSET)
}

/// Create a scenario by name, starting at `onset`
pub fn create_scenario_at(name: &str, onset: u64) -> Option<Box<dyn Scenario>> {
    match name.to_lowercase().as_str() {
        "normal" | "baseline" => Some(Box::new(Normal)),
        "downstream_failure" | "outage" => Some(Box::new(DownstreamFailure::new(onset))),
        "latency_creep" => Some(Box::new(LatencyCreep::new(onset, 0.04))),
        "traffic_drop" => Some(Box::new(TrafficDrop::new(onset, 0.35))),
        "saturation_climb" => Some(Box::new(SaturationClimb::new(onset, 2.5))),
        "error_burst" => Some(Box::new(ErrorBurst::new(onset, 6, 12.0))),
        _ => None,
    }
}

/// List all available scenarios
pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    vec![
        ("normal", "Healthy service with small Gaussian jitter"),
        (
            "downstream_failure",
            "Dependency outage: traffic collapses, errors and p99 spike",
        ),
        ("latency_creep", "p99 latency grows a few percent every tick"),
        ("traffic_drop", "Request rate falls to about a third"),
        (
            "saturation_climb",
            "Saturation rises steadily, dragging latency up past 80%",
        ),
        ("error_burst", "Short burst of elevated error rate"),
    ]
}
