//! pulse-sim - Service Metric Simulator
//!
//! Generates the four golden-signal metrics of a service tick by tick, with
//! controlled failure injection, to exercise pulse sessions locally or
//! against a running gatekeeper.
//!
//! ## Scenarios
//!
//! | Name | Effect after onset |
//! |------|--------------------|
//! | `normal` | jitter only |
//! | `downstream_failure` | rate x0.2, error rate 15%, p99 x8, saturation halved |
//! | `latency_creep` | p99 +4% per tick, up to 10x |
//! | `traffic_drop` | rate x0.35 |
//! | `saturation_climb` | saturation +2.5 per tick, p99 follows past 80% |
//! | `error_burst` | error rate 12% for 6 ticks |

pub mod generator;
pub mod scenarios;

pub use generator::{MetricSimulator, SimulatorConfig};
pub use scenarios::{Scenario, create_scenario, create_scenario_at, list_scenarios};

/// Simulator for `scenario`, or `None` if the name is unknown
pub fn simulator_for(
    scenario: &str,
    onset: u64,
    config: SimulatorConfig,
) -> Option<MetricSimulator> {
    let scenario = create_scenario_at(scenario, onset)?;
    Some(MetricSimulator::with_scenario(config, scenario))
}
