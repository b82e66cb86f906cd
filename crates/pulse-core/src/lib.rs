//! pulse-core: streaming service-health risk scoring
//!
//! Turns a live stream of (rate, error rate, p99 latency, saturation)
//! snapshots into a 0-100 risk score, names the metric driving it, and fires
//! tiered alerts with hysteresis.
//!
//! - `algo`: isolation forest, EWMA smoother, risk calibration
//! - `engine`: learning/scoring pipeline per monitored target
//! - `attribution`: per-metric Z-score ranking
//! - `alert`: severity tiers, consecutive-tick gate, hysteresis
//! - `session` / `registry`: per-target state and its explicit lifecycle
//! - `forwarder`: non-blocking alert delivery

pub mod alert;
pub mod algo;
pub mod attribution;
pub mod config;
pub mod engine;
pub mod error;
pub mod forwarder;
pub mod registry;
pub mod session;
pub mod snapshot;

pub use alert::{AlertConfig, AlertEngine, AlertRecord, AlertSeverity};
pub use attribution::{AttributionEngine, AttributionRecord, DeviationSeverity};
pub use config::PulseConfig;
pub use engine::{Phase, PipelineConfig, PipelineOutput, ScoringPipeline, Trend};
pub use error::{PulseError, Result};
pub use registry::{RegistryConfig, SessionRegistry};
pub use session::{MonitorSession, SessionConfig, TickOutcome};
pub use snapshot::{HistoryBuffer, MetricKind, MetricSnapshot};
