pub mod calibration;
pub mod ewma;
pub mod isolation_forest;

// Re-exports for convenience
pub use calibration::RiskCalibrator;
pub use ewma::{SmootherConfig, TrendSmoother};
pub use isolation_forest::{AnomalyForest, ForestConfig, IsolationTree};
