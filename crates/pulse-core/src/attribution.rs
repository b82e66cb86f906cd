//! Per-metric causal attribution
//!
//! Answers "which metric is driving this?" by Z-scoring each metric of the
//! current snapshot against a baseline window and ranking by magnitude. The
//! result is recomputed from scratch every scoring tick; the first entry is
//! the primary driver consumed by alerting and downstream explanation.

use crate::snapshot::{MetricKind, MetricSnapshot};
use serde::{Deserialize, Serialize};

/// Baseline snapshots required before any attribution is produced.
pub const MIN_BASELINE_SAMPLES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviationSeverity {
    Normal,
    Elevated,
    Warning,
    Critical,
}

impl DeviationSeverity {
    /// Tier for an absolute Z-score (thresholds 1.0 / 2.0 / 3.5, exclusive).
    pub fn from_abs_z(abs_z: f64) -> Self {
        if abs_z > 3.5 {
            Self::Critical
        } else if abs_z > 2.0 {
            Self::Warning
        } else if abs_z > 1.0 {
            Self::Elevated
        } else {
            Self::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionRecord {
    pub key: MetricKind,
    pub label: &'static str,
    pub unit: &'static str,
    pub current: f64,
    pub baseline_mean: f64,
    pub baseline_std: f64,
    /// Signed `(current - mean) / std`
    pub z_score: f64,
    pub inverted: bool,
    /// Z in the harmful direction: negated for inverted metrics
    pub directional_z: f64,
    pub abs_z: f64,
    pub pct_change: f64,
    pub severity: DeviationSeverity,
}

impl AttributionRecord {
    /// True when the metric moved up relative to its baseline.
    pub fn is_increase(&self) -> bool {
        self.current >= self.baseline_mean
    }
}

/// Mean and population standard deviation of the finite values.
fn baseline_stats(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let finite: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }

    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();

    // Zero-variance baseline
    let std = if std == 0.0 { 1.0 } else { std };
    Some((mean, std))
}

/// Stateless Z-score ranking over the four metrics
#[derive(Debug, Clone, Default)]
pub struct AttributionEngine;

impl AttributionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Rank metrics of `snapshot` by deviation from `baseline`, largest first.
    ///
    /// Empty when the baseline holds fewer than `MIN_BASELINE_SAMPLES`
    /// snapshots. Metrics with no finite current value or no finite baseline
    /// values are left out.
    pub fn compute(
        &self,
        snapshot: &MetricSnapshot,
        baseline: &[MetricSnapshot],
    ) -> Vec<AttributionRecord> {
        if baseline.len() < MIN_BASELINE_SAMPLES {
            return Vec::new();
        }

        let mut records: Vec<AttributionRecord> = MetricKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let current = snapshot.get(kind);
                if !current.is_finite() {
                    return None;
                }

                let (mean, std) = baseline_stats(baseline.iter().map(|s| s.get(kind)))?;
                let z_score = (current - mean) / std;
                let directional_z = if kind.inverted() { -z_score } else { z_score };
                let abs_z = z_score.abs();
                let denom = if mean == 0.0 { 1.0 } else { mean.abs() };

                Some(AttributionRecord {
                    key: kind,
                    label: kind.label(),
                    unit: kind.unit(),
                    current,
                    baseline_mean: mean,
                    baseline_std: std,
                    z_score,
                    inverted: kind.inverted(),
                    directional_z,
                    abs_z,
                    pct_change: (current - mean) / denom * 100.0,
                    severity: DeviationSeverity::from_abs_z(abs_z),
                })
            })
            .collect();

        records.sort_by(|a, b| b.abs_z.total_cmp(&a.abs_z));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snap(tick: u64, rate: f64, err: f64, p99: f64, sat: f64) -> MetricSnapshot {
        MetricSnapshot::new(tick, Utc::now(), rate, err, p99, sat)
    }

    fn baseline() -> Vec<MetricSnapshot> {
        (0..20)
            .map(|i| {
                let j = (i % 5) as f64 - 2.0;
                snap(i, 1000.0 + 10.0 * j, 1.0 + 0.1 * j, 100.0 + 2.0 * j, 20.0 + j)
            })
            .collect()
    }

    #[test]
    fn test_requires_ten_baseline_samples() {
        let engine = AttributionEngine::new();
        let short: Vec<_> = baseline().into_iter().take(9).collect();
        assert!(engine.compute(&snap(99, 1.0, 1.0, 1.0, 1.0), &short).is_empty());
        assert_eq!(engine.compute(&snap(99, 1.0, 1.0, 1.0, 1.0), &baseline()).len(), 4);
    }

    #[test]
    fn test_sorted_and_severity_consistent() {
        let engine = AttributionEngine::new();
        let probes = [
            snap(100, 200.0, 15.0, 800.0, 10.0),
            snap(101, 1005.0, 1.05, 101.0, 20.5),
            snap(102, 990.0, 1.4, 104.0, 23.0),
            snap(103, 1040.0, 0.7, 99.0, 17.0),
        ];

        for probe in &probes {
            let records = engine.compute(probe, &baseline());
            for pair in records.windows(2) {
                assert!(pair[0].abs_z >= pair[1].abs_z);
            }
            for r in &records {
                let expected = if r.abs_z > 3.5 {
                    DeviationSeverity::Critical
                } else if r.abs_z > 2.0 {
                    DeviationSeverity::Warning
                } else if r.abs_z > 1.0 {
                    DeviationSeverity::Elevated
                } else {
                    DeviationSeverity::Normal
                };
                assert_eq!(r.severity, expected, "{:?}", r.key);
            }
        }
    }

    #[test]
    fn test_rate_drop_is_positive_directional() {
        let engine = AttributionEngine::new();
        let records = engine.compute(&snap(100, 500.0, 1.0, 100.0, 20.0), &baseline());
        let rate = records.iter().find(|r| r.key == MetricKind::Rate).unwrap();

        assert!(rate.inverted);
        assert!(rate.z_score < 0.0);
        assert!(rate.directional_z > 0.0);
        assert!(!rate.is_increase());
        assert!((rate.pct_change - -50.0).abs() < 1e-9);
        assert_eq!(records[0].key, MetricKind::Rate);
    }

    #[test]
    fn test_zero_variance_uses_unit_std() {
        let engine = AttributionEngine::new();
        let flat: Vec<_> = (0..12).map(|i| snap(i, 100.0, 0.0, 50.0, 10.0)).collect();
        let records = engine.compute(&snap(12, 103.0, 0.0, 50.0, 10.0), &flat);

        let rate = records.iter().find(|r| r.key == MetricKind::Rate).unwrap();
        assert_eq!(rate.baseline_std, 1.0);
        assert_eq!(rate.z_score, 3.0);

        // Zero mean falls back to a unit denominator
        let err = records.iter().find(|r| r.key == MetricKind::ErrorRate).unwrap();
        assert_eq!(err.pct_change, 0.0);
    }

    #[test]
    fn test_missing_values_are_filtered() {
        let engine = AttributionEngine::new();
        let mut window = baseline();
        window[3].p99 = f64::NAN;
        window[4].saturation = f64::INFINITY;

        let records = engine.compute(&snap(200, 1000.0, f64::NAN, 300.0, 20.0), &window);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.key != MetricKind::ErrorRate));
        assert!(records.iter().all(|r| r.baseline_mean.is_finite()));
        assert_eq!(records[0].key, MetricKind::P99);
    }
}
