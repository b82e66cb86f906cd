//! Pulse Scoring Pipeline
//!
//! Two-phase state machine per monitored target:
//! 1. Learning: history is shorter than the baseline requirement; reports progress
//! 2. Scoring: forest trained once on the oldest baseline window; every call
//!    produces a calibrated 0-100 risk score plus diagnostics
//!
//! Stages per scored tick: isolation forest -> EWMA -> weighted combine -> sigmoid.

use crate::algo::{AnomalyForest, ForestConfig, RiskCalibrator, SmootherConfig, TrendSmoother};
use crate::error::{PulseError, Result};
use crate::snapshot::{HistoryBuffer, MetricSnapshot};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Snapshots required before the forest is trained (12 = 60s at 5s cadence)
    pub baseline_ticks_needed: usize,
    pub forest: ForestConfig,
    pub smoother: SmootherConfig,
    pub calibration: RiskCalibrator,
    /// Calibrated scores kept for trend detection
    pub score_history: usize,
    /// Scores considered by the trend check, newest included
    pub trend_window: usize,
    /// Mean-minus-oldest delta that counts as rising/falling
    pub trend_delta: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            baseline_ticks_needed: 12,
            forest: ForestConfig::default(),
            smoother: SmootherConfig::default(),
            calibration: RiskCalibrator::default(),
            score_history: 60,
            trend_window: 6,
            trend_delta: 8.0,
        }
    }
}

// ============================================================================
// OUTPUT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Learning,
    Scoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

/// Result of one pipeline update.
///
/// Learning outputs carry `progress` only; scoring outputs carry the
/// intermediate diagnostics and the trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub score: u8,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ewma_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

impl PipelineOutput {
    fn learning(progress: f64) -> Self {
        Self {
            score: 0,
            phase: Phase::Learning,
            progress: Some(progress.clamp(0.0, 1.0)),
            if_score: None,
            ewma_score: None,
            combined: None,
            trend: None,
        }
    }

    pub fn is_scoring(&self) -> bool {
        self.phase == Phase::Scoring
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Forest + smoother + calibrator for a single monitored target
pub struct ScoringPipeline<R: Rng = StdRng> {
    config: PipelineConfig,
    forest: AnomalyForest<R>,
    smoother: TrendSmoother,
    scores: VecDeque<u8>,
    last: Option<PipelineOutput>,
}

impl ScoringPipeline<StdRng> {
    pub fn new(config: PipelineConfig) -> Self {
        let forest = AnomalyForest::from_config(&config.forest);
        Self::with_forest(config, forest)
    }

    /// Discard all learned state. The next update starts learning again.
    pub fn reset(&mut self) {
        self.forest = AnomalyForest::from_config(&self.config.forest);
        self.smoother.reset();
        self.scores.clear();
        self.last = None;
    }
}

impl Default for ScoringPipeline<StdRng> {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl<R: Rng> ScoringPipeline<R> {
    /// Pipeline drawing tree splits from `rng` instead of the configured seed.
    pub fn with_rng(config: PipelineConfig, rng: R) -> Self {
        let forest = AnomalyForest::with_rng(rng, config.forest.trees, config.forest.subsample_size);
        Self::with_forest(config, forest)
    }

    fn with_forest(config: PipelineConfig, forest: AnomalyForest<R>) -> Self {
        let smoother = TrendSmoother::from_config(&config.smoother);
        Self {
            scores: VecDeque::with_capacity(config.score_history),
            config,
            forest,
            smoother,
            last: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        if self.forest.is_trained() {
            Phase::Scoring
        } else {
            Phase::Learning
        }
    }

    pub fn forest(&self) -> &AnomalyForest<R> {
        &self.forest
    }

    pub fn last_output(&self) -> Option<&PipelineOutput> {
        self.last.as_ref()
    }

    /// Calibrated scores, oldest first
    pub fn scores(&self) -> impl Iterator<Item = u8> + '_ {
        self.scores.iter().copied()
    }

    /// Advance the pipeline with `snapshot`, which must already be the newest
    /// entry of `history`.
    ///
    /// Trains on the first call where `history` meets the baseline
    /// requirement. Once training is due, incomplete snapshots are rejected
    /// and nothing changes.
    pub fn update(
        &mut self,
        snapshot: &MetricSnapshot,
        history: &HistoryBuffer,
    ) -> Result<PipelineOutput> {
        let needed = self.config.baseline_ticks_needed.max(1);

        if !self.forest.is_trained() && history.len() < needed {
            let out = PipelineOutput::learning(history.len() as f64 / needed as f64);
            self.last = Some(out.clone());
            return Ok(out);
        }

        if let Some(metric) = snapshot.first_missing() {
            return Err(PulseError::IncompleteSnapshot {
                tick: snapshot.tick,
                metric,
            });
        }

        if !self.forest.is_trained() && !self.forest.train(&history.oldest(needed)) {
            let out = PipelineOutput::learning(1.0);
            self.last = Some(out.clone());
            return Ok(out);
        }

        let if_score = self.forest.score(snapshot);
        let ewma = self.smoother.update(if_score);
        let calibrator = &self.config.calibration;
        let combined = calibrator.combine(if_score, ewma);
        let score = calibrator.calibrate(combined);

        if self.scores.len() >= self.config.score_history.max(1) {
            self.scores.pop_front();
        }
        self.scores.push_back(score);

        let out = PipelineOutput {
            score,
            phase: Phase::Scoring,
            progress: None,
            if_score: Some(if_score),
            ewma_score: Some(ewma),
            combined: Some(combined),
            trend: Some(self.trend()),
        };
        self.last = Some(out.clone());
        Ok(out)
    }

    /// Direction of the most recent scores relative to the oldest of them.
    pub fn trend(&self) -> Trend {
        let window = self.config.trend_window.max(1).min(self.scores.len());
        if window < 2 {
            return Trend::Stable;
        }

        let recent = self.scores.range(self.scores.len() - window..);
        let oldest = self.scores[self.scores.len() - window] as f64;
        let mean = recent.map(|&s| s as f64).sum::<f64>() / window as f64;

        let delta = mean - oldest;
        if delta > self.config.trend_delta {
            Trend::Rising
        } else if delta < -self.config.trend_delta {
            Trend::Falling
        } else {
            Trend::Stable
        }
    }
}
