//! One monitored target: rolling history, scoring cadence, pipeline,
//! attribution and alert state.
//!
//! History appends on every tick; the pipeline, attribution and alerting run
//! only on every `scoring_every`-th tick. Sessions share nothing with each
//! other, so callers may hold many of them behind independent locks.

use crate::alert::{AlertConfig, AlertEngine, AlertRecord};
use crate::attribution::{AttributionEngine, AttributionRecord};
use crate::config::PulseConfig;
use crate::engine::{Phase, PipelineConfig, PipelineOutput, ScoringPipeline};
use crate::error::Result;
use crate::snapshot::{HistoryBuffer, MetricSnapshot, DEFAULT_HISTORY_CAPACITY};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Expected spacing between ticks from the metric source
    pub tick_interval_ms: u64,
    /// Score on every Nth ingested tick
    pub scoring_every: u64,
    pub history_capacity: usize,
    /// Oldest snapshots of history used as the attribution baseline
    pub attribution_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5000,
            scoring_every: 3,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            attribution_window: 48,
        }
    }
}

/// What happened to one ingested snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickOutcome {
    pub tick: u64,
    /// False on ticks between scoring intervals
    pub scored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PipelineOutput>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attribution: Vec<AttributionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertRecord>,
}

pub struct MonitorSession<R: Rng = StdRng> {
    id: String,
    config: SessionConfig,
    history: HistoryBuffer,
    pipeline: ScoringPipeline<R>,
    attribution: AttributionEngine,
    alerts: AlertEngine,
    last_attribution: Vec<AttributionRecord>,
    ticks_seen: u64,
    created_at: DateTime<Utc>,
}

impl MonitorSession<StdRng> {
    pub fn new(
        id: impl Into<String>,
        config: SessionConfig,
        pipeline: PipelineConfig,
        alerts: AlertConfig,
    ) -> Self {
        Self::with_pipeline(id.into(), config, ScoringPipeline::new(pipeline), alerts)
    }

    pub fn from_config(id: impl Into<String>, config: &PulseConfig) -> Self {
        Self::new(
            id,
            config.session.clone(),
            config.pipeline.clone(),
            config.alerts.clone(),
        )
    }

    /// Drop all history and learned state; the session starts learning again.
    pub fn reset(&mut self) {
        self.history.clear();
        self.pipeline.reset();
        self.alerts.reset();
        self.last_attribution.clear();
        self.ticks_seen = 0;
    }
}

impl<R: Rng> MonitorSession<R> {
    /// Session whose forest draws splits from `rng`.
    pub fn with_rng(
        id: impl Into<String>,
        config: SessionConfig,
        pipeline: PipelineConfig,
        alerts: AlertConfig,
        rng: R,
    ) -> Self {
        Self::with_pipeline(id.into(), config, ScoringPipeline::with_rng(pipeline, rng), alerts)
    }

    fn with_pipeline(
        id: String,
        config: SessionConfig,
        pipeline: ScoringPipeline<R>,
        alerts: AlertConfig,
    ) -> Self {
        Self {
            history: HistoryBuffer::new(config.history_capacity),
            id,
            config,
            pipeline,
            attribution: AttributionEngine::new(),
            alerts: AlertEngine::new(alerts),
            last_attribution: Vec::new(),
            ticks_seen: 0,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn pipeline(&self) -> &ScoringPipeline<R> {
        &self.pipeline
    }

    pub fn alert_engine(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn phase(&self) -> Phase {
        self.pipeline.phase()
    }

    pub fn ticks_seen(&self) -> u64 {
        self.ticks_seen
    }

    pub fn last_output(&self) -> Option<&PipelineOutput> {
        self.pipeline.last_output()
    }

    pub fn last_attribution(&self) -> &[AttributionRecord] {
        &self.last_attribution
    }

    /// Alert log, most recent first
    pub fn alerts(&self) -> impl Iterator<Item = &AlertRecord> {
        self.alerts.log()
    }

    /// Attribution baseline: the oldest snapshots of history, excluding the newest.
    fn attribution_baseline(&self) -> Vec<MetricSnapshot> {
        let available = self.history.len().saturating_sub(1);
        self.history.oldest(self.config.attribution_window.min(available))
    }

    /// Ingest one snapshot.
    ///
    /// Out-of-order ticks are rejected before anything changes. On scoring
    /// ticks an incomplete snapshot reaching a trained pipeline is rejected
    /// as well; it stays in history but produces no score.
    pub fn ingest(&mut self, snapshot: MetricSnapshot) -> Result<TickOutcome> {
        self.history.push(snapshot)?;
        self.ticks_seen += 1;

        if self.ticks_seen % self.config.scoring_every.max(1) != 0 {
            return Ok(TickOutcome {
                tick: snapshot.tick,
                scored: false,
                output: None,
                attribution: Vec::new(),
                alert: None,
            });
        }

        let was_learning = self.pipeline.phase() == Phase::Learning;
        let output = self.pipeline.update(&snapshot, &self.history)?;

        if was_learning && output.is_scoring() {
            info!(
                session = %self.id,
                tick = snapshot.tick,
                baseline = self.pipeline.config().baseline_ticks_needed,
                "Baseline captured, forest trained."
            );
        }

        let baseline = self.attribution_baseline();
        let attribution = self.attribution.compute(&snapshot, &baseline);

        let alert = if output.is_scoring() {
            self.alerts
                .evaluate(output.score, &attribution, &self.id, snapshot.timestamp)
        } else {
            None
        };

        if let Some(alert) = &alert {
            debug!(
                session = %self.id,
                severity = %alert.severity,
                score = alert.score,
                "Alert fired."
            );
        }

        self.last_attribution = attribution.clone();

        Ok(TickOutcome {
            tick: snapshot.tick,
            scored: true,
            output: Some(output),
            attribution,
            alert,
        })
    }
}
