//! Tiered alerting with per-severity hysteresis
//!
//! - WARNING fires only after N consecutive ticks at or above its threshold
//! - CRITICAL and EMERGENCY fire immediately; the highest satisfied tier wins
//! - Once a severity has fired, it re-fires only after the score climbs
//!   `hysteresis_delta` points above the score it last fired at
//!
//! There is no clear or de-escalation event. Silence is the recovery signal.

use crate::attribution::AttributionRecord;
use crate::snapshot::MetricKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

/// Attribution entries copied into each alert
pub const ALERT_ATTRIBUTION_DEPTH: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub warning_threshold: u8,
    pub critical_threshold: u8,
    pub emergency_threshold: u8,
    /// Consecutive ticks at or above `warning_threshold` before WARNING fires
    pub warning_consecutive: u32,
    /// Points above a severity's last fired score needed to fire it again
    pub hysteresis_delta: u8,
    /// Alerts kept per session, most recent first
    pub log_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 50,
            critical_threshold: 72,
            emergency_threshold: 86,
            warning_consecutive: 3,
            hysteresis_delta: 10,
            log_capacity: 100,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Warning = 0,
    Critical = 1,
    Emergency = 2,
}

impl AlertSeverity {
    pub const ALL: [AlertSeverity; 3] = [Self::Warning, Self::Critical, Self::Emergency];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Emergency => "EMERGENCY",
        }
    }

    pub fn recommended_action(self) -> &'static str {
        match self {
            Self::Warning => {
                "Watch the primary driver and confirm whether the deviation persists over the next scoring ticks."
            }
            Self::Critical => {
                "Investigate the primary driver now; check recent deploys and downstream dependencies."
            }
            Self::Emergency => {
                "Page on-call immediately and prepare rollback or failover for the affected service."
            }
        }
    }

    /// Whether alerts of this severity should trigger automated analysis
    pub fn auto_analyze(self) -> bool {
        matches!(self, Self::Critical | Self::Emergency)
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub score: u8,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub primary_metric: Option<MetricKind>,
    pub primary_pct: Option<f64>,
    pub primary_z: Option<f64>,
    /// Top attribution entries at fire time
    pub attribution: Vec<AttributionRecord>,
    pub message: String,
    pub recommended_action: &'static str,
    pub auto_analyze: bool,
}

/// Alert headline. Names the primary driver, its direction and its deviation
/// when attribution is available.
pub fn format_message(
    severity: AlertSeverity,
    score: u8,
    primary: Option<&AttributionRecord>,
) -> String {
    match primary {
        Some(p) => {
            let arrow = if p.is_increase() { '↑' } else { '↓' };
            format!(
                "{}: Risk {}/100 — {} {}{:.0}% from baseline (Z={:.1})",
                severity,
                score,
                p.label,
                arrow,
                p.pct_change.abs(),
                p.z_score
            )
        }
        None => format!("{}: Risk {}/100", severity, score),
    }
}

/// Per-session alert state machine
#[derive(Debug, Clone)]
pub struct AlertEngine {
    config: AlertConfig,
    consecutive: u32,
    /// Score each severity last fired at
    last_fired: [Option<u8>; 3],
    last_fired_score: Option<u8>,
    log: VecDeque<AlertRecord>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            log: VecDeque::with_capacity(config.log_capacity.min(1024)),
            config,
            consecutive: 0,
            last_fired: [None; 3],
            last_fired_score: None,
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn consecutive_ticks(&self) -> u32 {
        self.consecutive
    }

    /// Score of the most recent alert of any severity
    pub fn last_fired_score(&self) -> Option<u8> {
        self.last_fired_score
    }

    pub fn last_fired(&self, severity: AlertSeverity) -> Option<u8> {
        self.last_fired[severity as usize]
    }

    pub fn has_fired(&self, severity: AlertSeverity) -> bool {
        self.last_fired(severity).is_some()
    }

    /// Alert log, most recent first
    pub fn log(&self) -> impl Iterator<Item = &AlertRecord> {
        self.log.iter()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Highest tier whose condition holds for `score` under the current
    /// consecutive-tick count.
    fn select_severity(&self, score: u8) -> Option<AlertSeverity> {
        if score >= self.config.emergency_threshold {
            Some(AlertSeverity::Emergency)
        } else if score >= self.config.critical_threshold {
            Some(AlertSeverity::Critical)
        } else if score >= self.config.warning_threshold
            && self.consecutive >= self.config.warning_consecutive
        {
            Some(AlertSeverity::Warning)
        } else {
            None
        }
    }

    /// Feed one scored tick. Returns the alert if one fired.
    pub fn evaluate(
        &mut self,
        score: u8,
        attribution: &[AttributionRecord],
        session_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<AlertRecord> {
        if score >= self.config.warning_threshold {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 0;
        }

        let severity = self.select_severity(score)?;

        if let Some(last) = self.last_fired(severity) {
            if (score as u16) < last as u16 + self.config.hysteresis_delta as u16 {
                return None;
            }
        }

        let primary = attribution.first();
        let record = AlertRecord {
            id: Uuid::new_v4(),
            severity,
            score,
            session_id: session_id.to_string(),
            timestamp,
            primary_metric: primary.map(|p| p.key),
            primary_pct: primary.map(|p| p.pct_change),
            primary_z: primary.map(|p| p.z_score),
            attribution: attribution.iter().take(ALERT_ATTRIBUTION_DEPTH).cloned().collect(),
            message: format_message(severity, score, primary),
            recommended_action: severity.recommended_action(),
            auto_analyze: severity.auto_analyze(),
        };

        self.log.push_front(record.clone());
        self.log.truncate(self.config.log_capacity);
        self.last_fired[severity as usize] = Some(score);
        self.last_fired_score = Some(score);

        Some(record)
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
        self.last_fired = [None; 3];
        self.last_fired_score = None;
        self.log.clear();
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::DeviationSeverity;

    fn fire(engine: &mut AlertEngine, score: u8) -> Option<AlertRecord> {
        engine.evaluate(score, &[], "svc-a", Utc::now())
    }

    fn p99_driver() -> AttributionRecord {
        AttributionRecord {
            key: MetricKind::P99,
            label: MetricKind::P99.label(),
            unit: MetricKind::P99.unit(),
            current: 800.0,
            baseline_mean: 100.0,
            baseline_std: 5.0,
            z_score: 140.0,
            inverted: false,
            directional_z: 140.0,
            abs_z: 140.0,
            pct_change: 700.0,
            severity: DeviationSeverity::Critical,
        }
    }

    #[test]
    fn test_warning_needs_consecutive_ticks() {
        let mut engine = AlertEngine::default();
        assert!(fire(&mut engine, 55).is_none());
        assert!(fire(&mut engine, 60).is_none());
        assert!(fire(&mut engine, 30).is_none());
        assert_eq!(engine.consecutive_ticks(), 0);
        assert_eq!(engine.log_len(), 0);

        let fired: Vec<_> = [55, 56, 57, 58]
            .into_iter()
            .filter_map(|s| fire(&mut engine, s))
            .collect();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].severity, AlertSeverity::Warning);
        assert_eq!(fired[0].score, 57);
        assert!(!fired[0].auto_analyze);
    }

    #[test]
    fn test_hysteresis_per_severity() {
        let mut engine = AlertEngine::default();
        let first = fire(&mut engine, 75).unwrap();
        assert_eq!(first.severity, AlertSeverity::Critical);

        for score in 75..=84 {
            assert!(fire(&mut engine, score).is_none(), "re-fired at {}", score);
        }
        let again = fire(&mut engine, 85).unwrap();
        assert_eq!(again.severity, AlertSeverity::Critical);
        assert_eq!(engine.last_fired(AlertSeverity::Critical), Some(85));
    }

    #[test]
    fn test_higher_tier_ignores_lower_hysteresis() {
        let mut engine = AlertEngine::default();
        for _ in 0..3 {
            fire(&mut engine, 60);
        }
        assert!(engine.has_fired(AlertSeverity::Warning));

        // Inside the WARNING hysteresis band, but CRITICAL has never fired
        let crit = fire(&mut engine, 72).unwrap();
        assert_eq!(crit.severity, AlertSeverity::Critical);
        assert!(crit.auto_analyze);
    }

    #[test]
    fn test_emergency_hysteresis_sequence() {
        let mut engine = AlertEngine::default();
        let first = fire(&mut engine, 90).unwrap();
        assert_eq!(first.severity, AlertSeverity::Emergency);
        assert!(fire(&mut engine, 92).is_none());
        assert!(fire(&mut engine, 95).is_none());
        let second = fire(&mut engine, 100).unwrap();
        assert_eq!(second.severity, AlertSeverity::Emergency);
        assert_eq!(engine.log_len(), 2);
    }

    #[test]
    fn test_message_and_record_fields() {
        let mut engine = AlertEngine::default();
        let record = engine
            .evaluate(89, &[p99_driver()], "checkout", Utc::now())
            .unwrap();

        assert_eq!(
            record.message,
            "EMERGENCY: Risk 89/100 — P99 latency ↑700% from baseline (Z=140.0)"
        );
        assert_eq!(record.primary_metric, Some(MetricKind::P99));
        assert_eq!(record.primary_pct, Some(700.0));
        assert_eq!(record.session_id, "checkout");
        assert_eq!(record.attribution.len(), 1);
        assert!(record.auto_analyze);
    }

    #[test]
    fn test_message_drop_and_no_driver() {
        let mut drop = p99_driver();
        drop.key = MetricKind::Rate;
        drop.label = MetricKind::Rate.label();
        drop.current = 200.0;
        drop.baseline_mean = 1000.0;
        drop.z_score = -16.0;
        drop.pct_change = -80.0;
        assert_eq!(
            format_message(AlertSeverity::Critical, 80, Some(&drop)),
            "CRITICAL: Risk 80/100 — Request rate ↓80% from baseline (Z=-16.0)"
        );
        assert_eq!(format_message(AlertSeverity::Warning, 51, None), "WARNING: Risk 51/100");
    }

    #[test]
    fn test_log_is_capped_most_recent_first() {
        let mut engine = AlertEngine::new(AlertConfig {
            log_capacity: 2,
            hysteresis_delta: 0,
            ..AlertConfig::default()
        });
        fire(&mut engine, 73);
        fire(&mut engine, 74);
        fire(&mut engine, 90);

        let scores: Vec<u8> = engine.log().map(|a| a.score).collect();
        assert_eq!(scores, vec![90, 74]);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut engine = AlertEngine::default();
        fire(&mut engine, 90);
        engine.reset();
        assert!(!engine.has_fired(AlertSeverity::Emergency));
        assert_eq!(engine.log_len(), 0);
        assert!(fire(&mut engine, 90).is_some());
    }
}
