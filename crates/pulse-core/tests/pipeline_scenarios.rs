//! End-to-end scenarios: baseline learning, a severe downstream failure,
//! normal operation after training, and alert escalation through a session.

use chrono::{Duration, TimeZone, Utc};
use pulse_core::algo::ForestConfig;
use pulse_core::{
    AlertConfig, AlertSeverity, DeviationSeverity, HistoryBuffer, MetricKind, MetricSnapshot,
    MonitorSession, Phase, PipelineConfig, ScoringPipeline, SessionConfig,
};

const BASE: [f64; 4] = [1000.0, 1.0, 100.0, 20.0];

/// Deterministic jitter within ±1% of the baseline. `exact_from` marks the
/// first index that sits exactly on the baseline.
fn jittered(i: u64, exact_from: Option<u64>) -> MetricSnapshot {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let mut values = BASE;
    if exact_from.is_none_or(|cut| i < cut) {
        for (m, v) in values.iter_mut().enumerate() {
            let m = m as u64;
            let offset = ((i * (3 + 2 * m) + m) % 11) as f64 - 5.0;
            *v *= 1.0 + offset / 5.0 * 0.01;
        }
    }
    MetricSnapshot::from_values(i + 1, start + Duration::seconds(5 * i as i64), values)
}

fn baseline_snapshot(i: u64) -> MetricSnapshot {
    jittered(i, Some(11))
}

fn downstream_failure(tick: u64) -> MetricSnapshot {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    MetricSnapshot::new(
        tick,
        start + Duration::seconds(5 * tick as i64),
        200.0,
        15.0,
        800.0,
        10.0,
    )
}

fn pipeline_config(seed: u64) -> PipelineConfig {
    PipelineConfig {
        forest: ForestConfig {
            seed: Some(seed),
            ..ForestConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn session(seed: u64, scoring_every: u64) -> MonitorSession {
    MonitorSession::new(
        format!("scenario-{}", seed),
        SessionConfig {
            scoring_every,
            ..SessionConfig::default()
        },
        pipeline_config(seed),
        AlertConfig::default(),
    )
}

#[test]
fn baseline_training_switches_to_scoring_at_tick_twelve() {
    for seed in 0..10 {
        let mut pipeline = ScoringPipeline::new(pipeline_config(seed));
        let mut history = HistoryBuffer::default();

        for i in 0..12 {
            let snapshot = baseline_snapshot(i);
            history.push(snapshot).unwrap();
            let out = pipeline.update(&snapshot, &history).unwrap();

            if i < 11 {
                assert_eq!(out.phase, Phase::Learning, "seed {} tick {}", seed, i + 1);
            } else {
                assert_eq!(out.phase, Phase::Scoring, "seed {}", seed);
                assert!(out.score < 15, "seed {}: tick 12 scored {}", seed, out.score);
            }
        }
    }
}

#[test]
fn severe_downstream_failure_is_critical() {
    for seed in 0..10 {
        let mut s = session(seed, 1);
        for i in 0..12 {
            s.ingest(baseline_snapshot(i)).unwrap();
        }
        assert_eq!(s.phase(), Phase::Scoring);

        let outcome = s.ingest(downstream_failure(13)).unwrap();
        let output = outcome.output.unwrap();
        assert!(output.score >= 72, "seed {}: anomaly scored {}", seed, output.score);

        let primary = &outcome.attribution[0];
        assert!(
            matches!(
                primary.key,
                MetricKind::P99 | MetricKind::ErrorRate | MetricKind::Rate
            ),
            "unexpected primary driver {:?}",
            primary.key
        );
        assert_eq!(primary.severity, DeviationSeverity::Critical);

        let alert = outcome.alert.expect("anomaly should alert");
        assert!(alert.severity >= AlertSeverity::Critical);
        assert!(alert.auto_analyze);
        assert_eq!(alert.primary_metric, Some(primary.key));
    }
}

#[test]
fn normal_operation_stays_quiet() {
    let mut s = session(3, 1);
    for i in 0..60 {
        let outcome = s.ingest(jittered(i, None)).unwrap();
        if let Some(output) = outcome.output.filter(|o| o.is_scoring()) {
            assert!(output.score < 50, "tick {} scored {}", i + 1, output.score);
        }
        assert!(outcome.alert.is_none());
    }
    assert_eq!(s.alerts().count(), 0);
}

#[test]
fn default_cadence_scores_every_third_tick() {
    let mut s = session(21, 3);
    let mut scored = Vec::new();

    for i in 0..12 {
        let outcome = s.ingest(baseline_snapshot(i)).unwrap();
        if outcome.scored {
            scored.push(outcome.tick);
        }
    }
    assert_eq!(scored, vec![3, 6, 9, 12]);
    assert_eq!(s.phase(), Phase::Scoring);

    // Ticks 13 and 14 only extend history
    let before = s.pipeline().scores().count();
    assert!(!s.ingest(downstream_failure(13)).unwrap().scored);
    assert!(!s.ingest(downstream_failure(14)).unwrap().scored);
    assert_eq!(s.pipeline().scores().count(), before);

    let outcome = s.ingest(downstream_failure(15)).unwrap();
    assert!(outcome.scored);
    assert!(outcome.output.unwrap().score >= 72);
    assert_eq!(s.history().len(), 15);
}

#[test]
fn repeated_failure_respects_hysteresis() {
    let mut s = session(8, 1);
    for i in 0..12 {
        s.ingest(baseline_snapshot(i)).unwrap();
    }

    let mut fired = Vec::new();
    for tick in 13..=30 {
        if let Some(alert) = s.ingest(downstream_failure(tick)).unwrap().alert {
            fired.push(alert);
        }
    }

    // The score settles in the 90s and never climbs 10 points past the
    // first EMERGENCY, so the failure alerts exactly once
    assert_eq!(fired.len(), 1, "{:?}", fired.iter().map(|a| a.score).collect::<Vec<_>>());
    assert_eq!(fired[0].severity, AlertSeverity::Emergency);

    let log: Vec<_> = s.alerts().map(|a| a.id).collect();
    let newest_first: Vec<_> = fired.iter().rev().map(|a| a.id).collect();
    assert_eq!(log, newest_first);
}

#[test]
fn out_of_order_delivery_fails_fast() {
    let mut s = session(1, 1);
    for i in 0..5 {
        s.ingest(baseline_snapshot(i)).unwrap();
    }
    let stale = baseline_snapshot(2);
    assert!(s.ingest(stale).is_err());
    assert_eq!(s.history().len(), 5);
    assert_eq!(s.ticks_seen(), 5);
}

#[test]
fn seeded_sessions_are_reproducible() {
    let run = |seed| {
        let mut s = session(seed, 1);
        let mut scores = Vec::new();
        for i in 0..12 {
            s.ingest(baseline_snapshot(i)).unwrap();
        }
        for i in 12..24 {
            let out = s.ingest(jittered(i, None)).unwrap();
            scores.push(out.output.unwrap().score);
        }
        scores.push(s.ingest(downstream_failure(25)).unwrap().output.unwrap().score);
        scores
    };

    assert_eq!(run(77), run(77));
}
